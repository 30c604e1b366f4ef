/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use fonts::{FontFormatFlags, FontSanitizer, OpenTypeSanitizer, SanitizeError};

use crate::support::{assemble_sfnt, assemble_woff, font_tables, minimal_font};

#[test]
fn accepts_a_minimal_truetype_font() {
    let font = minimal_font("Test Sans Regular");
    let sanitized = OpenTypeSanitizer
        .sanitize(&font, FontFormatFlags::TRUETYPE)
        .unwrap();
    assert_eq!(sanitized.data, font);
    assert_eq!(sanitized.format, FontFormatFlags::TRUETYPE);
    assert_eq!(sanitized.real_name, "Test Sans Regular");
    assert!(sanitized.metadata.is_empty());
}

#[test]
fn decodes_woff_into_the_original_sfnt() {
    let mut tables = font_tables("Test Sans Bold");
    // Something big and repetitive so that zlib actually shrinks it.
    tables.push((*b"post", vec![0; 256]));
    tables.sort_by_key(|(tag, _)| *tag);
    let woff = assemble_woff(&tables, b"<metadata/>");

    let sanitized = OpenTypeSanitizer
        .sanitize(&woff, FontFormatFlags::WOFF)
        .unwrap();
    assert_eq!(sanitized.format, FontFormatFlags::WOFF);
    assert_eq!(sanitized.data, assemble_sfnt(&tables));
    assert_eq!(sanitized.real_name, "Test Sans Bold");
    assert_eq!(sanitized.metadata, b"<metadata/>");
    assert_eq!(sanitized.metadata_original_length, 44);
}

#[test]
fn rejects_woff_with_wrong_length() {
    let mut woff = assemble_woff(&font_tables("Test"), &[]);
    woff.push(0);
    assert!(matches!(
        OpenTypeSanitizer.sanitize(&woff, FontFormatFlags::WOFF),
        Err(SanitizeError::BadWoff(_))
    ));
}

/// A WOFF header followed by the given directory entries of (tag, offset, compressed length,
/// original length), padded with `body` zero bytes.
fn woff_with_directory(
    num_tables: u16,
    entries: &[([u8; 4], u32, u32, u32)],
    body: usize,
) -> Vec<u8> {
    let total_length = 44 + 20 * num_tables as usize + body;
    let mut woff = b"wOFF".to_vec();
    woff.extend_from_slice(&0x00010000u32.to_be_bytes());
    woff.extend_from_slice(&(total_length as u32).to_be_bytes());
    woff.extend_from_slice(&num_tables.to_be_bytes());
    woff.resize(44, 0);
    for (tag, offset, compressed_length, original_length) in entries {
        woff.extend_from_slice(tag);
        for field in [*offset, *compressed_length, *original_length, 0] {
            woff.extend_from_slice(&field.to_be_bytes());
        }
    }
    woff.resize(total_length, 0);
    woff
}

fn assert_bad_woff(woff: &[u8]) {
    let result = OpenTypeSanitizer.sanitize(woff, FontFormatFlags::WOFF);
    assert!(
        matches!(result, Err(SanitizeError::BadWoff(_))),
        "expected a WOFF error, got {result:?}"
    );
}

#[test]
fn rejects_woff_with_more_tables_than_an_sfnt_can_hold() {
    assert_bad_woff(&woff_with_directory(4096, &[], 0));
    assert_bad_woff(&woff_with_directory(u16::MAX, &[], 0));
}

#[test]
fn rejects_woff_tables_larger_than_a_font_can_be() {
    let body_offset = 44 + 20;
    assert_bad_woff(&woff_with_directory(
        1,
        &[(*b"glyf", body_offset, 4, 0xFFFF_FFF0)],
        4,
    ));

    // Each table is modest, but together they add up to too much.
    let entries: Vec<_> = (0..64u32)
        .map(|index| {
            let tag = (0x61616100 + index).to_be_bytes();
            (tag, 44 + 20 * 64, 4, 2 << 20)
        })
        .collect();
    assert_bad_woff(&woff_with_directory(64, &entries, 4));
}

#[test]
fn rejects_woff_table_lengths_that_do_not_add_up() {
    // Claims to be compressed, yet is larger than what it decompresses to.
    assert_bad_woff(&woff_with_directory(1, &[(*b"head", 64, 8, 4)], 8));

    // Inflates to fewer bytes than the directory promises.
    let mut tables = font_tables("Test");
    tables.push((*b"post", vec![0; 256]));
    tables.sort_by_key(|(tag, _)| *tag);
    let mut woff = assemble_woff(&tables, &[]);
    let post_index = tables.iter().position(|(tag, _)| tag == b"post").unwrap();
    let original_length = 44 + 20 * post_index + 12;
    woff[original_length..original_length + 4].copy_from_slice(&300u32.to_be_bytes());
    assert_bad_woff(&woff);
}

#[test]
fn rejects_woff_tables_outside_the_data() {
    assert_eq!(
        OpenTypeSanitizer.sanitize(
            &woff_with_directory(1, &[(*b"head", 0xFFFF_FF00, 4, 4)], 4),
            FontFormatFlags::WOFF
        ),
        Err(SanitizeError::Truncated)
    );
}

#[test]
fn rejects_fonts_without_required_tables() {
    let tables: Vec<_> = font_tables("Test")
        .into_iter()
        .filter(|(tag, _)| tag != b"head")
        .collect();
    assert!(matches!(
        OpenTypeSanitizer.sanitize(&assemble_sfnt(&tables), FontFormatFlags::empty()),
        Err(SanitizeError::InvalidSfnt(_))
    ));
}

#[test]
fn rejects_truncated_table_directory() {
    let font = minimal_font("Test");
    assert!(
        OpenTypeSanitizer
            .sanitize(&font[..20], FontFormatFlags::empty())
            .is_err()
    );
}

#[test]
fn rejects_collections_and_unknown_data() {
    assert_eq!(
        OpenTypeSanitizer.sanitize(b"ttcf\0\x01\0\0", FontFormatFlags::empty()),
        Err(SanitizeError::UnsupportedFormat("TrueType collection"))
    );
    assert_eq!(
        OpenTypeSanitizer.sanitize(b"hello world", FontFormatFlags::empty()),
        Err(SanitizeError::UnknownFormat)
    );
}
