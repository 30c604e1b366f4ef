/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::debug;
use read_fonts::types::{NameId, Tag};
use read_fonts::{FontRef, TableProvider};

use crate::font_face_source::FontFormatFlags;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SanitizeError {
    #[error("unrecognized font data")]
    UnknownFormat,
    #[error("{0} fonts are not supported")]
    UnsupportedFormat(&'static str),
    #[error("font data is truncated")]
    Truncated,
    #[error("bad WOFF data: {0}")]
    BadWoff(String),
    #[error("invalid sfnt data: {0}")]
    InvalidSfnt(String),
}

/// Font data after sanitizing: always a single sfnt the platform can activate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SanitizedFont {
    pub data: Vec<u8>,
    /// The container the data arrived in.
    pub format: FontFormatFlags,
    /// The full name from the `name` table, or empty if there is none.
    pub real_name: String,
    /// The WOFF extended metadata block, still compressed.
    pub metadata: Vec<u8>,
    pub metadata_original_length: u32,
}

/// Checks downloaded font data and converts it to something the platform accepts.
pub trait FontSanitizer {
    fn sanitize(
        &self,
        data: &[u8],
        declared_format: FontFormatFlags,
    ) -> Result<SanitizedFont, SanitizeError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FontDataType {
    TrueType,
    OpenTypeCff,
    Woff,
    Woff2,
    Collection,
    Unknown,
}

impl FontDataType {
    fn format_flags(self) -> FontFormatFlags {
        match self {
            FontDataType::TrueType => FontFormatFlags::TRUETYPE,
            FontDataType::OpenTypeCff => FontFormatFlags::OPENTYPE,
            FontDataType::Woff => FontFormatFlags::WOFF,
            FontDataType::Woff2 => FontFormatFlags::WOFF2,
            FontDataType::Collection | FontDataType::Unknown => FontFormatFlags::UNKNOWN,
        }
    }
}

/// Sniff the container format from the first four bytes.
pub fn determine_font_data_type(data: &[u8]) -> FontDataType {
    match data.get(0..4) {
        Some([0x00, 0x01, 0x00, 0x00]) | Some(b"true") => FontDataType::TrueType,
        Some(b"OTTO") => FontDataType::OpenTypeCff,
        Some(b"wOFF") => FontDataType::Woff,
        Some(b"wOF2") => FontDataType::Woff2,
        Some(b"ttcf") => FontDataType::Collection,
        _ => FontDataType::Unknown,
    }
}

/// The built-in sanitizer: unwraps WOFF 1.0 and checks the resulting sfnt with `read-fonts`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenTypeSanitizer;

impl FontSanitizer for OpenTypeSanitizer {
    fn sanitize(
        &self,
        data: &[u8],
        declared_format: FontFormatFlags,
    ) -> Result<SanitizedFont, SanitizeError> {
        let data_type = determine_font_data_type(data);
        if !declared_format.is_empty() && !declared_format.contains(data_type.format_flags()) {
            debug!(
                "Font data sniffed as {:?} but declared as {:?}",
                data_type, declared_format
            );
        }

        let mut sanitized = match data_type {
            FontDataType::TrueType | FontDataType::OpenTypeCff => SanitizedFont {
                data: data.to_vec(),
                ..Default::default()
            },
            FontDataType::Woff => decode_woff(data)?,
            FontDataType::Woff2 => return Err(SanitizeError::UnsupportedFormat("WOFF2")),
            FontDataType::Collection => {
                return Err(SanitizeError::UnsupportedFormat("TrueType collection"));
            },
            FontDataType::Unknown => return Err(SanitizeError::UnknownFormat),
        };
        sanitized.format = data_type.format_flags();
        sanitized.real_name = validate_sfnt(&sanitized.data)?;
        Ok(sanitized)
    }
}

const WOFF_HEADER_SIZE: usize = 44;
const WOFF_TABLE_ENTRY_SIZE: usize = 20;
const SFNT_HEADER_SIZE: usize = 12;
const SFNT_TABLE_RECORD_SIZE: usize = 16;
/// The most tables an sfnt directory can describe before its binary search fields overflow.
const MAX_TABLES: u16 = 4095;
/// Upper bound on the size of a decoded font.
const MAX_SFNT_SIZE: usize = 64 << 20;

fn read_u16(data: &[u8], offset: usize) -> Result<u16, SanitizeError> {
    data.get(offset..offset + 2)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
        .ok_or(SanitizeError::Truncated)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, SanitizeError> {
    data.get(offset..offset + 4)
        .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .ok_or(SanitizeError::Truncated)
}

fn slice(data: &[u8], offset: u32, length: u32) -> Result<&[u8], SanitizeError> {
    let start = offset as usize;
    let end = start
        .checked_add(length as usize)
        .ok_or(SanitizeError::Truncated)?;
    data.get(start..end).ok_or(SanitizeError::Truncated)
}

struct WoffTableEntry {
    tag: u32,
    offset: u32,
    compressed_length: u32,
    original_length: u32,
    checksum: u32,
}

struct WoffTable {
    tag: u32,
    checksum: u32,
    data: Vec<u8>,
}

/// Read the table directory of a WOFF file, checking that the tables it promises fit in a
/// font of reasonable size before anything is inflated.
fn read_woff_directory(
    data: &[u8],
    num_tables: u16,
) -> Result<Vec<WoffTableEntry>, SanitizeError> {
    let mut entries = Vec::with_capacity(num_tables as usize);
    let mut sfnt_size = SFNT_HEADER_SIZE + num_tables as usize * SFNT_TABLE_RECORD_SIZE;
    for index in 0..num_tables as usize {
        let position = WOFF_HEADER_SIZE + index * WOFF_TABLE_ENTRY_SIZE;
        let entry = WoffTableEntry {
            tag: read_u32(data, position)?,
            offset: read_u32(data, position + 4)?,
            compressed_length: read_u32(data, position + 8)?,
            original_length: read_u32(data, position + 12)?,
            checksum: read_u32(data, position + 16)?,
        };
        if entry.compressed_length > entry.original_length {
            return Err(SanitizeError::BadWoff(format!(
                "table {} is larger compressed than uncompressed",
                Tag::from_u32(entry.tag)
            )));
        }
        sfnt_size = (entry.original_length as usize)
            .checked_next_multiple_of(4)
            .and_then(|padded| sfnt_size.checked_add(padded))
            .filter(|size| *size <= MAX_SFNT_SIZE)
            .ok_or_else(|| {
                SanitizeError::BadWoff(format!(
                    "tables add up to more than {MAX_SFNT_SIZE} bytes"
                ))
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn inflate_table(data: &[u8], entry: &WoffTableEntry) -> Result<Vec<u8>, SanitizeError> {
    let compressed = slice(data, entry.offset, entry.compressed_length)?;
    if entry.compressed_length == entry.original_length {
        return Ok(compressed.to_vec());
    }
    let mut decoded = Vec::with_capacity(entry.original_length as usize);
    ZlibDecoder::new(compressed)
        .take(entry.original_length as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|error| SanitizeError::BadWoff(error.to_string()))?;
    if decoded.len() != entry.original_length as usize {
        return Err(SanitizeError::BadWoff(format!(
            "table {} inflated to {} bytes, expected {}",
            Tag::from_u32(entry.tag),
            decoded.len(),
            entry.original_length
        )));
    }
    Ok(decoded)
}

/// Convert WOFF 1.0 data back into the sfnt it was made from.
fn decode_woff(data: &[u8]) -> Result<SanitizedFont, SanitizeError> {
    if data.len() < WOFF_HEADER_SIZE {
        return Err(SanitizeError::Truncated);
    }
    let flavor = read_u32(data, 4)?;
    let declared_length = read_u32(data, 8)?;
    let num_tables = read_u16(data, 12)?;
    let meta_offset = read_u32(data, 24)?;
    let meta_length = read_u32(data, 28)?;
    let meta_original_length = read_u32(data, 32)?;

    if declared_length as usize != data.len() {
        return Err(SanitizeError::BadWoff(format!(
            "header length {} does not match data length {}",
            declared_length,
            data.len()
        )));
    }
    if num_tables == 0 {
        return Err(SanitizeError::BadWoff("no tables".into()));
    }
    if num_tables > MAX_TABLES {
        return Err(SanitizeError::BadWoff(format!(
            "{num_tables} tables is more than an sfnt can hold"
        )));
    }

    let mut tables = read_woff_directory(data, num_tables)?
        .iter()
        .map(|entry| {
            Ok(WoffTable {
                tag: entry.tag,
                checksum: entry.checksum,
                data: inflate_table(data, entry)?,
            })
        })
        .collect::<Result<Vec<_>, SanitizeError>>()?;
    tables.sort_by_key(|table| table.tag);

    let metadata = if meta_length > 0 {
        slice(data, meta_offset, meta_length)?.to_vec()
    } else {
        Vec::new()
    };

    Ok(SanitizedFont {
        data: build_sfnt(flavor, &tables)?,
        metadata,
        metadata_original_length: if meta_length > 0 { meta_original_length } else { 0 },
        ..Default::default()
    })
}

/// The `numTables`, `searchRange`, `entrySelector` and `rangeShift` fields of an sfnt header.
fn sfnt_directory_fields(num_tables: usize) -> Result<[u16; 4], SanitizeError> {
    let too_many = || SanitizeError::BadWoff(format!("{num_tables} tables do not fit an sfnt"));
    let num_tables = u32::try_from(num_tables).map_err(|_| too_many())?;
    if num_tables == 0 {
        return Ok([0; 4]);
    }
    let entry_selector = num_tables.ilog2();
    let search_range = (1u32 << entry_selector) * 16;
    let range_shift = num_tables
        .checked_mul(16)
        .map(|size| size - search_range)
        .ok_or_else(too_many)?;
    let field = |value: u32| u16::try_from(value).map_err(|_| too_many());
    Ok([
        field(num_tables)?,
        field(search_range)?,
        field(entry_selector)?,
        field(range_shift)?,
    ])
}

fn build_sfnt(flavor: u32, tables: &[WoffTable]) -> Result<Vec<u8>, SanitizeError> {
    let header_fields = sfnt_directory_fields(tables.len())?;

    let directory_size = SFNT_HEADER_SIZE + tables.len() * SFNT_TABLE_RECORD_SIZE;
    let total_size = directory_size +
        tables
            .iter()
            .map(|table| table.data.len().next_multiple_of(4))
            .sum::<usize>();

    let mut sfnt = Vec::with_capacity(total_size);
    sfnt.extend_from_slice(&flavor.to_be_bytes());
    for field in header_fields {
        sfnt.extend_from_slice(&field.to_be_bytes());
    }

    let mut offset = directory_size;
    for table in tables {
        sfnt.extend_from_slice(&table.tag.to_be_bytes());
        sfnt.extend_from_slice(&table.checksum.to_be_bytes());
        sfnt.extend_from_slice(&(offset as u32).to_be_bytes());
        sfnt.extend_from_slice(&(table.data.len() as u32).to_be_bytes());
        offset += table.data.len().next_multiple_of(4);
    }
    for table in tables {
        sfnt.extend_from_slice(&table.data);
        sfnt.resize(sfnt.len().next_multiple_of(4), 0);
    }
    Ok(sfnt)
}

/// Check that `data` is an sfnt with the tables every font needs, returning its full name.
fn validate_sfnt(data: &[u8]) -> Result<String, SanitizeError> {
    let invalid = |error: read_fonts::ReadError| SanitizeError::InvalidSfnt(error.to_string());
    let font = FontRef::new(data).map_err(invalid)?;
    font.head().map_err(invalid)?;
    font.maxp().map_err(invalid)?;
    font.cmap().map_err(invalid)?;
    Ok(full_name(&font).unwrap_or_default())
}

fn full_name(font: &FontRef) -> Option<String> {
    let name = font.name().ok()?;
    let string_data = name.string_data();
    let find = |name_id: NameId| {
        name.name_record()
            .iter()
            .filter(|record| record.name_id() == name_id)
            .max_by_key(|record| record.is_unicode())
            .and_then(|record| record.string(string_data).ok())
            .map(|string| string.chars().collect::<String>())
    };
    find(NameId::FULL_NAME).or_else(|| find(NameId::FAMILY_NAME))
}
