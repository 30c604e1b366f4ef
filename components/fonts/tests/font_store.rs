/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::Arc;

use fonts::{
    FamilyEntry, FontDescriptor, FontFaceFamily, FontIdentifier, FontLoadError, FontStretch,
    FontStyle, FontTemplate, FontTemplateDescriptor, FontTemplateRef, FontWeight,
    PlatformFontInfo,
};

use crate::support::font_url;

fn template(name: &str, descriptor: FontTemplateDescriptor) -> FontTemplateRef {
    FontTemplate::new_for_web_font(
        "Foo",
        FontIdentifier::Web(font_url(name)),
        Arc::new(Vec::new()),
        PlatformFontInfo::default(),
        descriptor,
        None,
    )
}

fn entry(name: &str) -> FamilyEntry {
    FamilyEntry::Template(template(name, FontTemplateDescriptor::default()))
}

fn family_with(entries: &[FamilyEntry]) -> FontFaceFamily {
    let mut family = FontFaceFamily::new("Foo".into());
    for entry in entries {
        family.append(entry.clone());
    }
    family
}

#[test]
fn append_moves_existing_entry_to_the_end() {
    let (a, b, c) = (entry("a.ttf"), entry("b.ttf"), entry("c.ttf"));
    let mut family = family_with(&[a.clone(), b.clone(), c.clone()]);

    family.append(a.clone());
    assert_eq!(family.entries(), &[b.clone(), c.clone(), a.clone()]);

    family.append(a.clone());
    assert_eq!(family.len(), 3);
    assert_eq!(family.entries().last(), Some(&a));
    assert_eq!(
        family.entries().iter().filter(|entry| **entry == a).count(),
        1
    );
}

#[test]
fn entries_are_compared_by_identity() {
    let first = entry("a.ttf");
    let second = entry("a.ttf");
    assert_ne!(first, second);

    let family = family_with(&[first.clone(), second.clone()]);
    assert_eq!(family.len(), 2);
}

#[test]
fn replace_keeps_position() {
    let (a, b, c) = (entry("a.ttf"), entry("b.ttf"), entry("c.ttf"));
    let mut family = family_with(&[a.clone(), b.clone()]);

    family.replace(&a, c.clone()).unwrap();
    assert_eq!(family.entries(), &[c, b]);
}

#[test]
fn replace_of_missing_entry_is_an_error() {
    let mut family = family_with(&[entry("a.ttf")]);
    let result = family.replace(&entry("b.ttf"), entry("c.ttf"));
    assert!(matches!(
        result,
        Err(FontLoadError::InternalConsistency(_))
    ));
    assert_eq!(family.len(), 1);
}

#[test]
fn clear_and_remove() {
    let (a, b) = (entry("a.ttf"), entry("b.ttf"));
    let mut family = family_with(&[a.clone(), b.clone()]);
    assert!(family.remove(&a));
    assert!(!family.remove(&a));
    assert!(family.contains(&b));
    family.clear();
    assert!(family.is_empty());
}

#[test]
fn character_map_follows_mutations() {
    let latin = FamilyEntry::Template(template(
        "latin.ttf",
        FontTemplateDescriptor::default().with_unicode_range(vec![0x41..=0x5a]),
    ));
    let digits = FamilyEntry::Template(template(
        "digits.ttf",
        FontTemplateDescriptor::default().with_unicode_range(vec![0x30..=0x39]),
    ));
    let mut family = family_with(&[latin.clone()]);
    assert!(family.has_character('Q'));
    assert!(!family.has_character('7'));

    family.append(digits.clone());
    assert!(family.has_character('7'));

    family.replace(&digits, entry("everything.ttf")).unwrap();
    assert!(family.has_character('\u{4e00}'));

    family.clear();
    assert!(!family.has_character('Q'));
}

#[test]
fn find_for_descriptor_prefers_closest_face() {
    let regular = FamilyEntry::Template(template(
        "regular.ttf",
        FontTemplateDescriptor::new(FontWeight::NORMAL, FontStretch::NORMAL, FontStyle::Normal),
    ));
    let bold = FamilyEntry::Template(template(
        "bold.ttf",
        FontTemplateDescriptor::new(FontWeight::BOLD, FontStretch::NORMAL, FontStyle::Normal),
    ));
    let family = family_with(&[regular.clone(), bold.clone()]);

    let query = FontDescriptor::new(FontWeight(800), FontStretch::NORMAL, FontStyle::Normal);
    assert_eq!(family.find_for_descriptor(&query), Some((bold, false)));
    assert_eq!(
        family.find_for_descriptor(&FontDescriptor::default()),
        Some((regular.clone(), false))
    );

    let only_regular = family_with(&[regular.clone()]);
    assert_eq!(
        only_regular.find_for_descriptor(&query),
        Some((regular, true))
    );
    assert_eq!(
        family_with(&[]).find_for_descriptor(&query),
        None
    );
}
