/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::OnceCell;
use std::fmt;
use std::ops::{Deref, RangeInclusive};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{FontLoadError, FontLoadResult};
use crate::font_template::{FontDescriptor, FontTemplateDescriptor, FontTemplateRef};
use crate::proxy_font_entry::ProxyFontEntryRef;

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LowercaseFontFamilyName {
    inner: String,
}

impl<T: AsRef<str>> From<T> for LowercaseFontFamilyName {
    fn from(value: T) -> Self {
        LowercaseFontFamilyName {
            inner: value.as_ref().to_lowercase(),
        }
    }
}

impl Deref for LowercaseFontFamilyName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for LowercaseFontFamilyName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// One face of a [`FontFaceFamily`]: either a proxy still resolving its `@font-face` sources or
/// the font it resolved to. Two entries are the same entry only if they share the same
/// allocation.
#[derive(Clone, Debug)]
pub enum FamilyEntry {
    Proxy(ProxyFontEntryRef),
    Template(FontTemplateRef),
}

impl PartialEq for FamilyEntry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FamilyEntry::Proxy(a), FamilyEntry::Proxy(b)) => Arc::ptr_eq(a, b),
            (FamilyEntry::Template(a), FamilyEntry::Template(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for FamilyEntry {}

impl FamilyEntry {
    pub fn as_proxy(&self) -> Option<&ProxyFontEntryRef> {
        match self {
            FamilyEntry::Proxy(proxy) => Some(proxy),
            FamilyEntry::Template(_) => None,
        }
    }

    pub fn as_template(&self) -> Option<&FontTemplateRef> {
        match self {
            FamilyEntry::Proxy(_) => None,
            FamilyEntry::Template(template) => Some(template),
        }
    }

    fn with_descriptor<R>(&self, callback: impl FnOnce(&FontTemplateDescriptor) -> R) -> R {
        match self {
            FamilyEntry::Proxy(proxy) => callback(proxy.borrow().descriptor()),
            FamilyEntry::Template(template) => callback(template.descriptor()),
        }
    }

    /// The code points this entry may render. A proxy can only answer from its declared
    /// `unicode-range`; a resolved font narrows it to what the platform found in the font.
    fn coverage(&self) -> Option<Vec<RangeInclusive<u32>>> {
        match self {
            FamilyEntry::Proxy(proxy) => proxy.borrow().descriptor().unicode_range.clone(),
            FamilyEntry::Template(template) => template
                .descriptor()
                .unicode_range
                .clone()
                .or_else(|| template.platform_info().char_coverage.clone()),
        }
    }
}

/// A coarse summary of the code points a family can represent. `None` ranges mean an entry
/// without any known restriction, which makes the whole family cover everything.
#[derive(Clone, Debug, Default)]
pub struct CharacterMap {
    ranges: Option<Vec<RangeInclusive<u32>>>,
}

impl CharacterMap {
    fn build(entries: &[FamilyEntry]) -> Self {
        let mut ranges = Vec::new();
        for entry in entries {
            match entry.coverage() {
                Some(entry_ranges) => ranges.extend(entry_ranges),
                None => return CharacterMap { ranges: None },
            }
        }
        ranges.sort_by_key(|range| *range.start());
        let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if *range.start() <= last.end().saturating_add(1) => {
                    if range.end() > last.end() {
                        *last = *last.start()..=*range.end();
                    }
                },
                _ => merged.push(range),
            }
        }
        CharacterMap {
            ranges: Some(merged),
        }
    }

    pub fn contains(&self, character: char) -> bool {
        let character = character as u32;
        let Some(ranges) = self.ranges.as_ref() else {
            return true;
        };
        ranges
            .binary_search_by(|range| {
                if *range.end() < character {
                    std::cmp::Ordering::Less
                } else if *range.start() > character {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }
}

/// The entries that make up one `@font-face` family of a user font set, in rule order.
#[derive(Debug)]
pub struct FontFaceFamily {
    name: LowercaseFontFamilyName,
    entries: Vec<FamilyEntry>,
    /// Computed on demand and dropped by every mutation.
    character_map: OnceCell<CharacterMap>,
}

impl FontFaceFamily {
    pub fn new(name: LowercaseFontFamilyName) -> Self {
        FontFaceFamily {
            name,
            entries: Vec::new(),
            character_map: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &LowercaseFontFamilyName {
        &self.name
    }

    pub fn entries(&self) -> &[FamilyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &FamilyEntry) -> bool {
        self.entries.contains(entry)
    }

    /// Add `entry` at the end of the family. If it was already present, the earlier occurrence
    /// is removed, so the entry moves to the end.
    pub fn append(&mut self, entry: FamilyEntry) {
        // Push before removing so the entry is never left without an owner here.
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        if let Some(previous) = self.entries[..last]
            .iter()
            .position(|existing| *existing == self.entries[last])
        {
            self.entries.remove(previous);
        }
        self.character_map = OnceCell::new();
    }

    /// Swap `old` for `new` without moving it.
    pub fn replace(&mut self, old: &FamilyEntry, new: FamilyEntry) -> FontLoadResult<()> {
        let Some(slot) = self.entries.iter_mut().find(|existing| *existing == old) else {
            return Err(FontLoadError::InternalConsistency(format!(
                "replacing an entry that is not in family {}",
                self.name
            )));
        };
        *slot = new;
        self.character_map = OnceCell::new();
        Ok(())
    }

    /// Remove `entry`, returning whether it was present.
    pub fn remove(&mut self, entry: &FamilyEntry) -> bool {
        let length_before = self.entries.len();
        self.entries.retain(|existing| existing != entry);
        self.character_map = OnceCell::new();
        length_before != self.entries.len()
    }

    pub fn clear(&mut self) {
        debug!("Clearing {} entries of family {}", self.entries.len(), self.name);
        self.entries.clear();
        self.character_map = OnceCell::new();
    }

    pub fn character_map(&self) -> &CharacterMap {
        self.character_map
            .get_or_init(|| CharacterMap::build(&self.entries))
    }

    /// Whether some entry of the family may be able to render `character`.
    pub fn has_character(&self, character: char) -> bool {
        self.character_map().contains(character)
    }

    /// Find the entry in this family that best matches `descriptor_to_match`, along with
    /// whether bold must be synthesized for it. Ties go to the earliest entry.
    pub fn find_for_descriptor(
        &self,
        descriptor_to_match: &FontDescriptor,
    ) -> Option<(FamilyEntry, bool)> {
        if self.entries.len() == 1 {
            let entry = self.entries[0].clone();
            let needs_bold =
                entry.with_descriptor(|descriptor| descriptor.needs_synthetic_bold(descriptor_to_match));
            return Some((entry, needs_bold));
        }

        let mut best_entry = None;
        let mut best_distance = f32::MAX;
        for entry in self.entries.iter() {
            let distance =
                entry.with_descriptor(|descriptor| descriptor.distance_from(descriptor_to_match));
            if distance < best_distance {
                best_entry = Some(entry);
                best_distance = distance;
            }
        }

        // If a request is made for a family that exists, pick the first entry in the family
        // if nothing scored.
        let entry = best_entry.or_else(|| self.entries.first())?.clone();
        let needs_bold =
            entry.with_descriptor(|descriptor| descriptor.needs_synthetic_bold(descriptor_to_match));
        Some((entry, needs_bold))
    }
}
