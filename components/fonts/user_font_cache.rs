/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::{Mutex, const_mutex};
use url::Url;

use crate::font_face_source::Principal;
use crate::font_store::LowercaseFontFamilyName;
use crate::font_template::{
    FontFeature, FontStretch, FontStyle, FontTemplate, FontTemplateDescriptor, FontTemplateId,
    FontTemplateRef, FontWeight,
};

/// Whether a cache row survives [`UserFontCache::flush`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryPersistence {
    Discardable,
    Persistent,
}

/// What identifies the bytes of a cached font.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum CacheKeySource {
    /// A downloaded font, by URL and the principal it was loaded with.
    Url {
        url: Url,
        principal: Option<Principal>,
    },
    /// Data without a URL of its own, by CRC-32 and length.
    Content { crc32: u32, length: u32 },
}

/// Key of a [`UserFontCache`] row. Besides where the bytes came from, every style attribute of
/// the `@font-face` rule takes part in the key, so a font loaded for one declared style is never
/// handed to a rule declaring another.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UserFontCacheKey {
    pub source: CacheKeySource,
    pub private: bool,
    pub family_name: LowercaseFontFamilyName,
    pub weight: (FontWeight, FontWeight),
    pub stretch: (FontStretch, FontStretch),
    pub style: FontStyle,
    pub feature_settings: Vec<FontFeature>,
    pub language_override: u32,
}

impl UserFontCacheKey {
    fn new(
        source: CacheKeySource,
        private: bool,
        family_name: &LowercaseFontFamilyName,
        descriptor: &FontTemplateDescriptor,
    ) -> Self {
        UserFontCacheKey {
            source,
            private,
            family_name: family_name.clone(),
            weight: descriptor.weight,
            stretch: descriptor.stretch,
            style: descriptor.style,
            feature_settings: descriptor.feature_settings.clone(),
            language_override: descriptor.language_override,
        }
    }

    pub fn for_url(
        url: &Url,
        principal: Option<&Principal>,
        private: bool,
        family_name: &LowercaseFontFamilyName,
        descriptor: &FontTemplateDescriptor,
    ) -> Self {
        let source = CacheKeySource::Url {
            url: url.clone(),
            principal: principal.cloned(),
        };
        Self::new(source, private, family_name, descriptor)
    }

    pub fn for_content(
        crc32: u32,
        length: u32,
        private: bool,
        family_name: &LowercaseFontFamilyName,
        descriptor: &FontTemplateDescriptor,
    ) -> Self {
        Self::new(
            CacheKeySource::Content { crc32, length },
            private,
            family_name,
            descriptor,
        )
    }

    /// The key a resolved font is stored under, derived from where it was loaded from.
    /// Fonts found with `local()` are never cached and have no key.
    pub fn for_template(template: &FontTemplate) -> Option<Self> {
        let data = template.user_font_data()?;
        if data.local_name.is_some() {
            return None;
        }
        let source = match data.url {
            Some(ref url) if url.scheme() != "data" => CacheKeySource::Url {
                url: url.clone(),
                principal: data.principal.clone(),
            },
            _ if data.length > 0 => CacheKeySource::Content {
                crc32: data.crc32,
                length: data.length,
            },
            _ => return None,
        };
        Some(Self::new(
            source,
            data.private,
            &template.family_name().into(),
            template.descriptor(),
        ))
    }
}

struct CacheRow {
    template: Weak<FontTemplate>,
    template_id: FontTemplateId,
    persistence: EntryPersistence,
}

/// Decoded user fonts shared by every font set of the process, so the same font is fetched
/// and sanitized only once per security context.
///
/// Rows do not keep their fonts alive. A [`FontTemplate`] removes its own rows when it is
/// dropped, and a row whose font is gone is treated as a miss.
#[derive(Default)]
pub struct UserFontCache {
    rows: Mutex<HashMap<UserFontCacheKey, CacheRow>>,
}

static GLOBAL_USER_FONT_CACHE: Mutex<Option<Arc<UserFontCache>>> = const_mutex(None);

impl UserFontCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install the process-wide cache, returning it. Calling this again returns the cache that
    /// is already installed.
    pub fn init() -> Arc<Self> {
        GLOBAL_USER_FONT_CACHE
            .lock()
            .get_or_insert_with(|| {
                debug!("Initializing the user font cache");
                UserFontCache::new()
            })
            .clone()
    }

    /// The process-wide cache, if [`UserFontCache::init`] has run.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_USER_FONT_CACHE.lock().clone()
    }

    /// Empty and uninstall the process-wide cache.
    pub fn shutdown() {
        let cache = GLOBAL_USER_FONT_CACHE.lock().take();
        if let Some(cache) = cache {
            debug!("Shutting down the user font cache");
            cache.rows.lock().clear();
        }
    }

    /// Store `template` under `key`, replacing any previous row for the key.
    pub fn put(
        self: &Arc<Self>,
        key: UserFontCacheKey,
        template: &FontTemplateRef,
        persistence: EntryPersistence,
    ) {
        debug!("Caching {:?} for {:?} ({:?})", template.id(), key.source, persistence);
        let row = CacheRow {
            template: Arc::downgrade(template),
            template_id: template.id(),
            persistence,
        };
        self.rows.lock().insert(key, row);
        template.note_cached_in(self);
    }

    /// Store `template` under the key derived from its provenance. Returns false for fonts
    /// that are never cached.
    pub fn cache_font(
        self: &Arc<Self>,
        template: &FontTemplateRef,
        persistence: EntryPersistence,
    ) -> bool {
        let Some(key) = UserFontCacheKey::for_template(template) else {
            return false;
        };
        self.put(key, template, persistence);
        true
    }

    pub fn get(&self, key: &UserFontCacheKey) -> Option<FontTemplateRef> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get(key) else {
            debug!("User font cache miss for {:?}", key.source);
            return None;
        };
        match row.template.upgrade() {
            Some(template) => {
                debug!("User font cache hit for {:?}", key.source);
                Some(template)
            },
            None => {
                rows.remove(key);
                None
            },
        }
    }

    /// Remove every row that points at `template`.
    pub fn forget(&self, template: &FontTemplate) {
        self.forget_id(template.id());
    }

    pub(crate) fn forget_id(&self, template_id: FontTemplateId) {
        self.rows
            .lock()
            .retain(|_, row| row.template_id != template_id);
    }

    /// Remove all discardable rows.
    pub fn flush(&self) {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, row| row.persistence == EntryPersistence::Persistent);
        debug!("Flushed {} user font cache rows", before - rows.len());
    }

    /// Remove all rows belonging to private browsing, whatever their persistence.
    pub fn flush_private(&self) {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|key, _| !key.private);
        debug!("Flushed {} private user font cache rows", before - rows.len());
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Log every row.
    pub fn dump(&self) {
        let rows = self.rows.lock();
        debug!("User font cache: {} rows", rows.len());
        for (key, row) in rows.iter() {
            debug!(
                "  {:?} family={} private={} {:?} live={}",
                key.source,
                key.family_name,
                key.private,
                row.persistence,
                row.template.strong_count() > 0
            );
        }
    }
}
