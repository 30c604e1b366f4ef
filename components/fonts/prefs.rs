/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Preferences that govern downloadable fonts. Read from the `fonts` block of the embedder's
//! JSON preferences; missing keys keep their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::font_face_source::FontFormatFlags;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct UserFontPrefs {
    /// When false, `url()` sources are never fetched and only `local()` sources can resolve.
    pub downloadable_fonts_enabled: bool,

    /// How long text using a loading font stays invisible before the fallback font is shown,
    /// in milliseconds.
    pub fallback_delay_ms: u64,

    /// A load that has received more than this share of its declared length when the fallback
    /// timer fires is given half the delay again before the fallback becomes visible.
    pub almost_done_fraction: f64,

    /// The `format()` hints that are accepted.
    pub supported_formats: FontFormatFlags,
}

impl Default for UserFontPrefs {
    fn default() -> Self {
        UserFontPrefs {
            downloadable_fonts_enabled: true,
            fallback_delay_ms: 3000,
            almost_done_fraction: 0.75,
            supported_formats: FontFormatFlags::OPENTYPE |
                FontFormatFlags::TRUETYPE |
                FontFormatFlags::WOFF,
        }
    }
}

impl UserFontPrefs {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_keep_defaults() {
        let prefs = UserFontPrefs::from_json(r#"{ "fallback_delay_ms": 100 }"#).unwrap();
        assert_eq!(prefs.fallback_delay(), Duration::from_millis(100));
        assert!(prefs.downloadable_fonts_enabled);
        assert_eq!(prefs.almost_done_fraction, 0.75);
        assert_eq!(prefs.supported_formats, UserFontPrefs::default().supported_formats);
    }

    #[test]
    fn test_disable_downloads() {
        let prefs = UserFontPrefs::from_json(r#"{ "downloadable_fonts_enabled": false }"#).unwrap();
        assert!(!prefs.downloadable_fonts_enabled);
        assert!(UserFontPrefs::from_json("[]").is_err());
    }
}
