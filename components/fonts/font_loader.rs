/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The services a [`crate::UserFontSet`] relies on but does not implement: fetching bytes,
//! reporting to the console and telling layout that fonts changed.

use log::{error, warn};

use crate::errors::FontLoadResult;
use crate::font_face_source::{FontFaceSource, Principal};
use crate::font_store::LowercaseFontFamilyName;
use crate::platform::PlatformFontFactory;
use crate::proxy_font_entry::ProxyFontEntryRef;
use crate::sanitizer::{FontSanitizer, OpenTypeSanitizer};

/// A download the loader is asked to perform for a `url()` source.
#[derive(Clone, Debug)]
pub struct FontLoadRequest {
    pub family_name: LowercaseFontFamilyName,
    /// The proxy to hand back to [`crate::UserFontSet::on_load_complete`].
    pub proxy: ProxyFontEntryRef,
    pub source: FontFaceSource,
    /// The principal the load is performed with.
    pub principal: Option<Principal>,
    pub private_browsing: bool,
}

/// The outcome of the security check that precedes every `url()` load.
#[derive(Clone, Debug, PartialEq)]
pub struct FontLoadPermission {
    /// The principal to load with, which is also the one used in the cache key.
    pub principal: Option<Principal>,
    /// Skip the cache lookup and force a fresh download.
    pub bypass_cache: bool,
}

/// How far along a download is, as reported by the embedder when the load timer fires.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoadProgress {
    pub bytes_received: u64,
    pub content_length: Option<u64>,
}

impl LoadProgress {
    /// The share of the declared length that has arrived, or `None` if the length is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.content_length {
            Some(length) if length > 0 => Some(self.bytes_received as f64 / length as f64),
            _ => None,
        }
    }
}

pub trait FontLoader {
    /// Decide whether `source` may be loaded, and with which principal. Returning `None`
    /// refuses the load; the proxy then moves on to its next source.
    fn check_font_load(
        &self,
        source: &FontFaceSource,
        document_principal: Option<&Principal>,
    ) -> Option<FontLoadPermission> {
        let FontFaceSource::Url {
            origin_principal,
            use_origin_principal,
            ..
        } = source
        else {
            return None;
        };
        let principal = if *use_origin_principal {
            origin_principal.clone()
        } else {
            document_principal.cloned()
        };
        Some(FontLoadPermission {
            principal,
            bypass_cache: false,
        })
    }

    /// Begin fetching the bytes of `request.source`. The result must be delivered exactly once
    /// through [`crate::UserFontSet::on_load_complete`], or never if the load is cancelled.
    /// An error return means the load could not be started at all.
    fn start_load(&self, request: FontLoadRequest) -> FontLoadResult<()>;

    /// Stop a load started for `proxy`. Called when the owning set is torn down.
    fn cancel_load(&self, proxy: &ProxyFontEntryRef);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageSeverity {
    Error,
    Warning,
}

/// A console message about one `@font-face` rule.
#[derive(Clone, Debug, PartialEq)]
pub struct FontMessage {
    pub family_name: LowercaseFontFamilyName,
    pub source_index: usize,
    pub source: String,
    pub text: String,
    pub severity: MessageSeverity,
}

/// Where user-facing messages about font loads go. Never influences loading.
pub trait FontDiagnostics {
    fn log_message(&self, message: FontMessage);
}

/// Forwards font messages to the `log` facade.
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl FontDiagnostics for LogDiagnostics {
    fn log_message(&self, message: FontMessage) {
        match message.severity {
            MessageSeverity::Error => error!(
                "downloadable font: {} (font-family: \"{}\" src index: {} source: {})",
                message.text, message.family_name, message.source_index, message.source
            ),
            MessageSeverity::Warning => warn!(
                "downloadable font: {} (font-family: \"{}\" src index: {} source: {})",
                message.text, message.family_name, message.source_index, message.source
            ),
        }
    }
}

/// Receives the invalidations produced by a user font set.
pub trait FontSetObserver {
    /// A face resolved or the local rules were rebuilt; `generation` is the new generation.
    fn user_font_set_updated(&self, generation: u64);

    /// Fallback text for `family_name` should now be drawn (a load failed or is slow).
    fn fallback_visibility_changed(&self, family_name: &LowercaseFontFamilyName);
}

/// Everything a user font set calls out to.
pub struct FontSetCollaborators {
    pub loader: Box<dyn FontLoader>,
    pub platform: Box<dyn PlatformFontFactory>,
    pub sanitizer: Box<dyn FontSanitizer>,
    pub diagnostics: Box<dyn FontDiagnostics>,
    pub observer: Box<dyn FontSetObserver>,
}

impl FontSetCollaborators {
    /// Collaborators with the built-in sanitizer and `log` diagnostics.
    pub fn new(
        loader: Box<dyn FontLoader>,
        platform: Box<dyn PlatformFontFactory>,
        observer: Box<dyn FontSetObserver>,
    ) -> Self {
        FontSetCollaborators {
            loader,
            platform,
            sanitizer: Box::new(OpenTypeSanitizer),
            diagnostics: Box::new(LogDiagnostics),
            observer,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Box<dyn FontSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Box<dyn FontDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let progress = LoadProgress {
            bytes_received: 30,
            content_length: Some(40),
        };
        assert_eq!(progress.fraction(), Some(0.75));
        assert_eq!(LoadProgress::default().fraction(), None);
        let empty = LoadProgress {
            bytes_received: 0,
            content_length: Some(0),
        };
        assert_eq!(empty.fraction(), None);
    }
}
