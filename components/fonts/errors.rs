/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

/// Convenient type alias of `Result` type for user font loading.
pub type FontLoadResult<T> = Result<T, FontLoadError>;

/// Errors produced while resolving an `@font-face` rule into a usable font.
///
/// Everything but [`FontLoadError::InternalConsistency`] is a source-level failure: the proxy
/// recovers by moving on to the next source in its list, and only running out of sources is
/// visible to layout (as the fallback font).
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FontLoadError {
    /// No installed font matched a `local()` source.
    #[error("no installed font matches local(\"{0}\")")]
    LocalFontNotFound(String),
    /// The transfer of a `url()` source failed or was refused by the loader.
    #[error("download failed for {url}: {reason}")]
    LoadFailed { url: String, reason: String },
    /// The downloaded bytes were rejected by the sanitizer or unusable by the platform.
    #[error("invalid font data from {url}: {reason}")]
    ValidationFailed { url: String, reason: String },
    /// The format hint of a `url()` source is not one we can decode.
    #[error("format not supported for {0}")]
    FormatNotSupported(String),
    /// The loader refused to fetch this source at all (disabled fonts, security check).
    #[error("download not allowed for {0}")]
    LoadBlocked(String),
    /// A caller broke an invariant of the font set, for example replacing an entry that is
    /// not in the family.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),
}

impl FontLoadError {
    /// Whether this failure should make the proxy try its next source.
    pub fn is_source_level(&self) -> bool {
        !matches!(self, FontLoadError::InternalConsistency(_))
    }
}
