/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

bitflags! {
    /// Format hints from the `format()` part of a `src` descriptor. No flags means no hint
    /// was given and the data itself has to be inspected.
    #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct FontFormatFlags: u32 {
        const UNKNOWN = 1;
        const OPENTYPE = 1 << 1;
        const TRUETYPE = 1 << 2;
        const TRUETYPE_AAT = 1 << 3;
        const EOT = 1 << 4;
        const SVG = 1 << 5;
        const WOFF = 1 << 6;
        const WOFF2 = 1 << 7;
    }
}

impl Default for FontFormatFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl FontFormatFlags {
    /// Map a single CSS `format()` string to its flag.
    pub fn from_format_hint(hint: &str) -> Self {
        match hint.to_ascii_lowercase().as_str() {
            "woff" => Self::WOFF,
            "woff2" => Self::WOFF2,
            "opentype" => Self::OPENTYPE,
            "truetype" => Self::TRUETYPE,
            "truetype-aat" => Self::TRUETYPE_AAT,
            "embedded-opentype" => Self::EOT,
            "svg" => Self::SVG,
            _ => Self::UNKNOWN,
        }
    }

    /// Whether a source carrying these hints may be fetched given the formats we can decode.
    pub fn is_supported_by(self, supported: FontFormatFlags) -> bool {
        // Bits we have never assigned mean the hint list is corrupt.
        if self.bits() & !Self::all().bits() != 0 {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        self.intersects(supported)
    }
}

/// The security principal a font is loaded on behalf of. Two principals are equal only when
/// their origins are; opaque origins (for example from `data:` or `file:` URLs) are only ever
/// equal to themselves.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Principal {
    origin: Origin,
}

impl Principal {
    pub fn new(origin: Origin) -> Self {
        Principal { origin }
    }

    pub fn for_url(url: &Url) -> Self {
        Principal {
            origin: url.origin(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

/// One entry of the `src` descriptor of an `@font-face` rule.
///
/// Two `local()` sources are equal when they name the same font. Two `url()` sources are equal
/// when the URL, referrer, origin principal, format hints and principal choice all match.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FontFaceSource {
    Local {
        name: String,
    },
    Url {
        url: Url,
        referrer: Option<Url>,
        origin_principal: Option<Principal>,
        use_origin_principal: bool,
        format_flags: FontFormatFlags,
    },
}

impl FontFaceSource {
    pub fn local(name: &str) -> Self {
        FontFaceSource::Local {
            name: name.to_owned(),
        }
    }

    pub fn url(url: Url) -> Self {
        FontFaceSource::Url {
            url,
            referrer: None,
            origin_principal: None,
            use_origin_principal: false,
            format_flags: FontFormatFlags::empty(),
        }
    }

    /// Add the hints of a `format(...)` list. Ignored for `local()` sources.
    pub fn with_format_hints<'a>(mut self, hints: impl IntoIterator<Item = &'a str>) -> Self {
        if let FontFaceSource::Url {
            ref mut format_flags,
            ..
        } = self
        {
            for hint in hints {
                *format_flags |= FontFormatFlags::from_format_hint(hint);
            }
        }
        self
    }

    pub fn with_format_flags(mut self, flags: FontFormatFlags) -> Self {
        if let FontFaceSource::Url {
            ref mut format_flags,
            ..
        } = self
        {
            *format_flags = flags;
        }
        self
    }

    pub fn with_referrer(mut self, new_referrer: Url) -> Self {
        if let FontFaceSource::Url {
            ref mut referrer, ..
        } = self
        {
            *referrer = Some(new_referrer);
        }
        self
    }

    /// Load this source with the principal of the style sheet that declared it rather than
    /// the principal of the document.
    pub fn with_origin_principal(mut self, principal: Principal) -> Self {
        if let FontFaceSource::Url {
            ref mut origin_principal,
            ref mut use_origin_principal,
            ..
        } = self
        {
            *origin_principal = Some(principal);
            *use_origin_principal = true;
        }
        self
    }

    pub fn is_local(&self) -> bool {
        matches!(self, FontFaceSource::Local { .. })
    }

    pub fn local_name(&self) -> Option<&str> {
        match self {
            FontFaceSource::Local { name } => Some(name),
            FontFaceSource::Url { .. } => None,
        }
    }

    pub fn url_value(&self) -> Option<&Url> {
        match self {
            FontFaceSource::Local { .. } => None,
            FontFaceSource::Url { url, .. } => Some(url),
        }
    }

    pub fn format_flags(&self) -> FontFormatFlags {
        match self {
            FontFaceSource::Local { .. } => FontFormatFlags::empty(),
            FontFaceSource::Url { format_flags, .. } => *format_flags,
        }
    }

    /// `data:` sources are decoded in-process instead of going through the loader.
    pub fn is_data_url(&self) -> bool {
        self.url_value().is_some_and(|url| url.scheme() == "data")
    }

    /// A short description used in log and console messages.
    pub fn describe(&self) -> String {
        match self {
            FontFaceSource::Local { name } => format!("local(\"{name}\")"),
            FontFaceSource::Url { url, .. } if url.scheme() == "data" => "url(data:...)".into(),
            FontFaceSource::Url { url, .. } => format!("url(\"{url}\")"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_support() {
        let supported = FontFormatFlags::OPENTYPE | FontFormatFlags::TRUETYPE;
        assert!(FontFormatFlags::empty().is_supported_by(supported));
        assert!(FontFormatFlags::TRUETYPE.is_supported_by(supported));
        assert!((FontFormatFlags::EOT | FontFormatFlags::OPENTYPE).is_supported_by(supported));
        assert!(!FontFormatFlags::EOT.is_supported_by(supported));
        assert!(!FontFormatFlags::UNKNOWN.is_supported_by(supported));
        assert!(!FontFormatFlags::from_bits_retain(1 << 20).is_supported_by(supported));
    }

    #[test]
    fn test_source_equality() {
        let url = Url::parse("https://fonts.example/a.woff").unwrap();
        assert_eq!(FontFaceSource::local("Bar"), FontFaceSource::local("Bar"));
        assert_ne!(FontFaceSource::local("Bar"), FontFaceSource::local("Baz"));
        assert_eq!(
            FontFaceSource::url(url.clone()).with_format_hints(["woff"]),
            FontFaceSource::url(url.clone()).with_format_hints(["woff"]),
        );
        assert_ne!(
            FontFaceSource::url(url.clone()).with_format_hints(["woff"]),
            FontFaceSource::url(url.clone()).with_format_hints(["truetype"]),
        );
        let principal = Principal::for_url(&Url::parse("https://page.example/").unwrap());
        assert_ne!(
            FontFaceSource::url(url.clone()),
            FontFaceSource::url(url).with_origin_principal(principal),
        );
    }

    #[test]
    fn test_opaque_principals_are_only_equal_to_themselves() {
        let data = Url::parse("data:font/ttf;base64,AAAA").unwrap();
        let first = Principal::for_url(&data);
        let second = Principal::for_url(&data);
        assert_eq!(first, first.clone());
        assert_ne!(first, second);
    }
}
