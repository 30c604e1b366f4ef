/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ops::RangeInclusive;

use crate::font_face_source::FontFormatFlags;
use crate::font_template::{FontTemplateDescriptor, LocalFontIdentifier};

/// What the platform backend reports about a font it accepted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlatformFontInfo {
    /// The full name of the font as the platform sees it.
    pub real_name: String,
    /// The code points the font has glyphs for, if the backend computed them.
    pub char_coverage: Option<Vec<RangeInclusive<u32>>>,
}

/// The platform font backend: turns installed fonts and sanitized data into fonts it can
/// render. Rasterization and shaping happen behind this trait.
pub trait PlatformFontFactory {
    /// Look up an installed font by full or PostScript name for a `local()` source.
    fn find_local_font(
        &self,
        name: &str,
        descriptor: &FontTemplateDescriptor,
    ) -> Option<(LocalFontIdentifier, PlatformFontInfo)>;

    /// Activate sanitized sfnt data. Returning `None` makes the source count as failed.
    fn create_font_from_data(
        &self,
        data: &[u8],
        descriptor: &FontTemplateDescriptor,
    ) -> Option<PlatformFontInfo>;

    /// The `format()` hints this backend can handle once the sanitizer has run.
    fn supported_formats(&self) -> FontFormatFlags {
        FontFormatFlags::OPENTYPE | FontFormatFlags::TRUETYPE | FontFormatFlags::WOFF
    }
}
