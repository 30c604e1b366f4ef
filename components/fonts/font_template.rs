/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::{Debug, Error, Formatter};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::font_face_source::{FontFormatFlags, Principal};
use crate::platform::PlatformFontInfo;
use crate::user_font_cache::UserFontCache;

/// A reference to a resolved [`FontTemplate`] with shared ownership. The same template may sit
/// in several families of several font sets at once.
pub type FontTemplateRef = Arc<FontTemplate>;

/// The weight of a face, in CSS units (1 to 1000).
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const BOLD: FontWeight = FontWeight(700);
    /// Faces at or above this weight are considered bold; lighter ones get synthetic bold
    /// when bold is requested.
    pub const BOLD_THRESHOLD: FontWeight = FontWeight(600);

    fn value(&self) -> f32 {
        self.0 as f32
    }
}

impl Default for FontWeight {
    fn default() -> Self {
        FontWeight::NORMAL
    }
}

/// The width of a face as a percentage of normal (50 to 200).
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct FontStretch(pub u16);

impl FontStretch {
    pub const ULTRA_CONDENSED: FontStretch = FontStretch(50);
    pub const CONDENSED: FontStretch = FontStretch(75);
    pub const NORMAL: FontStretch = FontStretch(100);
    pub const EXPANDED: FontStretch = FontStretch(125);
    pub const ULTRA_EXPANDED: FontStretch = FontStretch(200);

    fn value(&self) -> f32 {
        self.0 as f32
    }
}

impl Default for FontStretch {
    fn default() -> Self {
        FontStretch::NORMAL
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    /// Oblique with an angle in degrees.
    Oblique(i16),
}

impl FontStyle {
    pub const DEFAULT_OBLIQUE_DEGREES: i16 = 14;

    pub fn is_oblique(&self) -> bool {
        matches!(self, FontStyle::Oblique(_))
    }

    fn oblique_degrees(&self) -> f32 {
        match *self {
            FontStyle::Normal => 0.,
            FontStyle::Italic => Self::DEFAULT_OBLIQUE_DEGREES as f32,
            FontStyle::Oblique(angle) => angle as f32,
        }
    }
}

/// One `font-feature-settings` entry, e.g. `"liga" 0`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FontFeature {
    pub tag: [u8; 4],
    pub value: u32,
}

impl FontFeature {
    pub fn new(tag: &[u8; 4], value: u32) -> Self {
        FontFeature { tag: *tag, value }
    }
}

/// The style attributes declared by an `@font-face` rule. These travel with the proxy and are
/// copied onto the template that replaces it, and they take part in user font cache keys, since
/// the same bytes loaded for two different declared styles must not be shared.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FontTemplateDescriptor {
    pub weight: (FontWeight, FontWeight),
    pub stretch: (FontStretch, FontStretch),
    pub style: FontStyle,
    pub feature_settings: Vec<FontFeature>,
    /// OpenType language system tag packed into a `u32`, or 0 for none.
    pub language_override: u32,
    pub unicode_range: Option<Vec<RangeInclusive<u32>>>,
}

impl FontTemplateDescriptor {
    #[inline]
    pub fn new(weight: FontWeight, stretch: FontStretch, style: FontStyle) -> Self {
        Self {
            weight: (weight, weight),
            stretch: (stretch, stretch),
            style,
            ..Default::default()
        }
    }

    pub fn with_weight_range(mut self, min: FontWeight, max: FontWeight) -> Self {
        self.weight = (min, max);
        self
    }

    pub fn with_feature_settings(mut self, feature_settings: Vec<FontFeature>) -> Self {
        self.feature_settings = feature_settings;
        self
    }

    pub fn with_language_override(mut self, language_override: u32) -> Self {
        self.language_override = language_override;
        self
    }

    pub fn with_unicode_range(mut self, ranges: Vec<RangeInclusive<u32>>) -> Self {
        self.unicode_range = Some(ranges);
        self
    }

    pub fn is_variation_font(&self) -> bool {
        self.weight.0 != self.weight.1 || self.stretch.0 != self.stretch.1
    }

    /// Whether bold has to be synthesized when this face is used for `descriptor_to_match`.
    pub fn needs_synthetic_bold(&self, descriptor_to_match: &FontDescriptor) -> bool {
        descriptor_to_match.weight >= FontWeight::BOLD_THRESHOLD &&
            self.weight.1 < FontWeight::BOLD_THRESHOLD
    }

    /// Whether the `unicode-range` of this rule, if any, admits `character`.
    pub fn char_in_unicode_range(&self, character: char) -> bool {
        let character = character as u32;
        self.unicode_range.as_ref().is_none_or(|ranges| {
            ranges.iter().any(|range| range.contains(&character))
        })
    }

    /// Returns a score indicating how far apart visually the two font descriptors are. This is
    /// used for implementing the CSS Font Matching algorithm:
    /// <https://drafts.csswg.org/css-fonts/#font-matching-algorithm>.
    ///
    /// The smaller the score, the better the fonts match. 0 indicates an exact match.
    #[inline]
    pub fn distance_from(&self, target: &FontDescriptor) -> f32 {
        let stretch_distance = target.stretch.match_distance(&self.stretch);
        let style_distance = target.style.match_distance(&(self.style, self.style));
        let weight_distance = target.weight.match_distance(&self.weight);

        // Factors used to weight the distances between the available and target font
        // properties during font-matching. These ensure that we respect the CSS-fonts
        // requirement that font-stretch >> font-style >> font-weight.
        const STRETCH_FACTOR: f32 = 1.0e8;
        const STYLE_FACTOR: f32 = 1.0e4;
        const WEIGHT_FACTOR: f32 = 1.0e0;

        stretch_distance * STRETCH_FACTOR +
            style_distance * STYLE_FACTOR +
            weight_distance * WEIGHT_FACTOR
    }
}

/// The style that layout asks a family for.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FontDescriptor {
    pub weight: FontWeight,
    pub stretch: FontStretch,
    pub style: FontStyle,
}

impl FontDescriptor {
    pub fn new(weight: FontWeight, stretch: FontStretch, style: FontStyle) -> Self {
        FontDescriptor {
            weight,
            stretch,
            style,
        }
    }
}

/// An installed font found through a `local()` source.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct LocalFontIdentifier {
    /// The full or PostScript name that matched.
    pub name: String,
    pub path: Option<PathBuf>,
    /// Index within a collection file.
    pub index: u32,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FontIdentifier {
    Local(LocalFontIdentifier),
    Web(Url),
    /// Bytes without a fetchable URL: `data:` sources and buffers handed in by the embedder.
    Data { crc32: u32, length: u32 },
}

/// Where a resolved user font came from. Used for cache keys and for reporting on the face.
#[derive(Clone, Debug, Default)]
pub struct UserFontData {
    /// Index in the rule's source list of the source that succeeded.
    pub source_index: usize,
    /// Format hint of that source, if any.
    pub format: FontFormatFlags,
    /// URL of the source, if it was `url()`.
    pub url: Option<Url>,
    /// Principal used for the download, if `url()` and not `data:`.
    pub principal: Option<Principal>,
    /// Font name used for the source, if `local()`.
    pub local_name: Option<String>,
    /// Original full name from the font resource, before the platform touched it.
    pub real_name: String,
    /// WOFF metadata block (compressed), if any.
    pub metadata: Vec<u8>,
    /// Length needed to decompress [`UserFontData::metadata`].
    pub metadata_original_length: u32,
    /// CRC-32 of the downloaded bytes.
    pub crc32: u32,
    /// Length of the downloaded bytes.
    pub length: u32,
    /// Whether the font belongs to a private browsing context.
    pub private: bool,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FontTemplateId(u64);

static NEXT_FONT_TEMPLATE_ID: AtomicU64 = AtomicU64::new(1);

impl FontTemplateId {
    fn next() -> Self {
        FontTemplateId(NEXT_FONT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A font that is ready for the platform to render: a `local()` match or sanitized downloaded
/// data, plus the `@font-face` descriptors it was declared with.
pub struct FontTemplate {
    id: FontTemplateId,
    family_name: String,
    identifier: FontIdentifier,
    descriptor: FontTemplateDescriptor,
    /// Sanitized sfnt bytes. Always filled for downloaded fonts, empty for local ones.
    data: Option<Arc<Vec<u8>>>,
    platform_info: PlatformFontInfo,
    user_font_data: Option<UserFontData>,
    /// Caches holding rows for this template. They must hear about it before it goes away.
    caches: Mutex<Vec<Weak<UserFontCache>>>,
}

impl Debug for FontTemplate {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        f.debug_struct("FontTemplate")
            .field("id", &self.id)
            .field("family_name", &self.family_name)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl FontTemplate {
    /// Create a new [`FontTemplate`] for an installed font matched by a `local()` source.
    pub fn new_for_local_font(
        family_name: &str,
        identifier: LocalFontIdentifier,
        platform_info: PlatformFontInfo,
        descriptor: FontTemplateDescriptor,
        user_font_data: Option<UserFontData>,
    ) -> FontTemplateRef {
        Arc::new(FontTemplate {
            id: FontTemplateId::next(),
            family_name: family_name.to_owned(),
            identifier: FontIdentifier::Local(identifier),
            descriptor,
            data: None,
            platform_info,
            user_font_data,
            caches: Mutex::new(Vec::new()),
        })
    }

    /// Create a new [`FontTemplate`] for sanitized font data.
    pub fn new_for_web_font(
        family_name: &str,
        identifier: FontIdentifier,
        data: Arc<Vec<u8>>,
        platform_info: PlatformFontInfo,
        descriptor: FontTemplateDescriptor,
        user_font_data: Option<UserFontData>,
    ) -> FontTemplateRef {
        Arc::new(FontTemplate {
            id: FontTemplateId::next(),
            family_name: family_name.to_owned(),
            identifier,
            descriptor,
            data: Some(data),
            platform_info,
            user_font_data,
            caches: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> FontTemplateId {
        self.id
    }

    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    pub fn identifier(&self) -> &FontIdentifier {
        &self.identifier
    }

    pub fn descriptor(&self) -> &FontTemplateDescriptor {
        &self.descriptor
    }

    pub fn user_font_data(&self) -> Option<&UserFontData> {
        self.user_font_data.as_ref()
    }

    pub fn platform_info(&self) -> &PlatformFontInfo {
        &self.platform_info
    }

    /// The name the font itself carries, which may differ from the family it is used for.
    pub fn real_name(&self) -> &str {
        &self.platform_info.real_name
    }

    pub fn is_private(&self) -> bool {
        self.user_font_data.as_ref().is_some_and(|data| data.private)
    }

    /// Returns a reference to the bytes in this font if they are in memory.
    /// This function never performs disk I/O.
    pub fn data_if_in_memory(&self) -> Option<Arc<Vec<u8>>> {
        self.data.clone()
    }

    /// Whether this face can be used for `character`: inside the declared `unicode-range`
    /// and, when the platform reported one, inside the font's character coverage.
    pub fn has_char(&self, character: char) -> bool {
        if !self.descriptor.char_in_unicode_range(character) {
            return false;
        }
        let character = character as u32;
        self.platform_info
            .char_coverage
            .as_ref()
            .is_none_or(|ranges| ranges.iter().any(|range| range.contains(&character)))
    }

    pub(crate) fn note_cached_in(&self, cache: &Arc<UserFontCache>) {
        let mut caches = self.caches.lock();
        caches.retain(|weak| weak.strong_count() > 0);
        if !caches
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(cache)))
        {
            caches.push(Arc::downgrade(cache));
        }
    }
}

impl Drop for FontTemplate {
    fn drop(&mut self) {
        // No cache row may outlive the template it points at.
        for cache in self.caches.get_mut().drain(..) {
            if let Some(cache) = cache.upgrade() {
                debug!("Dropping {:?}, removing it from the user font cache", self.id);
                cache.forget_id(self.id);
            }
        }
    }
}

/// A trait for implementing the CSS font matching algorithm against various font features.
/// See <https://drafts.csswg.org/css-fonts/#font-matching-algorithm>.
///
/// This implementation is ported from Gecko at:
/// <https://searchfox.org/mozilla-central/rev/0529464f0d2981347ef581f7521ace8b7af7f7ac/gfx/thebes/gfxFontUtils.h#1217>.
trait FontMatchDistanceMethod: Sized {
    fn match_distance(&self, range: &(Self, Self)) -> f32;
}

impl FontMatchDistanceMethod for FontStretch {
    fn match_distance(&self, range: &(Self, Self)) -> f32 {
        // stretch distance ==> [0,2000]
        const REVERSE_DISTANCE: f32 = 1000.0;

        let (min_stretch, max_stretch) = *range;

        // If the target is wider than normal we prefer wider faces if available;
        // otherwise we prefer narrower ones.
        if *self < min_stretch {
            if *self > FontStretch::NORMAL {
                return min_stretch.value() - self.value();
            }
            return (min_stretch.value() - self.value()) + REVERSE_DISTANCE;
        }

        if *self > max_stretch {
            if *self <= FontStretch::NORMAL {
                return self.value() - max_stretch.value();
            }
            return (self.value() - max_stretch.value()) + REVERSE_DISTANCE;
        }
        0.0
    }
}

impl FontMatchDistanceMethod for FontWeight {
    // Heavier weights match towards even heavier weights while lighter weights match towards
    // even lighter weights. Target weights in [400..500] first match up to 500, then down
    // towards 0, then up again towards 1000.
    fn match_distance(&self, range: &(Self, Self)) -> f32 {
        // weight distance ==> [0,1600]
        const NOT_WITHIN_CENTRAL_RANGE: f32 = 100.0;
        const REVERSE_DISTANCE: f32 = 600.0;

        let (min_weight, max_weight) = *range;

        if *self >= min_weight && *self <= max_weight {
            return 0.0;
        }

        if *self < FontWeight::NORMAL {
            if max_weight < *self {
                return self.value() - max_weight.value();
            }
            return (min_weight.value() - self.value()) + REVERSE_DISTANCE;
        }

        if *self > FontWeight(500) {
            if min_weight > *self {
                return min_weight.value() - self.value();
            }
            return (self.value() - max_weight.value()) + REVERSE_DISTANCE;
        }

        if min_weight > *self {
            if min_weight <= FontWeight(500) {
                return min_weight.value() - self.value();
            }
            return (min_weight.value() - self.value()) + REVERSE_DISTANCE;
        }
        (self.value() - max_weight.value()) + NOT_WITHIN_CENTRAL_RANGE
    }
}

impl FontMatchDistanceMethod for FontStyle {
    fn match_distance(&self, range: &(Self, Self)) -> f32 {
        // style distance ==> [0,500]
        let (min_style, max_style) = *range;
        if *self == min_style {
            return 0.0;
        }

        // bias added to angle difference when searching in the non-preferred
        // direction from a target angle
        const REVERSE: f32 = 100.0;

        // bias added when we've crossed from positive to negative angles or
        // vice versa
        const NEGATE: f32 = 200.0;

        let default_oblique_angle = FontStyle::DEFAULT_OBLIQUE_DEGREES as f32;

        match *self {
            FontStyle::Normal => {
                if min_style.is_oblique() {
                    // to distinguish oblique 0deg from normal, we add 1.0 to the angle
                    let min_angle = min_style.oblique_degrees();
                    if min_angle >= 0.0 {
                        return 1.0 + min_angle;
                    }
                    let max_angle = max_style.oblique_degrees();
                    if max_angle >= 0.0 {
                        return 1.0;
                    }
                    return NEGATE - max_angle;
                }
                // italic is worse than any non-negative oblique
                REVERSE
            },
            FontStyle::Italic => {
                if min_style.is_oblique() {
                    let min_angle = min_style.oblique_degrees();
                    if min_angle >= default_oblique_angle {
                        return 1.0 + (min_angle - default_oblique_angle);
                    }
                    let max_angle = max_style.oblique_degrees();
                    if max_angle >= default_oblique_angle {
                        return 1.0;
                    }
                    if max_angle > 0.0 {
                        return REVERSE + (default_oblique_angle - max_angle);
                    }
                    return REVERSE + NEGATE + (default_oblique_angle - max_angle);
                }
                // normal is worse than oblique > 0, but better than oblique <= 0
                NEGATE
            },
            FontStyle::Oblique(_) => {
                let target_angle = self.oblique_degrees();
                if !min_style.is_oblique() {
                    let italic_bias = if min_style == FontStyle::Italic { 0.0 } else { 1.0 };
                    if target_angle >= default_oblique_angle ||
                        target_angle <= -default_oblique_angle
                    {
                        return REVERSE + NEGATE + italic_bias;
                    }
                    return REVERSE + NEGATE - 2.0 + italic_bias;
                }

                let min_angle = min_style.oblique_degrees();
                let max_angle = max_style.oblique_degrees();

                // The preferred search direction depends on which of four bands the target
                // angle falls into.
                if target_angle >= default_oblique_angle {
                    if min_angle >= target_angle {
                        return min_angle - target_angle;
                    }
                    if max_angle >= target_angle {
                        return 0.0;
                    }
                    if max_angle > 0.0 {
                        return REVERSE + (target_angle - max_angle);
                    }
                    return REVERSE + NEGATE + (target_angle - max_angle);
                }

                if target_angle <= -default_oblique_angle {
                    if max_angle <= target_angle {
                        return target_angle - max_angle;
                    }
                    if min_angle <= target_angle {
                        return 0.0;
                    }
                    if min_angle < 0.0 {
                        return REVERSE + (min_angle - target_angle);
                    }
                    return REVERSE + NEGATE + (min_angle - target_angle);
                }

                if target_angle >= 0.0 {
                    if min_angle > target_angle {
                        return REVERSE + (min_angle - target_angle);
                    }
                    if max_angle >= target_angle {
                        return 0.0;
                    }
                    if max_angle > 0.0 {
                        return target_angle - max_angle;
                    }
                    return REVERSE + NEGATE + (target_angle - max_angle);
                }

                // Small negative angles.
                if max_angle < target_angle {
                    return REVERSE + (target_angle - max_angle);
                }
                if min_angle <= target_angle {
                    return 0.0;
                }
                if min_angle < 0.0 {
                    return min_angle - target_angle;
                }
                REVERSE + NEGATE + (min_angle - target_angle)
            },
        }
    }
}
