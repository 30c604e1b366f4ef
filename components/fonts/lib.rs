/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Downloadable font support: `@font-face` rules are turned into proxies that try their
//! sources in order, swap themselves for the resulting font once one works, and share decoded
//! fonts between documents through a process-wide cache.

mod errors;
mod font_face_source;
mod font_loader;
mod font_store;
mod font_template;
mod platform;
mod prefs;
mod proxy_font_entry;
mod sanitizer;
mod user_font_cache;
mod user_font_set;

pub use errors::*;
pub use font_face_source::*;
pub use font_loader::*;
pub use font_store::*;
pub use font_template::*;
pub use platform::*;
pub use prefs::*;
pub use proxy_font_entry::{LoadStatus, LoadingState, ProxyFontEntry, ProxyFontEntryRef};
pub use sanitizer::*;
pub use user_font_cache::*;
pub use user_font_set::*;
