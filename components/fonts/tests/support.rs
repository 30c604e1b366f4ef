/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use fonts::{
    FontDiagnostics, FontFaceSource, FontFormatFlags, FontLoadPermission, FontLoadRequest,
    FontLoadResult, FontLoader, FontMessage, FontSanitizer, FontSetCollaborators, FontSetObserver,
    FontTemplateDescriptor, LocalFontIdentifier, LowercaseFontFamilyName, PlatformFontFactory,
    PlatformFontInfo, Principal, ProxyFontEntryRef, SanitizeError, SanitizedFont, UserFontCache,
    UserFontPrefs, UserFontSet,
};
use url::Url;
use write_fonts::FontBuilder;
use write_fonts::tables::cmap::Cmap;
use write_fonts::tables::head::Head;
use write_fonts::tables::maxp::Maxp;
use write_fonts::tables::name::{Name, NameRecord};
use write_fonts::types::{GlyphId, NameId, Tag};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared record of every call the mock collaborators receive, plus knobs to steer them.
#[derive(Default)]
pub struct Recorder {
    pub loads: RefCell<Vec<FontLoadRequest>>,
    pub cancelled: RefCell<Vec<ProxyFontEntryRef>>,
    pub generations: RefCell<Vec<u64>>,
    pub fallbacks: RefCell<Vec<LowercaseFontFamilyName>>,
    pub messages: RefCell<Vec<FontMessage>>,
    pub sanitize_calls: Cell<usize>,
    pub installed: RefCell<Vec<String>>,
    pub refuse_loads: Cell<bool>,
    pub bypass_cache: Cell<bool>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        Rc::new(Recorder::default())
    }

    pub fn install(&self, name: &str) {
        self.installed.borrow_mut().push(name.to_owned());
    }

    pub fn load_count(&self) -> usize {
        self.loads.borrow().len()
    }
}

struct MockLoader(Rc<Recorder>);

impl FontLoader for MockLoader {
    fn check_font_load(
        &self,
        _source: &FontFaceSource,
        document_principal: Option<&Principal>,
    ) -> Option<FontLoadPermission> {
        if self.0.refuse_loads.get() {
            return None;
        }
        Some(FontLoadPermission {
            principal: document_principal.cloned(),
            bypass_cache: self.0.bypass_cache.get(),
        })
    }

    fn start_load(&self, request: FontLoadRequest) -> FontLoadResult<()> {
        self.0.loads.borrow_mut().push(request);
        Ok(())
    }

    fn cancel_load(&self, proxy: &ProxyFontEntryRef) {
        self.0.cancelled.borrow_mut().push(proxy.clone());
    }
}

struct MockPlatform(Rc<Recorder>);

impl PlatformFontFactory for MockPlatform {
    fn find_local_font(
        &self,
        name: &str,
        _descriptor: &FontTemplateDescriptor,
    ) -> Option<(LocalFontIdentifier, PlatformFontInfo)> {
        if !self.0.installed.borrow().iter().any(|installed| installed == name) {
            return None;
        }
        let identifier = LocalFontIdentifier {
            name: name.to_owned(),
            path: Some(PathBuf::from(format!("/fonts/{name}.ttf"))),
            index: 0,
        };
        let info = PlatformFontInfo {
            real_name: name.to_owned(),
            char_coverage: None,
        };
        Some((identifier, info))
    }

    fn create_font_from_data(
        &self,
        data: &[u8],
        _descriptor: &FontTemplateDescriptor,
    ) -> Option<PlatformFontInfo> {
        if data == b"unusable" {
            return None;
        }
        Some(PlatformFontInfo {
            real_name: "Downloaded".into(),
            char_coverage: None,
        })
    }
}

/// Accepts anything that does not start with `bad`.
struct MockSanitizer(Rc<Recorder>);

impl FontSanitizer for MockSanitizer {
    fn sanitize(
        &self,
        data: &[u8],
        declared_format: FontFormatFlags,
    ) -> Result<SanitizedFont, SanitizeError> {
        self.0.sanitize_calls.set(self.0.sanitize_calls.get() + 1);
        if data.starts_with(b"bad") {
            return Err(SanitizeError::UnknownFormat);
        }
        Ok(SanitizedFont {
            data: data.to_vec(),
            format: declared_format,
            real_name: "Original Name".into(),
            ..Default::default()
        })
    }
}

struct MockObserver(Rc<Recorder>);

impl FontSetObserver for MockObserver {
    fn user_font_set_updated(&self, generation: u64) {
        self.0.generations.borrow_mut().push(generation);
    }

    fn fallback_visibility_changed(&self, family_name: &LowercaseFontFamilyName) {
        self.0.fallbacks.borrow_mut().push(family_name.clone());
    }
}

struct MockDiagnostics(Rc<Recorder>);

impl FontDiagnostics for MockDiagnostics {
    fn log_message(&self, message: FontMessage) {
        self.0.messages.borrow_mut().push(message);
    }
}

pub fn collaborators(recorder: &Rc<Recorder>) -> FontSetCollaborators {
    FontSetCollaborators::new(
        Box::new(MockLoader(recorder.clone())),
        Box::new(MockPlatform(recorder.clone())),
        Box::new(MockObserver(recorder.clone())),
    )
    .with_sanitizer(Box::new(MockSanitizer(recorder.clone())))
    .with_diagnostics(Box::new(MockDiagnostics(recorder.clone())))
}

pub fn document_principal() -> Principal {
    Principal::for_url(&Url::parse("https://page.example/index.html").unwrap())
}

pub fn font_set(recorder: &Rc<Recorder>, cache: &Arc<UserFontCache>, private: bool) -> UserFontSet {
    font_set_with_prefs(recorder, cache, private, UserFontPrefs::default())
}

pub fn font_set_with_prefs(
    recorder: &Rc<Recorder>,
    cache: &Arc<UserFontCache>,
    private: bool,
    prefs: UserFontPrefs,
) -> UserFontSet {
    init_logging();
    UserFontSet::new(
        Some(document_principal()),
        private,
        prefs,
        cache.clone(),
        collaborators(recorder),
    )
}

pub fn font_url(path: &str) -> Url {
    Url::parse("https://fonts.example/").unwrap().join(path).unwrap()
}

pub fn url_source(path: &str, format: &str) -> FontFaceSource {
    FontFaceSource::url(font_url(path)).with_format_hints([format])
}

fn name_table(full_name: &str) -> Name {
    let mut name = Name::default();
    // Windows, Unicode BMP, en-US.
    name.name_record.push(NameRecord::new(
        3,
        1,
        0x409,
        NameId::FULL_NAME,
        full_name.to_owned().into(),
    ));
    name
}

/// The tables of a minimal TrueType font named `full_name`, sorted by tag.
pub fn font_tables(full_name: &str) -> Vec<([u8; 4], Vec<u8>)> {
    let head = Head {
        units_per_em: 1000,
        ..Default::default()
    };
    let maxp = Maxp {
        num_glyphs: 2,
        ..Default::default()
    };
    let cmap = Cmap::from_mappings([('A', GlyphId::new(1))]).unwrap();
    vec![
        (*b"cmap", write_fonts::dump_table(&cmap).unwrap()),
        (*b"head", write_fonts::dump_table(&head).unwrap()),
        (*b"maxp", write_fonts::dump_table(&maxp).unwrap()),
        (*b"name", write_fonts::dump_table(&name_table(full_name)).unwrap()),
    ]
}

pub fn assemble_sfnt(tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let mut builder = FontBuilder::new();
    for (tag, data) in tables {
        builder.add_raw(Tag::new(tag), data.as_slice());
    }
    builder.build()
}

pub fn minimal_font(full_name: &str) -> Vec<u8> {
    assemble_sfnt(&font_tables(full_name))
}

/// The sfnt checksum of a table: the wrapping sum of its big endian words, zero padded.
fn table_checksum(data: &[u8]) -> u32 {
    data.chunks(4)
        .map(|chunk| {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .fold(0, u32::wrapping_add)
}

/// Wrap `tables` in WOFF 1.0, compressing every table that gets smaller.
pub fn assemble_woff(tables: &[([u8; 4], Vec<u8>)], metadata: &[u8]) -> Vec<u8> {
    let stored: Vec<Vec<u8>> = tables
        .iter()
        .map(|(_, data)| {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(data).unwrap();
            let compressed = encoder.finish().unwrap();
            if compressed.len() < data.len() {
                compressed
            } else {
                data.clone()
            }
        })
        .collect();

    let mut offset = 44 + 20 * tables.len();
    let mut directory = Vec::new();
    for ((tag, data), stored) in tables.iter().zip(stored.iter()) {
        directory.extend_from_slice(tag);
        for field in [offset, stored.len(), data.len()] {
            directory.extend_from_slice(&(field as u32).to_be_bytes());
        }
        directory.extend_from_slice(&table_checksum(data).to_be_bytes());
        offset += stored.len().next_multiple_of(4);
    }
    let meta_offset = if metadata.is_empty() { 0 } else { offset };
    let total_length = offset + metadata.len();

    let mut woff = b"wOFF".to_vec();
    woff.extend_from_slice(&0x00010000u32.to_be_bytes());
    woff.extend_from_slice(&(total_length as u32).to_be_bytes());
    woff.extend_from_slice(&(tables.len() as u16).to_be_bytes());
    woff.extend_from_slice(&0u16.to_be_bytes());
    woff.extend_from_slice(&0u32.to_be_bytes());
    woff.extend_from_slice(&1u16.to_be_bytes());
    woff.extend_from_slice(&0u16.to_be_bytes());
    woff.extend_from_slice(&(meta_offset as u32).to_be_bytes());
    woff.extend_from_slice(&(metadata.len() as u32).to_be_bytes());
    woff.extend_from_slice(&((metadata.len() * 4) as u32).to_be_bytes());
    woff.extend_from_slice(&0u32.to_be_bytes());
    woff.extend_from_slice(&0u32.to_be_bytes());
    woff.extend_from_slice(&directory);
    for stored in stored {
        woff.extend_from_slice(&stored);
        woff.resize(woff.len().next_multiple_of(4), 0);
    }
    woff.extend_from_slice(metadata);
    woff
}
