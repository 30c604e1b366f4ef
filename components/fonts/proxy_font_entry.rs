/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::{Debug, Error, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use atomic_refcell::AtomicRefCell;
use data_url::DataUrl;
use log::{debug, warn};

use crate::errors::{FontLoadError, FontLoadResult};
use crate::font_face_source::{FontFaceSource, FontFormatFlags, Principal};
use crate::font_loader::{FontLoadRequest, FontMessage, FontSetCollaborators, MessageSeverity};
use crate::font_store::{FamilyEntry, FontFaceFamily, LowercaseFontFamilyName};
use crate::font_template::{
    FontIdentifier, FontTemplate, FontTemplateDescriptor, FontTemplateRef, UserFontData,
};
use crate::prefs::UserFontPrefs;
use crate::user_font_cache::{EntryPersistence, UserFontCache, UserFontCacheKey};

/// A reference to a [`ProxyFontEntry`] shared between its font set, its family and the loader.
pub type ProxyFontEntryRef = Arc<AtomicRefCell<ProxyFontEntry>>;

/// How far a proxy has come. The order is meaningful: later states compare greater.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum LoadingState {
    /// No source has been tried yet.
    NotLoading,
    /// A download is in progress and the fallback is hidden.
    LoadingStarted,
    /// The fallback timer fired but most of the data had arrived, so it keeps hiding.
    LoadingAlmostDone,
    /// The fallback timer fired and the fallback font is now visible.
    LoadingSlowly,
    Loaded,
    /// Every source was skipped for its format.
    FormatNotSupported,
    /// Every source failed.
    Error,
}

impl LoadingState {
    pub fn is_loading(self) -> bool {
        self > LoadingState::NotLoading && self < LoadingState::Loaded
    }

    pub fn is_finished(self) -> bool {
        self >= LoadingState::Loaded
    }

    /// Whether text should stay invisible rather than draw with the fallback font.
    pub fn should_wait_for_load(self) -> bool {
        self.is_loading() && self < LoadingState::LoadingSlowly
    }
}

/// The result of trying sources until one resolves or suspends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadStatus {
    /// Waiting for the loader to deliver a `url()` source.
    Loading,
    /// The proxy was replaced by a resolved font.
    Loaded,
    /// No source is left.
    EndOfList,
}

static NEXT_FONT_SET_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of a live user font set. Proxies hold it weakly, so once the set is torn down the
/// proxies it created can tell that their completions are stale.
#[derive(Debug)]
pub(crate) struct FontSetHandle {
    id: usize,
}

impl FontSetHandle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FontSetHandle {
            id: NEXT_FONT_SET_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

/// The stand-in for one `@font-face` rule while its sources are tried in order. Once a source
/// works, the proxy is swapped for the resulting [`FontTemplate`] in its family.
pub struct ProxyFontEntry {
    owner: Weak<FontSetHandle>,
    family_name: LowercaseFontFamilyName,
    sources: Vec<FontFaceSource>,
    /// Index of the source being tried. Never decreases and never exceeds `sources.len()`.
    source_index: usize,
    descriptor: FontTemplateDescriptor,
    loading_state: LoadingState,
    /// Some source was skipped because of its format hint.
    unsupported_format: bool,
    /// Some source failed for a reason other than its format hint.
    saw_failure: bool,
    used_local_rule: bool,
    failed_attempts: usize,
    /// Principal of the download in flight.
    load_principal: Option<Principal>,
    resolved: Option<FontTemplateRef>,
}

impl Debug for ProxyFontEntry {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        f.debug_struct("ProxyFontEntry")
            .field("family_name", &self.family_name)
            .field("source_index", &self.source_index)
            .field("sources", &self.sources.len())
            .field("loading_state", &self.loading_state)
            .finish_non_exhaustive()
    }
}

impl ProxyFontEntry {
    pub(crate) fn new_ref(
        owner: &Arc<FontSetHandle>,
        family_name: LowercaseFontFamilyName,
        sources: Vec<FontFaceSource>,
        descriptor: FontTemplateDescriptor,
    ) -> ProxyFontEntryRef {
        Arc::new(AtomicRefCell::new(ProxyFontEntry {
            owner: Arc::downgrade(owner),
            family_name,
            sources,
            source_index: 0,
            descriptor,
            loading_state: LoadingState::NotLoading,
            unsupported_format: false,
            saw_failure: false,
            used_local_rule: false,
            failed_attempts: 0,
            load_principal: None,
            resolved: None,
        }))
    }

    pub fn family_name(&self) -> &LowercaseFontFamilyName {
        &self.family_name
    }

    pub fn sources(&self) -> &[FontFaceSource] {
        &self.sources
    }

    pub fn source_index(&self) -> usize {
        self.source_index
    }

    pub fn descriptor(&self) -> &FontTemplateDescriptor {
        &self.descriptor
    }

    pub fn loading_state(&self) -> LoadingState {
        self.loading_state
    }

    pub fn is_loading(&self) -> bool {
        self.loading_state.is_loading()
    }

    pub fn unsupported_format(&self) -> bool {
        self.unsupported_format
    }

    pub fn used_local_rule(&self) -> bool {
        self.used_local_rule
    }

    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts
    }

    /// The font this proxy resolved to, once it has.
    pub fn resolved(&self) -> Option<&FontTemplateRef> {
        self.resolved.as_ref()
    }

    /// Whether this proxy was created for the same rule.
    pub fn matches_rule(
        &self,
        sources: &[FontFaceSource],
        descriptor: &FontTemplateDescriptor,
    ) -> bool {
        self.sources == sources && self.descriptor == *descriptor
    }

    pub(crate) fn is_owned_by(&self, owner: &Arc<FontSetHandle>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(owner)) && self.owner.strong_count() > 0
    }

    /// Cut the proxy loose from its set once it has been superseded. Whatever the loader still
    /// delivers for it is ignored from then on.
    pub(crate) fn detach(&mut self) {
        debug!("Detaching {} proxy in state {:?}", self.family_name, self.loading_state);
        self.owner = Weak::new();
        self.load_principal = None;
    }

    pub(crate) fn set_loading_state(&mut self, state: LoadingState) {
        debug!(
            "{} proxy {:?} -> {:?}",
            self.family_name, self.loading_state, state
        );
        self.loading_state = state;
    }

    fn skip_source(&mut self) {
        self.source_index = (self.source_index + 1).min(self.sources.len());
    }

    fn record_failure(&mut self) {
        self.saw_failure = true;
        self.failed_attempts = (self.failed_attempts + 1).min(self.sources.len());
        self.load_principal = None;
        self.skip_source();
    }
}

/// Everything a proxy needs from its font set while loading.
pub(crate) struct LoadContext {
    pub collaborators: FontSetCollaborators,
    pub cache: Arc<UserFontCache>,
    pub prefs: UserFontPrefs,
    pub principal: Option<Principal>,
    pub private_browsing: bool,
}

impl LoadContext {
    fn supported_formats(&self) -> FontFormatFlags {
        self.prefs.supported_formats & self.collaborators.platform.supported_formats()
    }

    fn report(
        &self,
        family_name: &LowercaseFontFamilyName,
        source_index: usize,
        source: &FontFaceSource,
        error: &FontLoadError,
        severity: MessageSeverity,
    ) {
        self.collaborators.diagnostics.log_message(FontMessage {
            family_name: family_name.clone(),
            source_index,
            source: source.describe(),
            text: error.to_string(),
            severity,
        });
    }
}

/// Try the sources of `proxy` from its current index until one resolves, one suspends on the
/// loader, or none is left.
///
/// Borrows of the proxy are never held across calls into collaborators.
pub(crate) fn load_next(
    proxy: &ProxyFontEntryRef,
    family: &mut FontFaceFamily,
    context: &LoadContext,
) -> FontLoadResult<LoadStatus> {
    loop {
        let (index, source, family_name, descriptor) = {
            let entry = proxy.borrow();
            let Some(source) = entry.sources.get(entry.source_index) else {
                break;
            };
            (
                entry.source_index,
                source.clone(),
                entry.family_name.clone(),
                entry.descriptor.clone(),
            )
        };

        let url = match source {
            FontFaceSource::Url { ref url, .. } => url.clone(),
            FontFaceSource::Local { ref name } => {
                let found = context
                    .collaborators
                    .platform
                    .find_local_font(name, &descriptor);
                proxy.borrow_mut().used_local_rule = true;
                let Some((identifier, platform_info)) = found else {
                    debug!("{}", FontLoadError::LocalFontNotFound(name.clone()));
                    proxy.borrow_mut().skip_source();
                    continue;
                };
                let user_font_data = UserFontData {
                    source_index: index,
                    local_name: Some(name.clone()),
                    real_name: platform_info.real_name.clone(),
                    private: context.private_browsing,
                    ..Default::default()
                };
                let template = FontTemplate::new_for_local_font(
                    &family_name,
                    identifier,
                    platform_info,
                    descriptor,
                    Some(user_font_data),
                );
                debug!("{} resolved with {}", family_name, source.describe());
                resolve_with(proxy, family, template)?;
                return Ok(LoadStatus::Loaded);
            },
        };

        if !context.prefs.downloadable_fonts_enabled {
            let error = FontLoadError::LoadBlocked(source.describe());
            debug!("{}", error);
            proxy.borrow_mut().record_failure();
            continue;
        }

        let Some(permission) = context
            .collaborators
            .loader
            .check_font_load(&source, context.principal.as_ref())
        else {
            let error = FontLoadError::LoadBlocked(source.describe());
            warn!("{}", error);
            context.report(&family_name, index, &source, &error, MessageSeverity::Warning);
            proxy.borrow_mut().record_failure();
            continue;
        };

        if !source.is_data_url() && !permission.bypass_cache {
            let key = UserFontCacheKey::for_url(
                &url,
                permission.principal.as_ref(),
                context.private_browsing,
                &family_name,
                &descriptor,
            );
            if let Some(template) = context.cache.get(&key) {
                debug!("{} resolved from the cache with {}", family_name, source.describe());
                resolve_with(proxy, family, template)?;
                return Ok(LoadStatus::Loaded);
            }
        }

        if !source
            .format_flags()
            .is_supported_by(context.supported_formats())
        {
            let error = FontLoadError::FormatNotSupported(source.describe());
            warn!("{}", error);
            context.report(&family_name, index, &source, &error, MessageSeverity::Warning);
            let mut entry = proxy.borrow_mut();
            entry.unsupported_format = true;
            entry.skip_source();
            continue;
        }

        if source.is_data_url() {
            let decoded = decode_data_url(&url).and_then(|data| {
                let length = content_length(&data, &source.describe())?;
                Ok((data, length))
            });
            let (data, length) = match decoded {
                Ok(decoded) => decoded,
                Err(error) => {
                    warn!("{}", error);
                    context.report(&family_name, index, &source, &error, MessageSeverity::Error);
                    proxy.borrow_mut().record_failure();
                    continue;
                },
            };
            let key = UserFontCacheKey::for_content(
                crc32(&data),
                length,
                context.private_browsing,
                &family_name,
                &descriptor,
            );
            if let Some(template) = context.cache.get(&key) {
                debug!("{} resolved from the cache with inline data", family_name);
                resolve_with(proxy, family, template)?;
                return Ok(LoadStatus::Loaded);
            }
            if load_font(proxy, family, context, data)? {
                return Ok(LoadStatus::Loaded);
            }
            proxy.borrow_mut().record_failure();
            continue;
        }

        let request = FontLoadRequest {
            family_name: family_name.clone(),
            proxy: proxy.clone(),
            source: source.clone(),
            principal: permission.principal.clone(),
            private_browsing: context.private_browsing,
        };
        {
            let mut entry = proxy.borrow_mut();
            entry.load_principal = permission.principal;
            if entry.loading_state < LoadingState::LoadingStarted {
                entry.set_loading_state(LoadingState::LoadingStarted);
            }
        }
        match context.collaborators.loader.start_load(request) {
            Ok(()) => {
                debug!("{} started loading {}", family_name, source.describe());
                return Ok(LoadStatus::Loading);
            },
            Err(error) => {
                warn!("{}", error);
                context.report(&family_name, index, &source, &error, MessageSeverity::Error);
                proxy.borrow_mut().record_failure();
            },
        }
    }

    let mut entry = proxy.borrow_mut();
    let final_state = if entry.unsupported_format && !entry.saw_failure {
        LoadingState::FormatNotSupported
    } else {
        LoadingState::Error
    };
    warn!(
        "No usable source for font family {} ({} failed attempts)",
        entry.family_name, entry.failed_attempts
    );
    entry.set_loading_state(final_state);
    Ok(LoadStatus::EndOfList)
}

/// Handle the loader's result for the source `proxy` is waiting on.
pub(crate) fn on_source_data_ready(
    proxy: &ProxyFontEntryRef,
    family: &mut FontFaceFamily,
    context: &LoadContext,
    result: Result<Vec<u8>, FontLoadError>,
) -> FontLoadResult<LoadStatus> {
    match result {
        Ok(data) => {
            if load_font(proxy, family, context, data)? {
                return Ok(LoadStatus::Loaded);
            }
        },
        Err(error) => {
            let (family_name, index, source) = current_source(proxy)?;
            warn!("{}", error);
            context.report(&family_name, index, &source, &error, MessageSeverity::Error);
        },
    }
    proxy.borrow_mut().record_failure();
    load_next(proxy, family, context)
}

fn current_source(
    proxy: &ProxyFontEntryRef,
) -> FontLoadResult<(LowercaseFontFamilyName, usize, FontFaceSource)> {
    let entry = proxy.borrow();
    let source = entry.sources.get(entry.source_index).cloned().ok_or_else(|| {
        FontLoadError::InternalConsistency(format!(
            "data delivered for family {} after its last source",
            entry.family_name
        ))
    })?;
    Ok((entry.family_name.clone(), entry.source_index, source))
}

/// Sanitize and activate `data` for the current source, replacing the proxy on success.
/// Returns false if the data was rejected; the caller moves on to the next source.
fn load_font(
    proxy: &ProxyFontEntryRef,
    family: &mut FontFaceFamily,
    context: &LoadContext,
    data: Vec<u8>,
) -> FontLoadResult<bool> {
    let (family_name, index, source) = current_source(proxy)?;
    let (descriptor, load_principal) = {
        let entry = proxy.borrow();
        (entry.descriptor.clone(), entry.load_principal.clone())
    };
    let Some(url) = source.url_value().cloned() else {
        return Err(FontLoadError::InternalConsistency(format!(
            "data delivered for {}",
            source.describe()
        )));
    };

    let crc32 = crc32(&data);
    let reject = |reason: String| {
        let error = FontLoadError::ValidationFailed {
            url: source.describe(),
            reason,
        };
        warn!("{}", error);
        context.report(&family_name, index, &source, &error, MessageSeverity::Error);
        Ok(false)
    };

    let length = match content_length(&data, &source.describe()) {
        Ok(length) => length,
        Err(FontLoadError::ValidationFailed { reason, .. }) => return reject(reason),
        Err(error) => return Err(error),
    };

    let sanitized = match context
        .collaborators
        .sanitizer
        .sanitize(&data, source.format_flags())
    {
        Ok(sanitized) => sanitized,
        Err(error) => return reject(format!("rejected by sanitizer: {error}")),
    };
    let Some(platform_info) = context
        .collaborators
        .platform
        .create_font_from_data(&sanitized.data, &descriptor)
    else {
        return reject("not usable by the platform".into());
    };

    let is_data_url = source.is_data_url();
    let identifier = if is_data_url {
        FontIdentifier::Data { crc32, length }
    } else {
        FontIdentifier::Web(url.clone())
    };
    let user_font_data = UserFontData {
        source_index: index,
        format: source.format_flags(),
        url: Some(url),
        principal: if is_data_url { None } else { load_principal },
        local_name: None,
        real_name: sanitized.real_name,
        metadata: sanitized.metadata,
        metadata_original_length: sanitized.metadata_original_length,
        crc32,
        length,
        private: context.private_browsing,
    };
    let template = FontTemplate::new_for_web_font(
        &family_name,
        identifier,
        Arc::new(sanitized.data),
        platform_info,
        descriptor,
        Some(user_font_data),
    );
    debug!(
        "{} loaded {} ({} bytes, {} after sanitizing)",
        family_name,
        source.describe(),
        length,
        template.data_if_in_memory().map_or(0, |data| data.len())
    );

    resolve_with(proxy, family, template.clone())?;
    context
        .cache
        .cache_font(&template, EntryPersistence::Discardable);
    Ok(true)
}

/// Swap `proxy` for `template` in `family` and mark it loaded.
fn resolve_with(
    proxy: &ProxyFontEntryRef,
    family: &mut FontFaceFamily,
    template: FontTemplateRef,
) -> FontLoadResult<()> {
    let proxy_entry = FamilyEntry::Proxy(proxy.clone());
    let template_entry = FamilyEntry::Template(template.clone());
    if family.contains(&template_entry) {
        // Another rule of this family already resolved to the same font.
        if !family.remove(&proxy_entry) {
            return Err(FontLoadError::InternalConsistency(format!(
                "resolved proxy is not in family {}",
                family.name()
            )));
        }
    } else {
        family.replace(&proxy_entry, template_entry)?;
    }

    let mut entry = proxy.borrow_mut();
    entry.load_principal = None;
    entry.resolved = Some(template);
    entry.set_loading_state(LoadingState::Loaded);
    Ok(())
}

fn decode_data_url(url: &url::Url) -> FontLoadResult<Vec<u8>> {
    let failed = |reason: String| FontLoadError::LoadFailed {
        url: "data:".into(),
        reason,
    };
    let data_url = DataUrl::process(url.as_str()).map_err(|error| failed(format!("{error:?}")))?;
    let (data, _) = data_url
        .decode_to_vec()
        .map_err(|error| failed(format!("{error:?}")))?;
    Ok(data)
}

/// The length of font data as recorded in cache keys and provenance.
pub(crate) fn content_length(data: &[u8], description: &str) -> FontLoadResult<u32> {
    checked_length(data.len(), description)
}

fn checked_length(length: usize, description: &str) -> FontLoadResult<u32> {
    u32::try_from(length).map_err(|_| FontLoadError::ValidationFailed {
        url: description.to_owned(),
        reason: format!("{length} bytes is too large for a font"),
    })
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}
