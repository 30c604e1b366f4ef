/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::errors::{FontLoadError, FontLoadResult};
use crate::font_face_source::{FontFaceSource, Principal};
use crate::font_loader::{FontSetCollaborators, LoadProgress};
use crate::font_store::{FamilyEntry, FontFaceFamily, LowercaseFontFamilyName};
use crate::font_template::{
    FontDescriptor, FontIdentifier, FontTemplate, FontTemplateDescriptor, FontTemplateRef,
    UserFontData,
};
use crate::prefs::UserFontPrefs;
use crate::proxy_font_entry::{
    self, FontSetHandle, LoadContext, LoadStatus, LoadingState, ProxyFontEntry, ProxyFontEntryRef,
    content_length, crc32,
};
use crate::user_font_cache::{EntryPersistence, UserFontCache, UserFontCacheKey};

/// The answer to [`UserFontSet::find_font_entry`].
#[derive(Clone, Debug)]
pub struct FontEntryMatch {
    /// The font to use, or `None` if the matching face has not resolved.
    pub template: Option<FontTemplateRef>,
    /// Bold has to be synthesized.
    pub needs_bold: bool,
    /// Text should stay invisible because the face is still loading and the fallback
    /// timer has not expired.
    pub wait_for_user_font: bool,
}

/// An `@font-face` rule the set has seen, with the proxy created for it.
struct FontFaceRule {
    family_name: LowercaseFontFamilyName,
    proxy: ProxyFontEntryRef,
}

/// The downloadable fonts of one document: every `@font-face` family, the proxies loading
/// their faces and the generation counter layout uses to notice that fonts changed.
pub struct UserFontSet {
    /// `None` once torn down.
    owner: Option<Arc<FontSetHandle>>,
    families: HashMap<LowercaseFontFamilyName, FontFaceFamily>,
    rules: Vec<FontFaceRule>,
    generation: u64,
    local_rules_used: bool,
    context: LoadContext,
}

impl UserFontSet {
    pub fn new(
        principal: Option<Principal>,
        private_browsing: bool,
        prefs: UserFontPrefs,
        cache: Arc<UserFontCache>,
        collaborators: FontSetCollaborators,
    ) -> Self {
        let owner = FontSetHandle::new();
        debug!(
            "Creating user font set {} (private: {})",
            owner.id(),
            private_browsing
        );
        UserFontSet {
            owner: Some(owner),
            families: HashMap::new(),
            rules: Vec::new(),
            generation: 0,
            local_rules_used: false,
            context: LoadContext {
                collaborators,
                cache,
                prefs,
                principal,
                private_browsing,
            },
        }
    }

    fn owner(&self) -> FontLoadResult<&Arc<FontSetHandle>> {
        self.owner
            .as_ref()
            .ok_or_else(|| FontLoadError::InternalConsistency("font set was torn down".into()))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn local_rules_used(&self) -> bool {
        self.local_rules_used
    }

    pub fn is_private_browsing(&self) -> bool {
        self.context.private_browsing
    }

    pub fn prefs(&self) -> &UserFontPrefs {
        &self.context.prefs
    }

    pub fn cache(&self) -> &Arc<UserFontCache> {
        &self.context.cache
    }

    /// How long the embedder waits before the first call to [`UserFontSet::on_load_timer`].
    pub fn fallback_delay(&self) -> Duration {
        self.context.prefs.fallback_delay()
    }

    fn increment_generation(&mut self) {
        self.generation += 1;
        debug!("User font set generation is now {}", self.generation);
        self.context
            .collaborators
            .observer
            .user_font_set_updated(self.generation);
    }

    /// Get the proxy for an `@font-face` rule, creating it and starting its load if the set
    /// has not seen the rule before. A rule that already resolved yields the resolved font.
    pub fn find_or_create_font_face(
        &mut self,
        family_name: &str,
        sources: Vec<FontFaceSource>,
        descriptor: FontTemplateDescriptor,
    ) -> FontLoadResult<FamilyEntry> {
        let name = LowercaseFontFamilyName::from(family_name);

        let existing = self.rules.iter().find_map(|rule| {
            let proxy = rule.proxy.borrow();
            (rule.family_name == name && proxy.matches_rule(&sources, &descriptor)).then(|| {
                match proxy.resolved() {
                    Some(template) => FamilyEntry::Template(template.clone()),
                    None => FamilyEntry::Proxy(rule.proxy.clone()),
                }
            })
        });
        if let Some(entry) = existing {
            debug!("Reusing the entry of an existing rule for {}", name);
            self.add_entry(name, entry.clone());
            return Ok(entry);
        }

        let proxy = self.create_font_face(family_name, sources, descriptor)?;
        self.add_font_face(family_name, FamilyEntry::Proxy(proxy.clone()))?;
        if self.load_proxy(&name, &proxy)? == LoadStatus::Loaded {
            if let Some(template) = proxy.borrow().resolved() {
                return Ok(FamilyEntry::Template(template.clone()));
            }
        }
        Ok(FamilyEntry::Proxy(proxy))
    }

    /// Create a proxy owned by this set without adding it to any family.
    pub fn create_font_face(
        &self,
        family_name: &str,
        sources: Vec<FontFaceSource>,
        descriptor: FontTemplateDescriptor,
    ) -> FontLoadResult<ProxyFontEntryRef> {
        Ok(ProxyFontEntry::new_ref(
            self.owner()?,
            family_name.into(),
            sources,
            descriptor,
        ))
    }

    /// Add an entry at the end of `family_name`, creating the family if needed. A proxy from
    /// [`UserFontSet::create_font_face`] starts loading the first time layout asks for it.
    pub fn add_font_face(&mut self, family_name: &str, entry: FamilyEntry) -> FontLoadResult<()> {
        let owner = self.owner()?;
        let name = LowercaseFontFamilyName::from(family_name);
        if let FamilyEntry::Proxy(ref proxy) = entry {
            if !proxy.borrow().is_owned_by(owner) {
                return Err(FontLoadError::InternalConsistency(format!(
                    "adding a proxy of another font set to {}",
                    name
                )));
            }
            if !self
                .rules
                .iter()
                .any(|rule| Arc::ptr_eq(&rule.proxy, proxy))
            {
                self.rules.push(FontFaceRule {
                    family_name: name.clone(),
                    proxy: proxy.clone(),
                });
            }
        }
        self.add_entry(name, entry);
        Ok(())
    }

    fn add_entry(&mut self, name: LowercaseFontFamilyName, entry: FamilyEntry) {
        self.families
            .entry(name.clone())
            .or_insert_with(|| FontFaceFamily::new(name))
            .append(entry);
    }

    /// Add a face from bytes the embedder already holds. The data is sanitized and activated
    /// synchronously and cached by content, so the same buffer is only decoded once.
    pub fn add_font_face_from_data(
        &mut self,
        family_name: &str,
        data: Vec<u8>,
        descriptor: FontTemplateDescriptor,
        persistence: EntryPersistence,
    ) -> FontLoadResult<FontTemplateRef> {
        self.owner()?;
        let name = LowercaseFontFamilyName::from(family_name);
        let crc32 = crc32(&data);
        let length = content_length(&data, &format!("buffer for {name}"))?;
        let key = UserFontCacheKey::for_content(
            crc32,
            length,
            self.context.private_browsing,
            &name,
            &descriptor,
        );

        let template = match self.context.cache.get(&key) {
            Some(template) => template,
            None => {
                let invalid = |reason: String| FontLoadError::ValidationFailed {
                    url: format!("buffer for {name}"),
                    reason,
                };
                let collaborators = &self.context.collaborators;
                let sanitized = collaborators
                    .sanitizer
                    .sanitize(&data, Default::default())
                    .map_err(|error| invalid(error.to_string()))?;
                let platform_info = collaborators
                    .platform
                    .create_font_from_data(&sanitized.data, &descriptor)
                    .ok_or_else(|| invalid("not usable by the platform".into()))?;
                let user_font_data = UserFontData {
                    format: sanitized.format,
                    real_name: sanitized.real_name,
                    metadata: sanitized.metadata,
                    metadata_original_length: sanitized.metadata_original_length,
                    crc32,
                    length,
                    private: self.context.private_browsing,
                    ..Default::default()
                };
                let template = FontTemplate::new_for_web_font(
                    &name,
                    FontIdentifier::Data { crc32, length },
                    Arc::new(sanitized.data),
                    platform_info,
                    descriptor,
                    Some(user_font_data),
                );
                self.context.cache.put(key, &template, persistence);
                template
            },
        };

        self.add_entry(name, FamilyEntry::Template(template.clone()));
        self.increment_generation();
        Ok(template)
    }

    pub fn has_family(&self, family_name: &str) -> bool {
        self.families
            .contains_key(&LowercaseFontFamilyName::from(family_name))
    }

    pub fn lookup_family(&self, family_name: &str) -> Option<&FontFaceFamily> {
        self.families
            .get(&LowercaseFontFamilyName::from(family_name))
    }

    /// The family that holds `template`, if any.
    pub fn find_family_for(&self, template: &FontTemplateRef) -> Option<&FontFaceFamily> {
        let entry = FamilyEntry::Template(template.clone());
        self.families
            .values()
            .find(|family| family.contains(&entry))
    }

    /// Pick the face of `family_name` that best matches `query`. A face that has not started
    /// loading starts now; if it resolves immediately the resolved font is returned.
    pub fn find_font_entry(
        &mut self,
        family_name: &str,
        query: &FontDescriptor,
    ) -> FontLoadResult<Option<FontEntryMatch>> {
        let name = LowercaseFontFamilyName::from(family_name);
        let Some(family) = self.families.get(&name) else {
            return Ok(None);
        };
        let Some((entry, needs_bold)) = family.find_for_descriptor(query) else {
            return Ok(None);
        };

        let proxy = match entry {
            FamilyEntry::Template(template) => {
                return Ok(Some(FontEntryMatch {
                    template: Some(template),
                    needs_bold,
                    wait_for_user_font: false,
                }));
            },
            FamilyEntry::Proxy(proxy) => proxy,
        };

        let state = proxy.borrow().loading_state();
        if state > LoadingState::NotLoading {
            return Ok(Some(FontEntryMatch {
                template: None,
                needs_bold,
                wait_for_user_font: state < LoadingState::LoadingSlowly,
            }));
        }

        let status = self.load_proxy(&name, &proxy)?;
        if status == LoadStatus::Loaded {
            return self.find_font_entry(family_name, query);
        }
        let state = proxy.borrow().loading_state();
        Ok(Some(FontEntryMatch {
            template: None,
            needs_bold,
            wait_for_user_font: status != LoadStatus::EndOfList &&
                state < LoadingState::LoadingSlowly,
        }))
    }

    /// Run the source list of `proxy` from its current index and publish the outcome.
    fn load_proxy(
        &mut self,
        name: &LowercaseFontFamilyName,
        proxy: &ProxyFontEntryRef,
    ) -> FontLoadResult<LoadStatus> {
        let Some(family) = self.families.get_mut(name) else {
            return Err(FontLoadError::InternalConsistency(format!(
                "loading a face of unknown family {name}"
            )));
        };
        let status = proxy_font_entry::load_next(proxy, family, &self.context)?;
        self.publish_load_status(name, proxy, status);
        Ok(status)
    }

    fn publish_load_status(
        &mut self,
        name: &LowercaseFontFamilyName,
        proxy: &ProxyFontEntryRef,
        status: LoadStatus,
    ) {
        if proxy.borrow().used_local_rule() {
            self.local_rules_used = true;
        }
        match status {
            LoadStatus::Loaded => self.increment_generation(),
            LoadStatus::EndOfList => self
                .context
                .collaborators
                .observer
                .fallback_visibility_changed(name),
            LoadStatus::Loading => {},
        }
    }

    /// Deliver the result of a load started through [`crate::FontLoader::start_load`].
    /// Returns whether the face resolved. Results for proxies of a torn down set, or for
    /// proxies that are no longer waiting on a load, are ignored.
    pub fn on_load_complete(
        &mut self,
        family_name: &str,
        proxy: &ProxyFontEntryRef,
        result: Result<Vec<u8>, FontLoadError>,
    ) -> FontLoadResult<bool> {
        let Some(owner) = self.owner.as_ref() else {
            debug!("Ignoring a font load that completed after teardown");
            return Ok(false);
        };
        {
            let entry = proxy.borrow();
            if !entry.is_owned_by(owner) {
                debug!("Ignoring a font load for a proxy of another font set");
                return Ok(false);
            }
            if !entry.is_loading() {
                debug!(
                    "Ignoring a font load for {} in state {:?}",
                    entry.family_name(),
                    entry.loading_state()
                );
                return Ok(false);
            }
        }

        let name = LowercaseFontFamilyName::from(family_name);
        let Some(family) = self.families.get_mut(&name) else {
            warn!("Font load completed for unknown family {}", name);
            return Ok(false);
        };
        let status = proxy_font_entry::on_source_data_ready(proxy, family, &self.context, result)?;
        self.publish_load_status(&name, proxy, status);
        Ok(status == LoadStatus::Loaded)
    }

    /// The fallback timer for `proxy` fired. Returns the delay after which it should fire
    /// again, if the load was judged almost done.
    pub fn on_load_timer(
        &mut self,
        proxy: &ProxyFontEntryRef,
        progress: LoadProgress,
    ) -> Option<Duration> {
        let owner = self.owner.as_ref()?;
        let mut entry = proxy.borrow_mut();
        if !entry.is_owned_by(owner) {
            return None;
        }
        match entry.loading_state() {
            LoadingState::LoadingStarted
                if progress
                    .fraction()
                    .is_some_and(|fraction| fraction > self.context.prefs.almost_done_fraction) =>
            {
                entry.set_loading_state(LoadingState::LoadingAlmostDone);
                Some(self.context.prefs.fallback_delay() / 2)
            },
            LoadingState::LoadingStarted | LoadingState::LoadingAlmostDone => {
                entry.set_loading_state(LoadingState::LoadingSlowly);
                let name = entry.family_name().clone();
                drop(entry);
                self.context
                    .collaborators
                    .observer
                    .fallback_visibility_changed(&name);
                None
            },
            _ => None,
        }
    }

    /// Re-run every rule that consulted a `local()` source, after the installed fonts changed.
    /// Each such rule gets a fresh proxy in place of its current entry.
    pub fn rebuild_local_rules(&mut self) -> FontLoadResult<()> {
        if !self.local_rules_used {
            return Ok(());
        }
        let owner = self.owner()?.clone();
        self.local_rules_used = false;

        let mut rebuilt = Vec::new();
        for rule in self.rules.iter_mut() {
            let (old_entry, new_proxy) = {
                let proxy = rule.proxy.borrow();
                if !proxy.used_local_rule() {
                    continue;
                }
                let old_entry = match proxy.resolved() {
                    Some(template) => FamilyEntry::Template(template.clone()),
                    None => FamilyEntry::Proxy(rule.proxy.clone()),
                };
                let new_proxy = ProxyFontEntry::new_ref(
                    &owner,
                    rule.family_name.clone(),
                    proxy.sources().to_vec(),
                    proxy.descriptor().clone(),
                );
                (old_entry, new_proxy)
            };
            if rule.proxy.borrow().is_loading() {
                self.context.collaborators.loader.cancel_load(&rule.proxy);
            }
            rule.proxy.borrow_mut().detach();

            let family = self
                .families
                .entry(rule.family_name.clone())
                .or_insert_with(|| FontFaceFamily::new(rule.family_name.clone()));
            let new_entry = FamilyEntry::Proxy(new_proxy.clone());
            if family.contains(&old_entry) {
                family.replace(&old_entry, new_entry)?;
            } else {
                family.append(new_entry);
            }
            rule.proxy = new_proxy.clone();
            rebuilt.push((rule.family_name.clone(), new_proxy));
        }

        debug!("Rebuilding {} rules that used local fonts", rebuilt.len());
        for (name, proxy) in rebuilt.iter() {
            let Some(family) = self.families.get_mut(name) else {
                continue;
            };
            let status = proxy_font_entry::load_next(proxy, family, &self.context)?;
            if proxy.borrow().used_local_rule() {
                self.local_rules_used = true;
            }
            if status == LoadStatus::EndOfList {
                self.context
                    .collaborators
                    .observer
                    .fallback_visibility_changed(name);
            }
        }
        if !rebuilt.is_empty() {
            self.increment_generation();
        }
        Ok(())
    }

    /// The number of faces waiting on the loader.
    pub fn number_of_fonts_still_loading(&self) -> usize {
        self.rules
            .iter()
            .filter(|rule| rule.proxy.borrow().is_loading())
            .count()
    }

    /// Cancel every load in flight and release all families. Completions that arrive
    /// afterwards are ignored.
    pub fn teardown(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        debug!("Tearing down user font set {}", owner.id());
        for rule in self.rules.drain(..) {
            if rule.proxy.borrow().is_loading() {
                self.context.collaborators.loader.cancel_load(&rule.proxy);
            }
        }
        for family in self.families.values_mut() {
            family.clear();
        }
        self.families.clear();
    }
}

impl Drop for UserFontSet {
    fn drop(&mut self) {
        self.teardown();
    }
}
