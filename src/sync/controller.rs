//! Session object tying providers, settings and runs together.

use std::fmt;

use tracing::{debug, info, warn};

use super::config::SyncConfig;
use super::process::{Process, SyncMode, SyncPlan};
use super::report::SyncReport;
use super::tuple::MergePolicy;
use crate::collection::COLLECTION_ID;
use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::provider::{AbortToken, Preference, Provider, ProviderPtr};

/// Decides whether a provider with [`Preference::Ask`] is enabled the first
/// time it is seen.
pub type Asker = Box<dyn Fn(&dyn Provider) -> bool + Send + Sync>;

/// Cancels a running synchronization from another thread.
#[derive(Clone)]
pub struct AbortHandle {
    token: AbortToken,
    providers: Vec<ProviderPtr>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.abort();
        for provider in &self.providers {
            provider.abort();
        }
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.token.is_aborted())
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Registered providers plus the persisted settings.
pub struct Controller {
    providers: Vec<ProviderPtr>,
    config: SyncConfig,
    match_fields: Fields,
    asker: Asker,
    abort: AbortToken,
}

impl Controller {
    /// `match_fields` restricts which identity fields tracks are matched on.
    #[must_use]
    pub fn new(config: SyncConfig, match_fields: Fields) -> Self {
        Self {
            providers: Vec::new(),
            config,
            match_fields,
            asker: Box::new(|_: &dyn Provider| false),
            abort: AbortToken::new(),
        }
    }

    #[must_use]
    pub fn with_asker(mut self, asker: Asker) -> Self {
        self.asker = asker;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SyncConfig {
        &mut self.config
    }

    /// Persist pending settings changes.
    pub fn save_config(&mut self) -> Result<()> {
        self.config.save()
    }

    #[must_use]
    pub fn providers(&self) -> &[ProviderPtr] {
        &self.providers
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&ProviderPtr> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Fields that can be synchronized at all.
    #[must_use]
    pub const fn available_fields() -> Fields {
        Fields::STATISTICS
    }

    /// Add a provider to the session and remember it in the settings.
    pub fn register_provider(&mut self, provider: ProviderPtr) -> Result<()> {
        let id = provider.id();
        if self.provider(&id).is_some() {
            return Err(Error::config(format!("provider '{id}' is already registered")));
        }

        let preference = provider.default_preference();
        let enabled = if self.config.provider_known(&id) {
            self.config.provider_enabled(&id, false)
        } else {
            match preference {
                Preference::Never | Preference::NoByDefault => false,
                Preference::YesByDefault => true,
                Preference::Ask => (self.asker)(provider.as_ref()),
            }
        };

        if preference != Preference::Never || self.config.provider_known(&id) {
            self.config.update_provider(
                &id,
                &provider.pretty_name(),
                &provider.icon(),
                true,
                Some(enabled),
            );
            self.config.save()?;
        }
        info!(provider = %id, name = %provider.pretty_name(), enabled, "Registered provider");
        self.providers.push(provider);
        Ok(())
    }

    /// Remove a provider from the session; its settings are kept.
    pub fn unregister_provider(&mut self, id: &str) -> Result<()> {
        let before = self.providers.len();
        self.providers.retain(|p| p.id() != id);
        if self.providers.len() == before {
            warn!(provider = %id, "Unregistering unknown provider");
        }
        if self.config.provider_known(id) {
            self.config.set_provider_online(id, false);
            self.config.save()?;
        }
        debug!(provider = %id, "Unregistered provider");
        Ok(())
    }

    /// Forget the settings of a provider that is not registered.
    pub fn forget_provider(&mut self, id: &str) -> Result<()> {
        self.config.forget_provider(id)?;
        self.config.save()
    }

    pub fn set_provider_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        if !self.config.set_provider_enabled(id, enabled) {
            return Err(Error::config(format!("unknown provider '{id}'")));
        }
        self.config.save()
    }

    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.abort.clone(),
            providers: self.providers.clone(),
        }
    }

    /// Cancel a running synchronization.
    pub fn abort(&self) {
        self.abort_handle().abort();
    }

    /// Match the providers taking part in a `mode` run, without writing.
    /// `None` when there is nothing to synchronize.
    #[must_use]
    pub fn prepare(&self, mode: SyncMode) -> Option<SyncPlan> {
        let providers: Vec<ProviderPtr> = match mode {
            SyncMode::Interactive => self.providers.clone(),
            SyncMode::NonInteractive => self
                .providers
                .iter()
                .filter(|p| self.config.provider_enabled(&p.id(), false))
                .cloned()
                .collect(),
        };
        if providers.is_empty() || (providers.len() == 1 && providers[0].id() == COLLECTION_ID) {
            debug!(?mode, "No providers to synchronize");
            return None;
        }

        let fields = self.config.checked_fields();
        if mode == SyncMode::NonInteractive && fields.is_empty() {
            debug!("No fields checked for synchronization");
            return None;
        }

        self.abort.reset();
        let policy = MergePolicy::new(fields, self.config.excluded_labels().clone());
        Some(Process::new(providers, self.match_fields, policy, self.abort.clone()).prepare())
    }

    /// Run a complete synchronization.
    #[must_use]
    pub fn synchronize(&self, mode: SyncMode) -> Option<SyncReport> {
        self.prepare(mode).map(SyncPlan::commit)
    }
}
