// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime registry of instantiated model providers.
//!
//! Distinct from [`crate::registry`], which only holds static driver
//! metadata. This module builds actual [`crate::ModelProvider`] instances
//! from a [`opencode_config::Config`] and is what the session processor
//! consults to resolve `provider/model` pairs into a usable provider.

use std::collections::HashMap;
use std::sync::Arc;

use opencode_config::Config;
use tracing::warn;

use crate::catalog::ModelCatalogEntry;
use crate::ModelProvider;

/// Holds one instantiated provider per configured id, keyed the same way
/// [`crate::resolve_model_from_config`] resolves names: the default
/// entry (`config.model`) is keyed by its own `provider` field, and each
/// `config.providers` entry is keyed by its map key.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    config: Config,
}

impl ProviderRegistry {
    /// Look up an instantiated provider by id. `None` if the id was never
    /// configured or failed to construct during [`initialize_providers`].
    pub fn get(&self, id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).cloned()
    }

    /// All successfully-constructed provider ids, in no particular order.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Resolve a `(provider_id, model_id)` pair to catalog metadata. The
    /// provider must be registered; the model is looked up in the static
    /// catalog keyed by the provider's underlying driver id so that named
    /// custom providers (e.g. `my_ollama` wrapping driver `openai`) still
    /// resolve against the right catalog rows.
    pub fn get_model(&self, provider_id: &str, model_id: &str) -> Option<ModelCatalogEntry> {
        let driver = self.driver_id_for(provider_id)?;
        crate::catalog::lookup(&driver, model_id)
    }

    /// All models across every registered provider, sorted by a fixed
    /// priority heuristic (registration order in [`crate::registry::DRIVERS`],
    /// then alphabetically by model id within a provider) so the result is
    /// stable across runs.
    pub fn all_models(&self) -> Vec<ModelCatalogEntry> {
        let mut entries: Vec<ModelCatalogEntry> = self
            .providers
            .keys()
            .filter_map(|id| self.driver_id_for(id))
            .flat_map(|driver| {
                crate::catalog::static_catalog()
                    .into_iter()
                    .filter(move |e| e.provider == driver)
            })
            .collect();
        entries.sort_by_key(|e| (driver_priority(&e.provider), e.id.clone()));
        entries.dedup_by(|a, b| a.provider == b.provider && a.id == b.id);
        entries
    }

    /// The default `(provider_id, model_id)` pair: `config.model` if its
    /// provider constructed successfully, else the highest-priority entry
    /// from [`Self::all_models`].
    pub fn default_model(&self) -> Option<(String, String)> {
        let default_provider = &self.config.model.provider;
        if self.providers.contains_key(default_provider) {
            return Some((default_provider.clone(), self.config.model.name.clone()));
        }
        self.all_models()
            .into_iter()
            .next()
            .map(|e| (e.provider, e.id))
    }

    fn driver_id_for(&self, provider_id: &str) -> Option<String> {
        if provider_id == self.config.model.provider {
            return Some(self.config.model.provider.clone());
        }
        if let Some(named) = self.config.providers.get(provider_id) {
            return Some(named.provider.clone());
        }
        // provider_id may already be a bare driver id with no named entry.
        self.providers.contains_key(provider_id).then(|| provider_id.to_string())
    }
}

/// Position of a driver id in the static registry; used as the primary sort
/// key for [`ProviderRegistry::all_models`]. Unknown ids sort last.
fn driver_priority(driver_id: &str) -> usize {
    crate::registry::DRIVERS
        .iter()
        .position(|d| d.id == driver_id)
        .unwrap_or(usize::MAX)
}

/// Instantiate a provider for every configured entry: `config.model` (the
/// default) plus every entry in `config.providers`. Construction failures
/// are logged and skipped, never fatal — the registry starts with whatever
/// providers came up cleanly.
pub fn initialize_providers(config: &Config) -> ProviderRegistry {
    let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();

    match crate::from_config(&config.model) {
        Ok(provider) => {
            providers.insert(config.model.provider.clone(), Arc::from(provider));
        }
        Err(e) => warn!(
            provider = %config.model.provider,
            error = %e,
            "failed to initialize default model provider, skipping"
        ),
    }

    for (id, cfg) in &config.providers {
        match crate::from_config(cfg) {
            Ok(provider) => {
                providers.insert(id.clone(), Arc::from(provider));
            }
            Err(e) => warn!(
                provider = %id,
                error = %e,
                "failed to initialize configured provider, skipping"
            ),
        }
    }

    ProviderRegistry { providers, config: config.clone() }
}
