//! Model registry
//!
//! The in-memory catalogue is authoritative. Mutations signal a [`Notify`]
//! that the snapshot writer task waits on, so disk writes never sit on the
//! routing path.
//!
//! # Module Structure
//!
//! - `descriptor`: `ModelDescriptor` and the value types hanging off it
//! - `defaults`: built-in catalogue and alias table
//! - `store`: JSON snapshot load/save

mod defaults;
mod descriptor;
mod store;


pub use defaults::{
    builtin_aliases, builtin_models, ANTHROPIC_BASE_URL, GOOGLE_BASE_URL, INFINI_BASE_URL,
    MOONSHOT_BASE_URL, OPENAI_BASE_URL,
};
pub use descriptor::{
    ApiKey, Capabilities, Endpoint, EndpointSpec, GenerationDefaults, HealthSnapshot,
    HealthStatus, ModelDescriptor, ModelMetrics, ModelSummary, Pricing, ProviderFamily,
};
pub use store::RegistryStore;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts reported by [`ModelRegistry::summary`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    /// Models in the catalogue
    pub total: usize,
    /// Models with the enabled flag set
    pub enabled: usize,
    /// Enabled models whose credential resolved
    pub available: usize,
    /// Model count per provider family
    pub by_provider: BTreeMap<String, usize>,
}

/// Catalogue of routable backends
#[derive(Debug)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<String, ModelDescriptor>>,
    aliases: RwLock<HashMap<String, String>>,
    changed: Arc<Notify>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// Registry over the given descriptors, no aliases
    #[must_use]
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        Self {
            models: RwLock::new(
                models
                    .into_iter()
                    .map(|m| (m.model_id.clone(), m))
                    .collect(),
            ),
            aliases: RwLock::new(HashMap::new()),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Built-in catalogue with the built-in alias table
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_models()).with_aliases(builtin_aliases())
    }

    /// Built-in catalogue overlaid with the snapshot in `store`
    ///
    /// An unreadable snapshot is logged and the built-in catalogue used as is.
    #[must_use]
    pub fn load(store: &RegistryStore) -> Self {
        let mut models: BTreeMap<String, ModelDescriptor> = builtin_models()
            .into_iter()
            .map(|m| (m.model_id.clone(), m))
            .collect();
        if let Err(e) = store.load_into(&mut models) {
            warn!(path = ?store.path(), error = %e, "Ignoring registry snapshot");
        }
        Self::new(models.into_values()).with_aliases(builtin_aliases())
    }

    /// Add aliases (later entries win)
    #[must_use]
    pub fn with_aliases(self, aliases: HashMap<String, String>) -> Self {
        self.write_aliases().extend(aliases);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ModelDescriptor>> {
        self.models.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ModelDescriptor>> {
        self.models.write().unwrap_or_else(|e| e.into_inner())
    }

    fn write_aliases(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.aliases.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<F: FnOnce(&mut ModelDescriptor)>(&self, model_id: &str, f: F) -> bool {
        let found = match self.write().get_mut(model_id) {
            Some(descriptor) => {
                f(descriptor);
                true
            }
            None => false,
        };
        if found {
            self.changed.notify_one();
        }
        found
    }

    /// Resolve credentials for every model from the environment
    ///
    /// Models whose credential is missing stay in the catalogue but are not
    /// available for routing. Returns the ids that failed.
    pub fn resolve_credentials(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for descriptor in self.write().values_mut() {
            if let Err(e) = descriptor.resolve_credentials() {
                if descriptor.enabled {
                    warn!(model = %descriptor.model_id, error = %e, "Model unavailable");
                }
                failed.push(descriptor.model_id.clone());
            }
        }
        failed
    }

    /// Get a descriptor by id
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.read().get(model_id).cloned()
    }

    /// Whether the id is in the catalogue
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.read().contains_key(model_id)
    }

    /// Enabled with a resolved credential
    #[must_use]
    pub fn is_available(&self, model_id: &str) -> bool {
        self.read().get(model_id).is_some_and(ModelDescriptor::is_available)
    }

    /// All descriptors, ordered by id
    #[must_use]
    pub fn all(&self) -> Vec<ModelDescriptor> {
        self.read().values().cloned().collect()
    }

    /// Descriptors eligible for routing, ordered by id
    #[must_use]
    pub fn available(&self) -> Vec<ModelDescriptor> {
        self.read()
            .values()
            .filter(|m| m.is_available())
            .cloned()
            .collect()
    }

    /// Insert or replace a descriptor
    pub fn upsert(&self, descriptor: ModelDescriptor) {
        debug!(model = %descriptor.model_id, "Registering model");
        self.write().insert(descriptor.model_id.clone(), descriptor);
        self.changed.notify_one();
    }

    /// Set the enabled flag. Returns false for unknown ids.
    pub fn set_enabled(&self, model_id: &str, enabled: bool) -> bool {
        let changed = self.mutate(model_id, |d| d.enabled = enabled);
        if changed {
            info!(model = %model_id, enabled, "Model enabled flag changed");
        }
        changed
    }

    /// Fold a successful call into the model's rolling metrics
    pub fn record_success(&self, model_id: &str, latency_ms: f64) {
        self.mutate(model_id, |d| d.metrics.record_success(latency_ms));
    }

    /// Fold a failed call into the model's rolling metrics
    pub fn record_failure(&self, model_id: &str) {
        self.mutate(model_id, |d| d.metrics.record_failure());
    }

    /// Store a probe result, optionally disabling the model
    pub fn record_health(&self, model_id: &str, snapshot: HealthSnapshot, disable: bool) {
        self.mutate(model_id, |d| {
            d.health = snapshot;
            if disable {
                d.enabled = false;
            }
        });
    }

    /// Update the weight of the endpoint with this id, wherever it lives
    pub fn set_endpoint_weight(&self, endpoint_id: &str, weight: u32) -> bool {
        let found = {
            let mut models = self.write();
            let mut found = false;
            for descriptor in models.values_mut() {
                if descriptor.model_id == endpoint_id {
                    descriptor.weight = weight;
                    found = true;
                }
                for replica in descriptor.replicas.iter_mut().filter(|r| r.id == endpoint_id) {
                    replica.weight = weight;
                    found = true;
                }
            }
            found
        };
        if found {
            self.changed.notify_one();
        }
        found
    }

    /// Look up an alias target
    #[must_use]
    pub fn resolve_alias(&self, name: &str) -> Option<String> {
        self.aliases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Point `from` at `to`
    pub fn set_alias(&self, from: impl Into<String>, to: impl Into<String>) {
        self.write_aliases().insert(from.into(), to.into());
    }

    /// Per-model configuration problems; models without problems are omitted
    #[must_use]
    pub fn validate_configs(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .values()
            .filter_map(|m| {
                let errors = m.validate();
                (!errors.is_empty()).then(|| (m.model_id.clone(), errors))
            })
            .collect()
    }

    /// Catalogue counts
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let models = self.read();
        let mut summary = RegistrySummary {
            total: models.len(),
            ..Default::default()
        };
        for m in models.values() {
            if m.enabled {
                summary.enabled += 1;
            }
            if m.is_available() {
                summary.available += 1;
            }
            *summary
                .by_provider
                .entry(m.provider.as_str().to_string())
                .or_default() += 1;
        }
        summary
    }

    /// Copy of the catalogue for persistence
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ModelDescriptor> {
        self.read().clone()
    }

    /// Spawn the task that rewrites the snapshot after mutations
    ///
    /// Bursts of mutations coalesce into one write. A final write happens on
    /// cancellation.
    pub fn spawn_snapshot_writer(
        self: &Arc<Self>,
        store: RegistryStore,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let changed = Arc::clone(&self.changed);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = changed.notified() => {}
                }
                if let Err(e) = store.save(&registry.snapshot()).await {
                    warn!(error = %e, "Failed to write registry snapshot");
                }
            }
            if let Err(e) = store.save(&registry.snapshot()).await {
                warn!(error = %e, "Failed to write final registry snapshot");
            }
            debug!("Registry snapshot writer stopped");
        })
    }
}
