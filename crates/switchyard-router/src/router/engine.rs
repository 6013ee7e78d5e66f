//! RouterEngine implementation
//!
//! `route` runs: validate, cache lookup, model resolution, admission,
//! endpoint pick, dispatch, then bookkeeping. Bookkeeping always happens
//! before an error is returned.

use super::dispatch;
use super::health::HealthMonitor;
use super::selection::{detect_task_type, select_for_task};
use crate::balancer::{EndpointHealthState, HealthSummary, LoadBalancer};
use crate::cache::{fingerprint, CacheStats, CacheStore};
use crate::config::RouterConfig;
use crate::cost::CostAccountant;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::registry::{
    Endpoint, HealthSnapshot, ModelDescriptor, ModelRegistry, ModelSummary, RegistrySummary,
};
use crate::request::UnifiedRequest;
use crate::response::UnifiedResponse;
use crate::stats::{CallOutcome, RouterStatistics, StatsAggregator, UsageRecord};
use crate::transport::{HttpTransport, Transport};
use crate::util::{format_cost, format_response_time};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Model name used in statistics when the caller asked for none
const AUTO_MODEL: &str = "auto";

/// Summary returned by [`RouterEngine::status`]
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Seconds since the engine was built
    pub uptime_secs: u64,
    /// Catalogue counts
    pub models: RegistrySummary,
    /// Response cache enabled
    pub cache_enabled: bool,
    /// Load-balancing strategy
    pub strategy: String,
    /// Background health probes enabled
    pub health_checks_enabled: bool,
    /// Routed requests
    pub total_requests: u64,
    /// Success rate (%)
    pub success_rate: f64,
    /// Cache hit rate (%)
    pub cache_hit_rate: f64,
    /// Total cost, formatted
    pub total_cost: String,
    /// Mean response time, formatted
    pub avg_response_time: String,
    /// Endpoint health counts
    pub endpoints: HealthSummary,
    /// Last probe result per model
    pub health: BTreeMap<String, HealthSnapshot>,
}

/// Provider-agnostic routing engine
pub struct RouterEngine {
    config: RouterConfig,
    registry: Arc<ModelRegistry>,
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    limiter: RateLimiter,
    balancer: Arc<LoadBalancer>,
    cost: CostAccountant,
    stats: StatsAggregator,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl std::fmt::Debug for RouterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterEngine")
            .field("config", &self.config)
            .field("models", &self.registry.summary())
            .field("strategy", &self.balancer.strategy())
            .finish_non_exhaustive()
    }
}

impl RouterEngine {
    /// Create an engine over an existing registry and transport
    ///
    /// Config aliases are added to the registry and every known endpoint is
    /// registered with the balancer at its configured weight.
    #[must_use]
    pub fn new(
        config: RouterConfig,
        registry: Arc<ModelRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        for (from, to) in &config.aliases {
            registry.set_alias(from.clone(), to.clone());
        }

        let balancer = Arc::new(
            LoadBalancer::new(config.balancer.strategy)
                .with_failure_threshold(config.balancer.failure_threshold),
        );
        for model in registry.all() {
            for endpoint in model.endpoints() {
                balancer.add_endpoint(&endpoint.id, endpoint.weight);
            }
        }

        Self {
            cache: CacheStore::new(config.cache.max_size, config.cache_ttl()),
            limiter: RateLimiter::new(),
            cost: CostAccountant::new(config.routing.output_cost_weight),
            stats: StatsAggregator::new(),
            in_flight: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            balancer,
            registry,
            transport,
            config,
        }
    }

    /// Build from configuration: snapshot-backed catalogue, credentials from
    /// the environment, HTTP transport
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        let registry = if config.registry.persist {
            ModelRegistry::load(&config.registry.store()?)
        } else {
            ModelRegistry::builtin()
        };
        let unavailable = registry.resolve_credentials();
        if !unavailable.is_empty() {
            info!(count = unavailable.len(), models = ?unavailable, "Models without credentials");
        }
        let transport = HttpTransport::new()?;
        Ok(Self::new(config, Arc::new(registry), Arc::new(transport)))
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Shared registry handle
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route a request to the best available backend
    ///
    /// With `cache.single_flight` set, concurrent identical misses wait for
    /// the first one and are answered from the cache.
    #[instrument(skip(self, request), fields(request_id = %request.request_id, model = %request.model))]
    pub async fn route(&self, request: UnifiedRequest) -> Result<UnifiedResponse> {
        if let Err(e) = request.validate() {
            self.stats.record_failure(
                &request.request_id,
                requested_name(&request),
                None,
                0,
                &e.to_string(),
            );
            return Err(e);
        }

        let cache_key = self.cache_key(&request);
        if let Some(key) = cache_key.as_deref() {
            if let Some(hit) = self.cache_lookup(key, &request) {
                return Ok(hit);
            }
        }

        if !self.config.cache.single_flight {
            return self.route_uncached(&request, cache_key.as_deref()).await;
        }
        let Some(key) = cache_key else {
            return self.route_uncached(&request, None).await;
        };

        let flight = Flight::join(&self.in_flight, key);
        let _turn = flight.lock.lock().await;
        let result = match self.cache_lookup(&flight.key, &request) {
            Some(hit) => Ok(hit),
            None => self.route_uncached(&request, Some(&flight.key)).await,
        };
        result
    }

    fn cache_key(&self, request: &UnifiedRequest) -> Option<String> {
        if !self.config.cache.enabled || request.stream {
            return None;
        }
        match fingerprint(request) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Cache key unavailable, bypassing cache");
                None
            }
        }
    }

    fn cache_lookup(&self, key: &str, request: &UnifiedRequest) -> Option<UnifiedResponse> {
        let mut hit = self.cache.get(key)?;
        hit.cached = true;
        self.stats.record_cache_hit(&request.request_id, &hit.model);
        debug!(model = %hit.model, "Cache hit");
        Some(hit)
    }

    async fn route_uncached(
        &self,
        request: &UnifiedRequest,
        cache_key: Option<&str>,
    ) -> Result<UnifiedResponse> {
        let started = Instant::now();

        let model = match self.select_model(request) {
            Ok(model) => model,
            Err(e) => {
                warn!(error = %e, "Model resolution failed");
                self.stats.record_failure(
                    &request.request_id,
                    requested_name(request),
                    None,
                    elapsed_ms(started),
                    &e.to_string(),
                );
                return Err(e);
            }
        };

        let admitted = self
            .limiter
            .check_admit(&model.model_id, model.rate_limit_per_minute)
            .and_then(|()| self.select_endpoint(&model));
        let endpoint = match admitted {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(model = %model.model_id, error = %e, "Request not admitted");
                self.stats.record_failure(
                    &request.request_id,
                    &model.model_id,
                    Some(model.provider),
                    elapsed_ms(started),
                    &e.to_string(),
                );
                return Err(e);
            }
        };

        let in_flight = self.balancer.begin_request(&endpoint.id);
        let outcome = dispatch(
            self.transport.as_ref(),
            request,
            &model,
            &endpoint,
            self.config.request_timeout(),
        )
        .await;
        let latency_ms = elapsed_ms(started);

        match outcome {
            Ok(mut response) => {
                response.cost = self.cost.compute(&response.usage, &model.pricing);
                response.response_time_ms = latency_ms;
                response.cached = false;

                in_flight.finish(latency_ms as f64, true);
                self.registry.record_success(&model.model_id, latency_ms as f64);
                if let Some(key) = cache_key {
                    self.cache.set(key, response.clone(), None);
                }
                self.stats.record_success(&CallOutcome {
                    request_id: &request.request_id,
                    model: &model.model_id,
                    provider: model.provider,
                    usage: response.usage,
                    cost: response.cost,
                    latency_ms,
                });

                info!(
                    model = %model.model_id,
                    endpoint = %endpoint.id,
                    latency_ms,
                    cost = %format_cost(response.cost),
                    "Request routed"
                );
                Ok(response)
            }
            Err(e) => {
                if e.is_endpoint_failure() {
                    in_flight.finish(latency_ms as f64, false);
                } else {
                    drop(in_flight);
                }
                self.registry.record_failure(&model.model_id);
                self.stats.record_failure(
                    &request.request_id,
                    &model.model_id,
                    Some(model.provider),
                    latency_ms,
                    &e.to_string(),
                );
                warn!(model = %model.model_id, endpoint = %endpoint.id, error = %e, "Upstream call failed");
                Err(e)
            }
        }
    }

    /// Resolve the model for a request: exact id, then alias, then task
    pub fn select_model(&self, request: &UnifiedRequest) -> Result<ModelDescriptor> {
        if !request.model.is_empty() {
            if let Some(model) = self
                .registry
                .get(&request.model)
                .filter(ModelDescriptor::is_available)
            {
                return Ok(model);
            }
            if let Some(target) = self.registry.resolve_alias(&request.model) {
                if let Some(model) = self
                    .registry
                    .get(&target)
                    .filter(ModelDescriptor::is_available)
                {
                    debug!(alias = %request.model, target = %target, "Resolved alias");
                    return Ok(model);
                }
            }
        }

        let task = detect_task_type(request, self.config.routing.long_context_threshold);
        let models = self.registry.available();
        let chosen = select_for_task(&models, task, self.config.cost_ceiling()).cloned();
        match chosen {
            Some(model) => {
                debug!(task = %task, selected = %model.model_id, "Selected model by task");
                Ok(model)
            }
            None => Err(Error::NoAvailableModel(format!(
                "{} (task: {task})",
                requested_name(request)
            ))),
        }
    }

    #[cfg(test)]
    pub(super) fn in_flight_groups(&self) -> usize {
        self.in_flight.len()
    }

    /// Pick one of the model's endpoints
    pub fn select_endpoint(&self, model: &ModelDescriptor) -> Result<Endpoint> {
        let mut endpoints = model.endpoints();
        let ids: Vec<String> = endpoints.iter().map(|e| e.id.clone()).collect();
        let chosen = self
            .balancer
            .pick(&ids)
            .and_then(|id| endpoints.iter().position(|e| e.id == id))
            .map(|idx| endpoints.swap_remove(idx))
            .ok_or_else(|| Error::NoAvailableModel(format!("{}: no endpoint", model.model_id)))?;
        Ok(chosen)
    }

    // ========================================================================
    // Management
    // ========================================================================

    /// Summaries of every model eligible for routing
    #[must_use]
    pub fn list_available_models(&self) -> Vec<ModelSummary> {
        self.registry
            .available()
            .iter()
            .map(ModelSummary::from)
            .collect()
    }

    /// Statistics snapshot
    #[must_use]
    pub fn get_stats(&self) -> RouterStatistics {
        self.stats.get_stats()
    }

    /// Most recent usage records, oldest first
    #[must_use]
    pub fn recent_records(&self, limit: usize) -> Vec<UsageRecord> {
        self.stats.recent_records(limit)
    }

    /// Zero the statistics
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Route requests for `from` to `to`
    ///
    /// Returns false when `to` is unknown or unavailable. Takes effect for
    /// names that do not themselves resolve to an available model.
    pub fn switch_model(&self, from: &str, to: &str) -> bool {
        match self.registry.get(to) {
            None => {
                warn!(target_model = %to, "Switch target does not exist");
                false
            }
            Some(model) if !model.is_available() => {
                warn!(target_model = %to, "Switch target is not available");
                false
            }
            Some(_) => {
                self.registry.set_alias(from, to);
                info!(from = %from, to = %to, "Model switched");
                true
            }
        }
    }

    /// Enable or disable a model. Returns false for unknown ids.
    ///
    /// Enabling also clears the balancer's unhealthy mark on its endpoints.
    pub fn set_model_enabled(&self, model_id: &str, enabled: bool) -> bool {
        if !self.registry.set_enabled(model_id, enabled) {
            return false;
        }
        if enabled {
            if let Some(model) = self.registry.get(model_id) {
                for id in model.endpoint_ids() {
                    self.balancer.mark_healthy(&id);
                }
            }
        }
        true
    }

    /// Change an endpoint's balancing weight. Returns false for unknown ids.
    pub fn update_endpoint_weight(&self, endpoint_id: &str, weight: u32) -> bool {
        if self.registry.set_endpoint_weight(endpoint_id, weight) {
            self.balancer.add_endpoint(endpoint_id, weight);
            true
        } else {
            self.balancer.update_weight(endpoint_id, weight)
        }
    }

    /// Response cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Per-endpoint balancer state, sorted by id
    #[must_use]
    pub fn endpoint_stats(&self) -> Vec<EndpointHealthState> {
        self.balancer.all_endpoint_stats()
    }

    /// Share of completed requests per endpoint (%)
    #[must_use]
    pub fn load_distribution(&self) -> BTreeMap<String, f64> {
        self.balancer.load_distribution()
    }

    /// Catalogue problems per model
    #[must_use]
    pub fn validate_configs(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.validate_configs()
    }

    /// Engine-wide status summary
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let stats = self.stats.get_stats();
        EngineStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            models: self.registry.summary(),
            cache_enabled: self.config.cache.enabled,
            strategy: self.balancer.strategy().as_str().to_string(),
            health_checks_enabled: self.config.health.enabled,
            total_requests: stats.total_requests,
            success_rate: stats.success_rate,
            cache_hit_rate: stats.cache_hit_rate,
            total_cost: format_cost(stats.total_cost),
            avg_response_time: format_response_time(stats.avg_response_time_ms / 1000.0),
            endpoints: self.balancer.health_summary(),
            health: self
                .registry
                .all()
                .into_iter()
                .map(|m| (m.model_id, m.health))
                .collect(),
        }
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Health monitor sharing this engine's registry, balancer and transport
    #[must_use]
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.balancer),
            Arc::clone(&self.transport),
            self.config.health_interval(),
            self.config.probe_timeout(),
        )
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Start periodic health probes. Returns false when disabled in config.
    pub fn spawn_health_monitor(&self) -> bool {
        if !self.config.health.enabled {
            return false;
        }
        let handle = Arc::new(self.health_monitor()).spawn(self.shutdown.child_token());
        self.track(handle);
        true
    }

    /// Start the registry snapshot writer. Returns false when disabled in config.
    pub fn spawn_persistence(&self) -> Result<bool> {
        if !self.config.registry.persist {
            return Ok(false);
        }
        let store = self.config.registry.store()?;
        let handle = self
            .registry
            .spawn_snapshot_writer(store, self.shutdown.child_token());
        self.track(handle);
        Ok(true)
    }

    /// Start every background task enabled in config
    pub fn start(&self) -> Result<()> {
        let health = self.spawn_health_monitor();
        let persistence = self.spawn_persistence()?;
        info!(health, persistence, "Router engine started");
        Ok(())
    }

    /// Cancel background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Router engine stopped");
    }
}

/// Membership in a single-flight group keyed by cache fingerprint
///
/// The group entry is removed when its last member leaves, whether the
/// member finished or was dropped mid-route.
struct Flight<'a> {
    groups: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: String,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(groups: &'a DashMap<String, Arc<AsyncMutex<()>>>, key: String) -> Self {
        let lock = groups
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Self { groups, key, lock }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // the map entry and this handle are the only owners left
        self.groups.remove_if(&self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

fn requested_name(request: &UnifiedRequest) -> &str {
    if request.model.is_empty() {
        AUTO_MODEL
    } else {
        &request.model
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
