//! Endpoint load balancer
//!
//! Holds one [`EndpointHealthState`] per endpoint id. `pick` only considers
//! healthy candidates; when none are healthy it degrades to the candidate with
//! the fewest consecutive failures so that a request still goes out.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};


/// Consecutive failures that mark an endpoint unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Endpoint selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through healthy endpoints
    #[default]
    RoundRobin,
    /// Fewest requests in flight
    LeastConnections,
    /// Cycle through healthy endpoints repeated by weight
    WeightedRoundRobin,
    /// Uniform random
    Random,
    /// Lowest rolling latency
    LeastResponseTime,
    /// Best composite of success rate, latency and load
    HealthBased,
}

impl Strategy {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::Random => "random",
            Self::LeastResponseTime => "least_response_time",
            Self::HealthBased => "health_based",
        }
    }
}

/// Live state of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointHealthState {
    /// Endpoint id
    pub endpoint_id: String,
    /// Weight for weighted round robin
    pub weight: u32,
    /// Requests currently in flight
    pub active_requests: u32,
    /// Completed requests
    pub total_requests: u64,
    /// Completed successfully
    pub successful_requests: u64,
    /// Completed with a failure
    pub failed_requests: u64,
    /// Rolling average latency (ms)
    pub avg_response_time_ms: f64,
    /// Eligible for normal selection
    pub is_healthy: bool,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last time a request started
    pub last_request_at: Option<DateTime<Utc>>,
}

impl EndpointHealthState {
    fn new(endpoint_id: &str, weight: u32) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            weight,
            active_requests: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0.0,
            is_healthy: true,
            consecutive_failures: 0,
            last_request_at: None,
        }
    }

    /// Success rate in percent; 100 before any request completes
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }

    /// Composite score used by [`Strategy::HealthBased`]
    #[must_use]
    pub fn health_score(&self) -> f64 {
        let latency_secs = self.avg_response_time_ms / 1000.0;
        let latency_score = 100.0 - (latency_secs * 10.0).min(100.0);
        let load_score = 100.0 - (f64::from(self.active_requests) * 5.0).min(100.0);
        self.success_rate() * 0.5 + latency_score * 0.3 + load_score * 0.2
    }

    fn reset_counters(&mut self) {
        *self = Self::new(&self.endpoint_id, self.weight);
    }
}

/// Endpoint health overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    /// Registered endpoints
    pub total: usize,
    /// Currently healthy
    pub healthy: usize,
    /// Ids of unhealthy endpoints, sorted
    pub unhealthy: Vec<String>,
}

/// A request started on an endpoint, released on drop
#[derive(Debug)]
#[must_use = "dropping the handle releases the request immediately"]
pub struct InFlightRequest<'a> {
    balancer: &'a LoadBalancer,
    endpoint_id: String,
    finished: bool,
}

impl InFlightRequest<'_> {
    /// Endpoint the request runs on
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// End the request with its outcome
    pub fn finish(mut self, latency_ms: f64, success: bool) {
        self.finished = true;
        self.balancer.end_request(&self.endpoint_id, latency_ms, success);
    }
}

impl Drop for InFlightRequest<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.balancer.cancel_request(&self.endpoint_id);
        }
    }
}

#[derive(Debug, Default)]
struct BalancerInner {
    endpoints: HashMap<String, EndpointHealthState>,
    counter: usize,
}

/// Picks one endpoint among candidates
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: Mutex<Strategy>,
    inner: Mutex<BalancerInner>,
    failure_threshold: u32,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl LoadBalancer {
    /// Create a balancer with the given strategy
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy: Mutex::new(strategy),
            inner: Mutex::new(BalancerInner::default()),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Override the consecutive failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BalancerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current strategy
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch strategy at runtime
    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner()) = strategy;
        info!(strategy = strategy.as_str(), "Load balancing strategy changed");
    }

    /// Register an endpoint, or update the weight of a known one
    pub fn add_endpoint(&self, endpoint_id: &str, weight: u32) {
        self.lock()
            .endpoints
            .entry(endpoint_id.to_string())
            .and_modify(|e| e.weight = weight)
            .or_insert_with(|| EndpointHealthState::new(endpoint_id, weight));
    }

    /// Forget an endpoint
    pub fn remove_endpoint(&self, endpoint_id: &str) -> bool {
        self.lock().endpoints.remove(endpoint_id).is_some()
    }

    /// Pick an endpoint id from `candidates`
    ///
    /// Unknown candidates are registered with weight 1.
    pub fn pick(&self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let strategy = self.strategy();
        let mut inner = self.lock();

        for id in candidates {
            inner
                .endpoints
                .entry(id.clone())
                .or_insert_with(|| EndpointHealthState::new(id, 1));
        }

        let healthy: Vec<&EndpointHealthState> = candidates
            .iter()
            .filter_map(|id| inner.endpoints.get(id))
            .filter(|e| e.is_healthy)
            .collect();

        if healthy.is_empty() {
            let fallback = candidates
                .iter()
                .filter_map(|id| inner.endpoints.get(id))
                .min_by_key(|e| e.consecutive_failures)
                .map(|e| e.endpoint_id.clone());
            warn!(
                endpoint = ?fallback,
                "No healthy endpoint, selecting in degraded mode"
            );
            return fallback;
        }

        let chosen = match strategy {
            Strategy::RoundRobin => {
                let idx = inner.counter % healthy.len();
                Some(healthy[idx].endpoint_id.clone())
            }
            Strategy::WeightedRoundRobin => {
                let expanded: Vec<&str> = healthy
                    .iter()
                    .flat_map(|e| std::iter::repeat(e.endpoint_id.as_str()).take(e.weight as usize))
                    .collect();
                if expanded.is_empty() {
                    Some(healthy[inner.counter % healthy.len()].endpoint_id.clone())
                } else {
                    Some(expanded[inner.counter % expanded.len()].to_string())
                }
            }
            Strategy::LeastConnections => healthy
                .iter()
                .min_by_key(|e| e.active_requests)
                .map(|e| e.endpoint_id.clone()),
            Strategy::Random => {
                let idx = rand::thread_rng().gen_range(0..healthy.len());
                Some(healthy[idx].endpoint_id.clone())
            }
            Strategy::LeastResponseTime => healthy
                .iter()
                .min_by(|a, b| a.avg_response_time_ms.total_cmp(&b.avg_response_time_ms))
                .map(|e| e.endpoint_id.clone()),
            Strategy::HealthBased => healthy
                .iter()
                .copied()
                .fold(None::<&EndpointHealthState>, |best, e| match best {
                    Some(b) if b.health_score() >= e.health_score() => Some(b),
                    _ => Some(e),
                })
                .map(|e| e.endpoint_id.clone()),
        };

        if matches!(
            strategy,
            Strategy::RoundRobin | Strategy::WeightedRoundRobin
        ) {
            inner.counter = inner.counter.wrapping_add(1);
        }

        debug!(strategy = strategy.as_str(), endpoint = ?chosen, "Endpoint selected");
        chosen
    }

    /// Mark a request as started on an endpoint
    pub fn start_request(&self, endpoint_id: &str) {
        let mut inner = self.lock();
        let state = inner
            .endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| EndpointHealthState::new(endpoint_id, 1));
        state.active_requests += 1;
        state.last_request_at = Some(Utc::now());
    }

    /// Start a request and return a handle that ends it
    ///
    /// Dropping the handle without [`InFlightRequest::finish`] releases the
    /// request without recording an outcome.
    pub fn begin_request(&self, endpoint_id: &str) -> InFlightRequest<'_> {
        self.start_request(endpoint_id);
        InFlightRequest {
            balancer: self,
            endpoint_id: endpoint_id.to_string(),
            finished: false,
        }
    }

    /// Release a started request that never completed
    ///
    /// Only the in-flight count changes; totals, latency and health are
    /// left alone since the endpoint never answered.
    pub fn cancel_request(&self, endpoint_id: &str) {
        if let Some(state) = self.lock().endpoints.get_mut(endpoint_id) {
            state.active_requests = state.active_requests.saturating_sub(1);
            debug!(endpoint = %endpoint_id, "Request abandoned");
        }
    }

    /// Mark a request as finished and fold in its outcome
    pub fn end_request(&self, endpoint_id: &str, latency_ms: f64, success: bool) {
        let threshold = self.failure_threshold;
        let mut inner = self.lock();
        let Some(state) = inner.endpoints.get_mut(endpoint_id) else {
            return;
        };

        state.active_requests = state.active_requests.saturating_sub(1);
        state.total_requests += 1;
        state.avg_response_time_ms = if state.total_requests == 1 {
            latency_ms
        } else {
            state.avg_response_time_ms * 0.9 + latency_ms * 0.1
        };

        if success {
            state.successful_requests += 1;
            state.consecutive_failures = 0;
            if !state.is_healthy {
                info!(endpoint = %endpoint_id, "Endpoint recovered");
            }
            state.is_healthy = true;
        } else {
            state.failed_requests += 1;
            state.consecutive_failures += 1;
            if state.is_healthy && state.consecutive_failures >= threshold {
                state.is_healthy = false;
                warn!(
                    endpoint = %endpoint_id,
                    failures = state.consecutive_failures,
                    "Endpoint marked unhealthy"
                );
            }
        }
    }

    /// Force an endpoint healthy
    pub fn mark_healthy(&self, endpoint_id: &str) {
        if let Some(state) = self.lock().endpoints.get_mut(endpoint_id) {
            state.is_healthy = true;
            state.consecutive_failures = 0;
        }
    }

    /// Force an endpoint unhealthy
    pub fn mark_unhealthy(&self, endpoint_id: &str) {
        if let Some(state) = self.lock().endpoints.get_mut(endpoint_id) {
            state.is_healthy = false;
        }
    }

    /// Change an endpoint's weight. Returns false for unknown ids.
    pub fn update_weight(&self, endpoint_id: &str, weight: u32) -> bool {
        match self.lock().endpoints.get_mut(endpoint_id) {
            Some(state) => {
                state.weight = weight;
                true
            }
            None => false,
        }
    }

    /// Zero the counters of one endpoint, or of all of them
    pub fn reset_endpoint_stats(&self, endpoint_id: Option<&str>) {
        let mut inner = self.lock();
        match endpoint_id {
            Some(id) => {
                if let Some(state) = inner.endpoints.get_mut(id) {
                    state.reset_counters();
                }
            }
            None => inner
                .endpoints
                .values_mut()
                .for_each(EndpointHealthState::reset_counters),
        }
    }

    /// State of one endpoint
    #[must_use]
    pub fn endpoint_stats(&self, endpoint_id: &str) -> Option<EndpointHealthState> {
        self.lock().endpoints.get(endpoint_id).cloned()
    }

    /// State of every endpoint, sorted by id
    #[must_use]
    pub fn all_endpoint_stats(&self) -> Vec<EndpointHealthState> {
        let mut all: Vec<_> = self.lock().endpoints.values().cloned().collect();
        all.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        all
    }

    /// Share of completed requests per endpoint, in percent
    #[must_use]
    pub fn load_distribution(&self) -> BTreeMap<String, f64> {
        let inner = self.lock();
        let total: u64 = inner.endpoints.values().map(|e| e.total_requests).sum();
        inner
            .endpoints
            .values()
            .map(|e| {
                let share = if total == 0 {
                    0.0
                } else {
                    e.total_requests as f64 / total as f64 * 100.0
                };
                (e.endpoint_id.clone(), share)
            })
            .collect()
    }

    /// Healthy/unhealthy counts
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        let inner = self.lock();
        let mut unhealthy: Vec<String> = inner
            .endpoints
            .values()
            .filter(|e| !e.is_healthy)
            .map(|e| e.endpoint_id.clone())
            .collect();
        unhealthy.sort();
        HealthSummary {
            total: inner.endpoints.len(),
            healthy: inner.endpoints.len() - unhealthy.len(),
            unhealthy,
        }
    }
}
