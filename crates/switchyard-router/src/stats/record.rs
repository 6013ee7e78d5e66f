//! Usage records and statistics types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single routed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record ID
    pub id: u64,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Request id of the routed call
    pub request_id: String,
    /// Model id (the requested name when resolution failed)
    pub model: String,
    /// Provider, when a model was resolved
    pub provider: Option<String>,
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Cost (USD)
    pub cost: f64,
    /// Latency in milliseconds
    pub latency_ms: u64,
    /// Was the request successful?
    pub success: bool,
    /// Served from the cache
    pub cached: bool,
    /// Error message on failure
    pub error: Option<String>,
}

/// Per-model counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Routed requests
    pub requests: u64,
    /// Successful requests
    pub successes: u64,
    /// Failed requests
    pub failures: u64,
    /// Cache hits
    pub cached: u64,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Total cost
    pub cost: f64,
    /// Mean latency of successful requests (ms)
    pub avg_response_time_ms: f64,
}

/// Per-provider counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Routed requests
    pub requests: u64,
    /// Successful requests
    pub successes: u64,
    /// Failed requests
    pub failures: u64,
    /// Total tokens
    pub total_tokens: u64,
    /// Total cost
    pub cost: f64,
    /// Mean latency of successful requests (ms)
    pub avg_response_time_ms: f64,
}

/// Aggregated router statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatistics {
    /// Routed requests (cache hits excluded)
    pub total_requests: u64,
    /// Successful routed requests
    pub successful_requests: u64,
    /// Failed routed requests
    pub failed_requests: u64,
    /// Requests served from the cache
    pub cached_requests: u64,
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Total cost (USD)
    pub total_cost: f64,
    /// Mean latency of successful requests (ms)
    pub avg_response_time_ms: f64,
    /// successful / total, in percent
    pub success_rate: f64,
    /// cached / (total + cached), in percent
    pub cache_hit_rate: f64,
    /// Counters by model id
    pub by_model: BTreeMap<String, ModelStats>,
    /// Counters by provider family
    pub by_provider: BTreeMap<String, ProviderStats>,
    /// Start of the counting period
    pub since: DateTime<Utc>,
}

impl Default for RouterStatistics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            cached_requests: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
            avg_response_time_ms: 0.0,
            success_rate: 0.0,
            cache_hit_rate: 0.0,
            by_model: BTreeMap::new(),
            by_provider: BTreeMap::new(),
            since: Utc::now(),
        }
    }
}

/// Running mean after adding the `n`-th sample
pub(crate) fn running_mean(mean: f64, sample: f64, n: u64) -> f64 {
    if n <= 1 {
        sample
    } else {
        mean + (sample - mean) / n as f64
    }
}
