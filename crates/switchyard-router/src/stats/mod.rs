//! Usage statistics
//!
//! Counters grow monotonically until [`StatsAggregator::reset`]. A bounded log
//! of recent [`UsageRecord`]s is kept next to them.
//!
//! # Module Structure
//!
//! - `record`: record and statistics types

mod record;


pub use record::{ModelStats, ProviderStats, RouterStatistics, UsageRecord};

use crate::registry::ProviderFamily;
use crate::response::TokenUsage;
use chrono::Utc;
use record::running_mean;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Maximum records to keep in memory by default
const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug, Default)]
struct StatsInner {
    stats: RouterStatistics,
    records: VecDeque<UsageRecord>,
}

/// Outcome of one upstream call, as fed to [`StatsAggregator::record_success`]
#[derive(Debug, Clone)]
pub struct CallOutcome<'a> {
    /// Request id
    pub request_id: &'a str,
    /// Resolved model id
    pub model: &'a str,
    /// Provider that served the call
    pub provider: ProviderFamily,
    /// Token usage
    pub usage: TokenUsage,
    /// Cost (USD)
    pub cost: f64,
    /// Round trip (ms)
    pub latency_ms: u64,
}

/// Rolling counters, global and per model/provider
#[derive(Debug)]
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
    next_id: AtomicU64,
    max_records: usize,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            next_id: AtomicU64::new(1),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    /// Create with custom max records
    #[must_use]
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_record(&self, inner: &mut StatsInner, record: UsageRecord) {
        inner.records.push_back(record);
        while inner.records.len() > self.max_records {
            inner.records.pop_front();
        }
    }

    /// Record a successful upstream call
    pub fn record_success(&self, outcome: &CallOutcome<'_>) {
        let latency = outcome.latency_ms as f64;
        let provider = outcome.provider.as_str();
        let mut inner = self.lock();

        let stats = &mut inner.stats;
        stats.total_requests += 1;
        stats.successful_requests += 1;
        stats.total_input_tokens += u64::from(outcome.usage.input_tokens);
        stats.total_output_tokens += u64::from(outcome.usage.output_tokens);
        stats.total_cost += outcome.cost;
        stats.avg_response_time_ms =
            running_mean(stats.avg_response_time_ms, latency, stats.successful_requests);

        let model = stats.by_model.entry(outcome.model.to_string()).or_default();
        model.requests += 1;
        model.successes += 1;
        model.input_tokens += u64::from(outcome.usage.input_tokens);
        model.output_tokens += u64::from(outcome.usage.output_tokens);
        model.cost += outcome.cost;
        model.avg_response_time_ms =
            running_mean(model.avg_response_time_ms, latency, model.successes);

        let by_provider = stats.by_provider.entry(provider.to_string()).or_default();
        by_provider.requests += 1;
        by_provider.successes += 1;
        by_provider.total_tokens += u64::from(outcome.usage.total_tokens);
        by_provider.cost += outcome.cost;
        by_provider.avg_response_time_ms =
            running_mean(by_provider.avg_response_time_ms, latency, by_provider.successes);

        let record = UsageRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            request_id: outcome.request_id.to_string(),
            model: outcome.model.to_string(),
            provider: Some(provider.to_string()),
            input_tokens: outcome.usage.input_tokens,
            output_tokens: outcome.usage.output_tokens,
            cost: outcome.cost,
            latency_ms: outcome.latency_ms,
            success: true,
            cached: false,
            error: None,
        };
        self.push_record(&mut inner, record);
    }

    /// Record a failed routed request with zero cost
    ///
    /// `provider` is `None` when the failure happened before a model was
    /// resolved; `model` is then the requested name.
    pub fn record_failure(
        &self,
        request_id: &str,
        model: &str,
        provider: Option<ProviderFamily>,
        latency_ms: u64,
        error: &str,
    ) {
        let mut inner = self.lock();

        let stats = &mut inner.stats;
        stats.total_requests += 1;
        stats.failed_requests += 1;

        let by_model = stats.by_model.entry(model.to_string()).or_default();
        by_model.requests += 1;
        by_model.failures += 1;

        if let Some(p) = provider {
            let by_provider = stats.by_provider.entry(p.as_str().to_string()).or_default();
            by_provider.requests += 1;
            by_provider.failures += 1;
        }

        let record = UsageRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            model: model.to_string(),
            provider: provider.map(|p| p.as_str().to_string()),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            latency_ms,
            success: false,
            cached: false,
            error: Some(error.to_string()),
        };
        self.push_record(&mut inner, record);
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self, request_id: &str, model: &str) {
        let mut inner = self.lock();
        inner.stats.cached_requests += 1;
        inner
            .stats
            .by_model
            .entry(model.to_string())
            .or_default()
            .cached += 1;

        let record = UsageRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            model: model.to_string(),
            provider: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            latency_ms: 0,
            success: true,
            cached: true,
            error: None,
        };
        self.push_record(&mut inner, record);
    }

    /// Statistics snapshot with derived rates filled in
    #[must_use]
    pub fn get_stats(&self) -> RouterStatistics {
        let mut stats = self.lock().stats.clone();
        stats.success_rate = if stats.total_requests == 0 {
            0.0
        } else {
            stats.successful_requests as f64 / stats.total_requests as f64 * 100.0
        };
        let lookups = stats.total_requests + stats.cached_requests;
        stats.cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            stats.cached_requests as f64 / lookups as f64 * 100.0
        };
        stats
    }

    /// Most recent records, oldest first
    #[must_use]
    pub fn recent_records(&self, limit: usize) -> Vec<UsageRecord> {
        let inner = self.lock();
        let start = inner.records.len().saturating_sub(limit);
        inner.records.iter().skip(start).cloned().collect()
    }

    /// Zero every counter and drop the record log
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.stats = RouterStatistics::default();
        inner.records.clear();
    }
}
