//! Router configuration
//!
//! Loaded in layers: embedded defaults, then optional `config/switchyard`
//! and `config/local` files, then `SWITCHYARD_*` environment variables
//! (`SWITCHYARD_CACHE__TTL_SECS=600`).

use crate::balancer::{Strategy, DEFAULT_FAILURE_THRESHOLD};
use crate::error::{Error, Result};
use crate::registry::RegistryStore;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache non-streaming responses
    pub enabled: bool,
    /// Entry lifetime
    pub ttl_secs: u64,
    /// Maximum entries
    pub max_size: usize,
    /// Collapse concurrent identical misses into one upstream call
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_size: 1000,
            single_flight: false,
        }
    }
}

/// Load balancer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection strategy
    pub strategy: Strategy,
    /// Consecutive failures before an endpoint is marked unhealthy
    pub failure_threshold: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RoundRobin,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the background probe loop
    pub enabled: bool,
    /// Seconds between probe rounds
    pub interval_secs: u64,
    /// Deadline for a single probe
    pub probe_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            probe_timeout_secs: 10,
        }
    }
}

/// Model selection and request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Deadline for one upstream call
    pub request_timeout_secs: u64,
    /// Apply the per-request cost ceiling during task-based selection
    pub cost_optimization: bool,
    /// Highest per-1K price a task-selected model may have
    pub max_cost_per_request: f64,
    /// Characters of message text above which a request is long-context
    pub long_context_threshold: usize,
    /// Multiplier on the output price
    pub output_cost_weight: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            cost_optimization: true,
            max_cost_per_request: 1.0,
            long_context_threshold: 50_000,
            output_cost_weight: crate::cost::DEFAULT_OUTPUT_WEIGHT,
        }
    }
}

/// Registry snapshot settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Write the snapshot after mutations
    pub persist: bool,
    /// Snapshot location (defaults to `~/.switchyard/models.json`)
    pub snapshot_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            persist: true,
            snapshot_path: None,
        }
    }
}

impl RegistryConfig {
    /// Store for the configured snapshot path
    pub fn store(&self) -> Result<RegistryStore> {
        match &self.snapshot_path {
            Some(path) => Ok(RegistryStore::with_path(path)),
            None => RegistryStore::new(),
        }
    }
}

/// Complete router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Response cache
    pub cache: CacheConfig,
    /// Load balancer
    pub balancer: BalancerConfig,
    /// Health monitor
    pub health: HealthConfig,
    /// Selection and requests
    pub routing: RoutingConfig,
    /// Registry snapshot
    pub registry: RegistryConfig,
    /// Extra model aliases (override the built-in ones)
    pub aliases: HashMap<String, String>,
}

impl RouterConfig {
    /// Cache TTL
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Upstream request deadline
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.routing.request_timeout_secs.max(1))
    }

    /// Health probe interval
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs.max(1))
    }

    /// Health probe deadline
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.probe_timeout_secs.max(1))
    }

    /// Cost ceiling for task-based selection, when cost optimization is on
    #[must_use]
    pub fn cost_ceiling(&self) -> Option<f64> {
        self.routing
            .cost_optimization
            .then_some(self.routing.max_cost_per_request)
    }

    /// Disable the cache
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    /// Disable background health probes
    #[must_use]
    pub fn without_health_checks(mut self) -> Self {
        self.health.enabled = false;
        self
    }

    /// Disable snapshot persistence
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.registry.persist = false;
        self
    }

    /// Set the balancing strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.balancer.strategy = strategy;
        self
    }
}

fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<RouterConfig> {
    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build configuration: {e}")))?
        .try_deserialize()
        .map_err(|e| Error::Config(format!("failed to deserialize configuration: {e}")))
}

/// Load configuration from embedded defaults, files, and environment
pub fn load_config() -> Result<RouterConfig> {
    from_builder(
        Config::builder()
            // 1. Embedded defaults (always available)
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            // 2. External overrides (optional)
            .add_source(File::with_name("config/switchyard").required(false))
            .add_source(File::with_name("config/local").required(false))
            // 3. Environment variables (highest priority)
            .add_source(
                Environment::with_prefix("SWITCHYARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}

/// Load embedded defaults overlaid with a TOML string (no files, no environment)
pub fn load_config_from_str(toml: &str) -> Result<RouterConfig> {
    from_builder(
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(toml, FileFormat::Toml)),
    )
}
