//! Model descriptor types
//!
//! A [`ModelDescriptor`] is the static-plus-mutable record of one logical
//! backend model. The static half comes from the built-in catalogue or the
//! registry snapshot; the mutable half (enabled flag, rolling metrics, last
//! probe) is updated by the engine and the health monitor.

use crate::error::{Error, Result};
use crate::util::mask_api_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Wire protocol family of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI Chat Completions API
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Generative Language API
    Google,
    /// Moonshot (OpenAI-compatible)
    Moonshot,
}

impl ProviderFamily {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Moonshot => "moonshot",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved API credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key for building request headers
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

// SECURITY: Custom Debug implementation to mask API key
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", mask_api_key(&self.0))
    }
}

/// Price per 1K tokens in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Input (prompt) price per 1K tokens
    pub input_per_1k: f64,
    /// Output (completion) price per 1K tokens
    pub output_per_1k: f64,
}

impl Pricing {
    /// Same price for input and output tokens
    #[must_use]
    pub fn flat(per_1k: f64) -> Self {
        Self {
            input_per_1k: per_1k,
            output_per_1k: per_1k,
        }
    }
}

/// Capability flags used by task-based selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Accepts image input
    pub vision: bool,
    /// Supports tool/function calling
    pub function_calling: bool,
    /// Supports streamed output
    pub streaming: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            vision: false,
            function_calling: false,
            streaming: true,
        }
    }
}

/// Generation parameters used when the request leaves them unset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    /// Default max output tokens
    pub max_tokens: u32,
    /// Default temperature
    pub temperature: f32,
    /// Default top-p
    pub top_p: f32,
    /// Default frequency penalty
    pub frequency_penalty: f32,
    /// Default presence penalty
    pub presence_penalty: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// Rolling performance metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Exponential moving average of response time (ms)
    pub avg_response_time_ms: f64,
    /// Success rate in percent (0-100)
    pub success_rate: f64,
    /// Last successful use
    pub last_used: Option<DateTime<Utc>>,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            success_rate: 100.0,
            last_used: None,
        }
    }
}

impl ModelMetrics {
    /// Fold in a successful call
    pub fn record_success(&mut self, latency_ms: f64) {
        self.avg_response_time_ms = if self.avg_response_time_ms == 0.0 {
            latency_ms
        } else {
            self.avg_response_time_ms * 0.9 + latency_ms * 0.1
        };
        self.success_rate = (self.success_rate * 0.99 + 1.0).min(100.0);
        self.last_used = Some(Utc::now());
    }

    /// Fold in a failed call
    pub fn record_failure(&mut self) {
        self.success_rate = (self.success_rate * 0.99).max(0.0);
    }
}

/// Outcome of a health probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Never probed
    #[default]
    Unknown,
    /// Last probe succeeded
    Healthy,
    /// Last probe failed
    Unhealthy,
}

/// Last health probe result for a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Probe outcome
    pub status: HealthStatus,
    /// Probe round trip (ms)
    pub latency_ms: Option<u64>,
    /// When the probe ran
    pub checked_at: Option<DateTime<Utc>>,
    /// Failure reason
    pub error: Option<String>,
}

/// An additional redundant endpoint serving the same model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Unique endpoint id
    pub id: String,
    /// Base URL
    pub base_url: String,
    /// Environment variable holding this endpoint's key (falls back to the model's)
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Load-balancer weight
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Key read from `credential_env`, never persisted
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

fn default_weight() -> u32 {
    1
}

impl EndpointSpec {
    /// Replica at `base_url` with weight 1, sharing the model's credential
    #[must_use]
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            credential_env: None,
            weight: default_weight(),
            api_key: None,
        }
    }

    /// Read this replica's key from its own environment variable
    #[must_use]
    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    /// Set the balancer weight
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// A concrete network destination for a model, credentials resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Unique endpoint id (the model id for the primary endpoint)
    pub id: String,
    /// Base URL
    pub base_url: String,
    /// Credential, when resolved
    pub api_key: Option<ApiKey>,
    /// Load-balancer weight
    pub weight: u32,
}

/// Catalogue entry for one logical backend model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique registry key
    pub model_id: String,
    /// Name sent on the wire when it differs from the registry key
    #[serde(default)]
    pub upstream_model: Option<String>,
    /// Wire protocol family
    pub provider: ProviderFamily,
    /// Primary endpoint base URL
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Resolved key (never persisted)
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
    /// Default generation parameters
    #[serde(default)]
    pub defaults: GenerationDefaults,
    /// Token pricing
    pub pricing: Pricing,
    /// Admission limit (requests per minute)
    pub rate_limit_per_minute: u32,
    /// Eligible for routing
    pub enabled: bool,
    /// Lower is preferred
    pub priority: u32,
    /// Capability flags
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Context window in tokens
    pub context_window: u64,
    /// Load-balancer weight of the primary endpoint
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Redundant endpoints
    #[serde(default)]
    pub replicas: Vec<EndpointSpec>,
    /// Rolling metrics
    #[serde(default)]
    pub metrics: ModelMetrics,
    /// Last health probe
    #[serde(default)]
    pub health: HealthSnapshot,
}

impl ModelDescriptor {
    /// Create a descriptor with catalogue defaults for everything but identity
    #[must_use]
    pub fn new(
        model_id: impl Into<String>,
        provider: ProviderFamily,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            upstream_model: None,
            provider,
            base_url: base_url.into(),
            credential_env: None,
            api_key: None,
            defaults: GenerationDefaults::default(),
            pricing: Pricing::default(),
            rate_limit_per_minute: 60,
            enabled: true,
            priority: 1,
            capabilities: Capabilities::default(),
            context_window: 128_000,
            weight: 1,
            replicas: Vec::new(),
            metrics: ModelMetrics::default(),
            health: HealthSnapshot::default(),
        }
    }

    /// Set the credential environment variable
    #[must_use]
    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    /// Set a resolved API key directly
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    /// Set the upstream (wire) model name
    #[must_use]
    pub fn with_upstream_model(mut self, name: impl Into<String>) -> Self {
        self.upstream_model = Some(name.into());
        self
    }

    /// Set pricing
    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set the per-minute rate limit
    #[must_use]
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Set the priority (lower = preferred)
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set capability flags
    #[must_use]
    pub fn with_capabilities(mut self, vision: bool, function_calling: bool) -> Self {
        self.capabilities.vision = vision;
        self.capabilities.function_calling = function_calling;
        self
    }

    /// Set the context window
    #[must_use]
    pub fn with_context_window(mut self, tokens: u64) -> Self {
        self.context_window = tokens;
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the primary endpoint weight
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Add a redundant endpoint
    #[must_use]
    pub fn with_replica(mut self, replica: EndpointSpec) -> Self {
        self.replicas.push(replica);
        self
    }

    /// Enabled and holding a credential
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }

    /// Model name to put in the wire payload
    #[must_use]
    pub fn wire_model(&self) -> &str {
        self.upstream_model.as_deref().unwrap_or(&self.model_id)
    }

    /// Resolve the credentials from the environment if not already present
    ///
    /// Replicas with their own variable are resolved here too; a replica
    /// whose variable is unset falls back to the model's key.
    pub fn resolve_credentials(&mut self) -> Result<()> {
        for replica in &mut self.replicas {
            if replica.api_key.is_some() {
                continue;
            }
            if let Some(var) = replica.credential_env.as_deref() {
                match std::env::var(var) {
                    Ok(key) if !key.trim().is_empty() => {
                        replica.api_key = Some(ApiKey::new(key));
                    }
                    _ => debug!(
                        endpoint = %replica.id,
                        var,
                        "Replica key not set, sharing the model's"
                    ),
                }
            }
        }

        if self.base_url.trim().is_empty() {
            return Err(Error::Config(format!("{}: base URL not set", self.model_id)));
        }
        if self.api_key.is_some() {
            return Ok(());
        }
        let var = self.credential_env.as_deref().ok_or_else(|| {
            Error::Config(format!("{}: no credential reference", self.model_id))
        })?;
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => {
                self.api_key = Some(ApiKey::new(key));
                Ok(())
            }
            _ => Err(Error::Config(format!("{}: {} not set", self.model_id, var))),
        }
    }

    /// Primary endpoint followed by replicas
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::with_capacity(1 + self.replicas.len());
        endpoints.push(Endpoint {
            id: self.model_id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            weight: self.weight,
        });
        for replica in &self.replicas {
            let api_key = replica.api_key.clone().or_else(|| self.api_key.clone());
            endpoints.push(Endpoint {
                id: replica.id.clone(),
                base_url: replica.base_url.clone(),
                api_key,
                weight: replica.weight,
            });
        }
        endpoints
    }

    /// Endpoint ids, primary first
    #[must_use]
    pub fn endpoint_ids(&self) -> Vec<String> {
        std::iter::once(self.model_id.clone())
            .chain(self.replicas.iter().map(|r| r.id.clone()))
            .collect()
    }

    /// Configuration problems, empty when the descriptor is usable
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.api_key.is_none() {
            errors.push("API key not set".to_string());
        }
        if self.base_url.trim().is_empty() {
            errors.push("base URL not set".to_string());
        }
        if !(0.0..=2.0).contains(&self.defaults.temperature) {
            errors.push("temperature must be between 0 and 2".to_string());
        }
        if !(0.0..=1.0).contains(&self.defaults.top_p) {
            errors.push("top_p must be between 0 and 1".to_string());
        }
        if self.defaults.max_tokens == 0 {
            errors.push("max_tokens must be greater than 0".to_string());
        }
        if self.pricing.input_per_1k < 0.0 || self.pricing.output_per_1k < 0.0 {
            errors.push("pricing must not be negative".to_string());
        }
        errors
    }
}

/// Caller-facing summary of an available model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model id
    pub model_id: String,
    /// Provider family
    pub provider: ProviderFamily,
    /// Accepts images
    pub supports_vision: bool,
    /// Supports tools
    pub supports_function_calling: bool,
    /// Context window in tokens
    pub context_window: u64,
    /// Pricing
    pub pricing: Pricing,
    /// Priority
    pub priority: u32,
    /// Rolling success rate (%)
    pub success_rate: f64,
    /// Rolling response time (ms)
    pub avg_response_time_ms: f64,
    /// Last health probe
    pub health: HealthSnapshot,
}

impl From<&ModelDescriptor> for ModelSummary {
    fn from(d: &ModelDescriptor) -> Self {
        Self {
            model_id: d.model_id.clone(),
            provider: d.provider,
            supports_vision: d.capabilities.vision,
            supports_function_calling: d.capabilities.function_calling,
            context_window: d.context_window,
            pricing: d.pricing,
            priority: d.priority,
            success_rate: d.metrics.success_rate,
            avg_response_time_ms: d.metrics.avg_response_time_ms,
            health: d.health.clone(),
        }
    }
}
