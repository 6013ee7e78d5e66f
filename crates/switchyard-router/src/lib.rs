//! Switchyard Router - provider-agnostic LLM routing
//!
//! This crate accepts a unified chat-completion request and routes it to one
//! of several LLM backends:
//! - Registry: catalogue of models, aliases, credentials and rolling metrics
//! - Router: model resolution (exact, alias, task-based) and dispatch
//! - Codec: Anthropic, OpenAI, Google Gemini and Moonshot wire formats
//! - Cache: fingerprint-keyed response cache with TTL and LRU eviction
//! - Balancer: endpoint selection with six strategies and health tracking
//! - Rate limiting, cost accounting and usage statistics
//!
//! ```no_run
//! use switchyard_router::{load_config, Message, RouterEngine, UnifiedRequest};
//!
//! # async fn run() -> switchyard_router::Result<()> {
//! let engine = RouterEngine::from_config(load_config()?)?;
//! engine.start()?;
//!
//! let request = UnifiedRequest::new("gpt-4").with_message(Message::user("Hello"));
//! let response = engine.route(request).await?;
//! println!("{} ({})", response.text(), response.model);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod balancer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod cost;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod response;
pub mod router;
pub mod stats;
pub mod transport;
pub mod util;

pub use balancer::{EndpointHealthState, HealthSummary, LoadBalancer, Strategy};
pub use cache::{fingerprint, CacheStats, CacheStore};
pub use codec::{codec_for, ProviderCodec, WireCall};
pub use config::{load_config, RouterConfig};
pub use cost::CostAccountant;
pub use error::{Error, Result};
pub use rate_limit::RateLimiter;
pub use registry::{
    ModelDescriptor, ModelRegistry, ModelSummary, Pricing, ProviderFamily, RegistryStore,
};
pub use request::{ContentPart, Message, MessageContent, Role, ToolDefinition, UnifiedRequest};
pub use response::{Choice, TokenUsage, ToolCall, UnifiedResponse};
pub use router::{EngineStatus, HealthMonitor, RouterEngine, ScriptedTransport, TaskType};
pub use stats::{RouterStatistics, StatsAggregator, UsageRecord};
pub use transport::{HttpTransport, Transport};
