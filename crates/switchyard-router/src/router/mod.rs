//! Router - model resolution and request dispatch
//!
//! [`RouterEngine`] owns every per-engine subsystem (cache, rate limiter,
//! load balancer, statistics) and drives a request through them. There is no
//! global instance; hosts construct one engine and share it behind an `Arc`.
//!
//! # Module Structure
//!
//! - `selection`: task classification and task-based model choice
//! - `engine`: `RouterEngine` and its status types
//! - `health`: background health probes
//! - `mock`: scripted transport for testing

mod engine;
mod health;
mod mock;
mod selection;

#[cfg(test)]
mod tests;

pub use engine::{EngineStatus, RouterEngine};
pub use health::{HealthMonitor, ProbeReport};
pub use mock::{anthropic_body, canned_body, gemini_body, openai_body, ScriptedTransport};
pub use selection::{detect_task_type, select_for_task, TaskType, DEFAULT_LONG_CONTEXT_THRESHOLD};

use crate::codec::codec_for;
use crate::error::{Error, Result};
use crate::registry::{Endpoint, ModelDescriptor};
use crate::request::UnifiedRequest;
use crate::response::UnifiedResponse;
use crate::transport::Transport;
use std::time::Duration;

/// Encode, send with a deadline, decode
pub(crate) async fn dispatch(
    transport: &dyn Transport,
    request: &UnifiedRequest,
    model: &ModelDescriptor,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<UnifiedResponse> {
    let codec = codec_for(model.provider);
    let call = codec.encode(request, model, endpoint)?;
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let body = tokio::time::timeout(timeout, transport.send(&call, timeout))
        .await
        .map_err(|_| Error::Timeout(timeout_ms))??;
    codec.decode(&body, model)
}
