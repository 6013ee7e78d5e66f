//! Upstream transport
//!
//! The engine hands a [`WireCall`] to a [`Transport`] and gets the raw JSON
//! body back. [`HttpTransport`] is the reqwest-backed production transport;
//! tests script responses with `ScriptedTransport` or a mockall mock.

use crate::codec::WireCall;
use crate::error::{Error, Result};
use crate::util::sanitize_api_error;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Sends a wire call and returns the decoded JSON body
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call, failing with [`Error::Timeout`] after `timeout`
    async fn send(&self, call: &WireCall, timeout: Duration) -> Result<Value>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::upstream(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Best-effort `error.message` (or `error` string) from a provider error body
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.to_string())
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: &WireCall, timeout: Duration) -> Result<Value> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let mut builder = self.client.post(&call.url).timeout(timeout).json(&call.body);
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(timeout_ms)
            } else {
                // the URL may carry a key in its query string
                Error::upstream(sanitize_api_error(&e.without_url().to_string()))
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(timeout_ms)
            } else {
                Error::upstream(sanitize_api_error(&e.without_url().to_string()))
            }
        })?;
        debug!(status = status.as_u16(), bytes = body.len(), "Upstream response");

        if !status.is_success() {
            // SECURITY: Sanitize error messages
            return Err(Error::Upstream {
                status: Some(status.as_u16()),
                message: sanitize_api_error(&error_message(&body)),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Translation(format!("invalid JSON: {e}")))
    }
}
