//! Provider codecs
//!
//! One [`ProviderCodec`] per wire protocol family. The engine never branches on
//! the provider: it asks [`codec_for`] for the codec and goes through
//! `encode`/`decode`.
//!
//! # Module Structure
//!
//! - `anthropic`: Messages API
//! - `openai`: Chat Completions, also used for Moonshot with a reduced field set
//! - `gemini`: Generative Language `generateContent`

mod anthropic;
mod gemini;
mod openai;

#[cfg(test)]
mod tests;

pub use anthropic::{AnthropicCodec, ANTHROPIC_VERSION};
pub use gemini::GeminiCodec;
pub use openai::OpenAiCodec;

use crate::error::{Error, Result};
use crate::registry::{Endpoint, ModelDescriptor, ProviderFamily};
use crate::request::UnifiedRequest;
use crate::response::UnifiedResponse;
use crate::util::mask_api_key;
use serde_json::Value;
use std::fmt;

/// A fully built upstream call
#[derive(Clone, PartialEq)]
pub struct WireCall {
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Value,
}

impl WireCall {
    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn is_secret_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("x-api-key")
}

// SECURITY: Custom Debug implementation to mask credentials in headers and query
impl fmt::Debug for WireCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = match self.url.split_once("key=") {
            Some((head, key)) => format!("{head}key={}", mask_api_key(key)),
            None => self.url.clone(),
        };
        let headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret_header(k) {
                    mask_api_key(v)
                } else {
                    v.clone()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("WireCall")
            .field("url", &url)
            .field("headers", &headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Translation between the unified schema and one wire protocol
pub trait ProviderCodec: Send + Sync {
    /// Family this codec speaks
    fn family(&self) -> ProviderFamily;

    /// Build the upstream call for `request` against `endpoint`
    fn encode(
        &self,
        request: &UnifiedRequest,
        model: &ModelDescriptor,
        endpoint: &Endpoint,
    ) -> Result<WireCall>;

    /// Parse an upstream response body
    ///
    /// Timing, cost and cache fields are left zeroed for the caller to fill.
    fn decode(&self, body: &Value, model: &ModelDescriptor) -> Result<UnifiedResponse>;
}

static ANTHROPIC: AnthropicCodec = AnthropicCodec;
static OPENAI: OpenAiCodec = OpenAiCodec::openai();
static MOONSHOT: OpenAiCodec = OpenAiCodec::moonshot();
static GEMINI: GeminiCodec = GeminiCodec;

/// Codec for a provider family
#[must_use]
pub fn codec_for(family: ProviderFamily) -> &'static dyn ProviderCodec {
    match family {
        ProviderFamily::Anthropic => &ANTHROPIC,
        ProviderFamily::OpenAi => &OPENAI,
        ProviderFamily::Google => &GEMINI,
        ProviderFamily::Moonshot => &MOONSHOT,
    }
}

/// Map provider stop reasons onto `stop`, `length`, `tool_calls`, `content_filter`
#[must_use]
pub fn normalize_stop_reason(raw: &str) -> String {
    match raw {
        "stop" | "end_turn" | "stop_sequence" | "STOP" => "stop",
        "length" | "max_tokens" | "MAX_TOKENS" => "length",
        "tool_calls" | "tool_use" | "function_call" => "tool_calls",
        "content_filter" | "refusal" | "SAFETY" | "RECITATION" | "BLOCKLIST"
        | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        other => return other.to_lowercase(),
    }
    .to_string()
}

fn require_key(endpoint: &Endpoint) -> Result<&str> {
    endpoint
        .api_key
        .as_ref()
        .map(|k| k.expose())
        .ok_or_else(|| Error::Config(format!("{}: API key not set", endpoint.id)))
}

fn translation(family: ProviderFamily, e: impl fmt::Display) -> Error {
    Error::Translation(format!("{family} response: {e}"))
}

/// Generation parameters after falling back to the model defaults
struct Params {
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

impl Params {
    fn resolve(request: &UnifiedRequest, model: &ModelDescriptor) -> Self {
        let d = &model.defaults;
        Self {
            max_tokens: request.max_tokens.unwrap_or(d.max_tokens),
            temperature: request.temperature.unwrap_or(d.temperature),
            top_p: request.top_p.unwrap_or(d.top_p),
            frequency_penalty: request.frequency_penalty.unwrap_or(d.frequency_penalty),
            presence_penalty: request.presence_penalty.unwrap_or(d.presence_penalty),
        }
    }
}
