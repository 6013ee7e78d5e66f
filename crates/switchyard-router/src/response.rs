//! Provider-agnostic response types

use crate::error::{Error, Result};
use crate::registry::ProviderFamily;
use crate::request::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build usage with the total derived from its parts
    #[must_use]
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool name
    pub name: String,
    /// Arguments as JSON string
    pub arguments: String,
}

impl ToolCall {
    /// Parse arguments as a typed value
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.arguments).map_err(|e| Error::Translation(e.to_string()))
    }
}

/// One generated alternative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Position in the choice list
    pub index: u32,
    /// Always `assistant` for generated output
    pub role: Role,
    /// Generated text
    pub content: String,
    /// Normalized stop reason (`stop`, `length`, `tool_calls`, `content_filter`)
    pub finish_reason: Option<String>,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Provider-agnostic chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Response id (provider id when available)
    pub id: String,
    /// Resolved model id
    pub model: String,
    /// Generated choices
    pub choices: Vec<Choice>,
    /// Token usage
    pub usage: TokenUsage,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Provider family that served the request
    pub provider: ProviderFamily,
    /// Wall-clock time of the upstream round trip
    pub response_time_ms: u64,
    /// Served from the response cache
    pub cached: bool,
    /// Cost in USD of the upstream call
    pub cost: f64,
}

impl UnifiedResponse {
    /// Text of the first choice, empty when there are none
    #[must_use]
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.content.as_str()).unwrap_or("")
    }

    /// Whether any choice requested a tool call
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.choices.iter().any(|c| !c.tool_calls.is_empty())
    }
}
