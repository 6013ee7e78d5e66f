use super::{normalize_stop_reason, require_key, translation, Params, ProviderCodec, WireCall};
use crate::error::{Error, Result};
use crate::registry::{Endpoint, ModelDescriptor, ProviderFamily};
use crate::request::{ContentPart, MessageContent, Role, UnifiedRequest};
use crate::response::{Choice, TokenUsage, ToolCall, UnifiedResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anthropic API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
    top_p: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<ResponseContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn convert_content(content: &MessageContent) -> AnthropicContent {
    match content {
        MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
        MessageContent::Parts(parts) => AnthropicContent::Blocks(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
                    ContentPart::Image { mime_type, data } => ContentBlock::Image {
                        source: ImageSource::Base64 {
                            media_type: mime_type.clone(),
                            data: data.clone(),
                        },
                    },
                    ContentPart::ImageUrl { url } => ContentBlock::Image {
                        source: ImageSource::Url { url: url.clone() },
                    },
                })
                .collect(),
        ),
    }
}

/// Anthropic Messages API codec
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicCodec;

impl ProviderCodec for AnthropicCodec {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn encode(
        &self,
        request: &UnifiedRequest,
        model: &ModelDescriptor,
        endpoint: &Endpoint,
    ) -> Result<WireCall> {
        let api_key = require_key(endpoint)?;
        let params = Params::resolve(request, model);

        // System messages are hoisted to the top-level field
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            match msg.role {
                Role::System => {
                    let text = msg.content.text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
                Role::User | Role::Assistant => messages.push(AnthropicMessage {
                    role: msg.role.as_str(),
                    content: convert_content(&msg.content),
                }),
            }
        }

        let body = AnthropicRequest {
            model: model.wire_model(),
            max_tokens: params.max_tokens,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            // responses are always buffered into one body
            stream: false,
            tools: request
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        };

        Ok(WireCall {
            url: format!("{}/v1/messages", endpoint.base_url.trim_end_matches('/')),
            headers: vec![
                ("x-api-key".to_string(), api_key.to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: serde_json::to_value(body).map_err(|e| Error::Translation(e.to_string()))?,
        })
    }

    fn decode(&self, body: &Value, model: &ModelDescriptor) -> Result<UnifiedResponse> {
        let response =
            AnthropicResponse::deserialize(body).map_err(|e| translation(self.family(), e))?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ResponseContentBlock::Text { text } => text_parts.push(text),
                ResponseContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                ResponseContentBlock::Other => {}
            }
        }

        Ok(UnifiedResponse {
            id: response.id,
            model: model.model_id.clone(),
            choices: vec![Choice {
                index: 0,
                role: Role::Assistant,
                content: text_parts.join(""),
                finish_reason: response.stop_reason.as_deref().map(normalize_stop_reason),
                tool_calls,
            }],
            usage: TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
            created: Utc::now(),
            provider: self.family(),
            response_time_ms: 0,
            cached: false,
            cost: 0.0,
        })
    }
}
