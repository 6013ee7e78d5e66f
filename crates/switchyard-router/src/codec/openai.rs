use super::{normalize_stop_reason, require_key, translation, Params, ProviderCodec, WireCall};
use crate::error::{Error, Result};
use crate::registry::{Endpoint, ModelDescriptor, ProviderFamily};
use crate::request::{ContentPart, MessageContent, Role, UnifiedRequest};
use crate::response::{Choice, TokenUsage, ToolCall, UnifiedResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatTool<'a> {
    r#type: &'static str,
    function: ChatFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ChatFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: Option<String>,
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    index: u32,
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

fn convert_content(content: &MessageContent) -> ChatContent {
    match content {
        MessageContent::Text(text) => ChatContent::Text(text.clone()),
        MessageContent::Parts(parts) => ChatContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ChatPart::Text { text: text.clone() },
                    ContentPart::Image { mime_type, data } => ChatPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{mime_type};base64,{data}"),
                        },
                    },
                    ContentPart::ImageUrl { url } => ChatPart::ImageUrl {
                        image_url: ImageUrl { url: url.clone() },
                    },
                })
                .collect(),
        ),
    }
}

/// OpenAI Chat Completions codec
///
/// Moonshot speaks the same protocol minus the penalty fields and `tool_choice`.
#[derive(Debug, Clone, Copy)]
pub struct OpenAiCodec {
    family: ProviderFamily,
    penalties: bool,
    tool_choice: bool,
}

impl OpenAiCodec {
    /// Full OpenAI field set
    #[must_use]
    pub const fn openai() -> Self {
        Self {
            family: ProviderFamily::OpenAi,
            penalties: true,
            tool_choice: true,
        }
    }

    /// Moonshot subset
    #[must_use]
    pub const fn moonshot() -> Self {
        Self {
            family: ProviderFamily::Moonshot,
            penalties: false,
            tool_choice: false,
        }
    }
}

impl ProviderCodec for OpenAiCodec {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    fn encode(
        &self,
        request: &UnifiedRequest,
        model: &ModelDescriptor,
        endpoint: &Endpoint,
    ) -> Result<WireCall> {
        let api_key = require_key(endpoint)?;
        let params = Params::resolve(request, model);

        let tools: Vec<ChatTool<'_>> = request
            .tools
            .iter()
            .map(|t| ChatTool {
                r#type: "function",
                function: ChatFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let body = ChatRequest {
            model: model.wire_model(),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: convert_content(&m.content),
                })
                .collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: self.penalties.then_some(params.frequency_penalty),
            presence_penalty: self.penalties.then_some(params.presence_penalty),
            // responses are always buffered into one body
            stream: false,
            tool_choice: (self.tool_choice && !tools.is_empty()).then_some("auto"),
            tools,
        };

        Ok(WireCall {
            url: format!(
                "{}/chat/completions",
                endpoint.base_url.trim_end_matches('/')
            ),
            headers: vec![
                ("authorization".to_string(), format!("Bearer {api_key}")),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: serde_json::to_value(body).map_err(|e| Error::Translation(e.to_string()))?,
        })
    }

    fn decode(&self, body: &Value, model: &ModelDescriptor) -> Result<UnifiedResponse> {
        let response = ChatResponse::deserialize(body).map_err(|e| translation(self.family, e))?;
        if response.choices.is_empty() {
            return Err(translation(self.family, "no choices"));
        }

        let choices = response
            .choices
            .into_iter()
            .map(|c| Choice {
                index: c.index,
                role: Role::Assistant,
                content: c.message.content.unwrap_or_default(),
                finish_reason: c.finish_reason.as_deref().map(normalize_stop_reason),
                tool_calls: c
                    .message
                    .tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect(),
            })
            .collect();

        let usage = &response.usage;
        let mut token_usage = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
        if let Some(total) = usage.total_tokens {
            token_usage.total_tokens = total;
        }

        Ok(UnifiedResponse {
            id: response
                .id
                .unwrap_or_else(|| format!("chatcmpl_{}", uuid::Uuid::new_v4().simple())),
            model: model.model_id.clone(),
            choices,
            usage: token_usage,
            created: Utc::now(),
            provider: self.family,
            response_time_ms: 0,
            cached: false,
            cost: 0.0,
        })
    }
}
