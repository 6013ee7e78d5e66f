use super::{normalize_stop_reason, require_key, translation, Params, ProviderCodec, WireCall};
use crate::error::{Error, Result};
use crate::registry::{Endpoint, ModelDescriptor, ProviderFamily};
use crate::request::{ContentPart, MessageContent, Role, UnifiedRequest};
use crate::response::{Choice, TokenUsage, ToolCall, UnifiedResponse};
use chrono::Utc;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Vec<Candidate>,
    usage_metadata: UsageMetadata,
    #[serde(default)]
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponsePart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    /// Absent when the candidate is empty
    #[serde(default)]
    candidates_token_count: u32,
    total_token_count: Option<u32>,
}

fn convert_parts(content: &MessageContent) -> Result<Vec<GeminiPart>> {
    match content {
        MessageContent::Text(text) => Ok(vec![GeminiPart::Text { text: text.clone() }]),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(GeminiPart::Text { text: text.clone() }),
                ContentPart::Image { mime_type, data } => Ok(GeminiPart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    },
                }),
                ContentPart::ImageUrl { .. } => Err(Error::Translation(
                    "google models need inline image data, not URLs".into(),
                )),
            })
            .collect(),
    }
}

/// Google Generative Language codec
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCodec;

impl ProviderCodec for GeminiCodec {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Google
    }

    fn encode(
        &self,
        request: &UnifiedRequest,
        model: &ModelDescriptor,
        endpoint: &Endpoint,
    ) -> Result<WireCall> {
        let api_key = require_key(endpoint)?;
        let params = Params::resolve(request, model);

        // No system role: fold system text into a leading user turn
        let system: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.text())
            .filter(|t| !t.is_empty())
            .collect();

        let mut contents = Vec::with_capacity(request.messages.len() + 1);
        if !system.is_empty() {
            contents.push(GeminiContent {
                role: "user",
                parts: vec![GeminiPart::Text {
                    text: format!("System: {}", system.join("\n\n")),
                }],
            });
        }
        for msg in request.messages.iter().filter(|m| m.role != Role::System) {
            contents.push(GeminiContent {
                role: if msg.role == Role::Assistant { "model" } else { "user" },
                parts: convert_parts(&msg.content)?,
            });
        }

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    })
                    .collect(),
            }]
        };

        let body = GeminiRequest {
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: params.max_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            },
            tools,
        };

        Ok(WireCall {
            url: format!(
                "{}/models/{}:generateContent?key={}",
                endpoint.base_url.trim_end_matches('/'),
                model.wire_model(),
                api_key
            ),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_value(body).map_err(|e| Error::Translation(e.to_string()))?,
        })
    }

    fn decode(&self, body: &Value, model: &ModelDescriptor) -> Result<UnifiedResponse> {
        let response =
            GeminiResponse::deserialize(body).map_err(|e| translation(self.family(), e))?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| translation(self.family(), "no candidates"))?;
        if candidate.content.is_none() && candidate.finish_reason.is_none() {
            return Err(translation(self.family(), "candidate has no content"));
        }

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            match part {
                ResponsePart::Text { text } => text_parts.push(text),
                ResponsePart::FunctionCall { function_call } => tool_calls.push(ToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    name: function_call.name,
                    arguments: function_call.args.to_string(),
                }),
                ResponsePart::Other(_) => {}
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            candidate.finish_reason.as_deref().map(normalize_stop_reason)
        } else {
            Some("tool_calls".to_string())
        };

        let meta = &response.usage_metadata;
        let mut usage = TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count);
        if let Some(total) = meta.total_token_count {
            usage.total_tokens = total;
        }

        Ok(UnifiedResponse {
            id: response
                .response_id
                .unwrap_or_else(|| format!("gemini_{}", uuid::Uuid::new_v4().simple())),
            model: model.model_id.clone(),
            choices: vec![Choice {
                index: 0,
                role: Role::Assistant,
                content: text_parts.join(""),
                finish_reason,
                tool_calls,
            }],
            usage,
            created: Utc::now(),
            provider: self.family(),
            response_time_ms: 0,
            cached: false,
            cost: 0.0,
        })
    }
}
