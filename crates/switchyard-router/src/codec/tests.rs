//! Tests for codec module

use super::*;
use crate::request::{ContentPart, Message, MessageContent, ToolDefinition};
use crate::response::TokenUsage;
use serde_json::json;

fn descriptor(family: ProviderFamily, base_url: &str) -> ModelDescriptor {
    ModelDescriptor::new("test-model", family, base_url).with_api_key("sk-test-1234567890")
}

fn endpoint(model: &ModelDescriptor) -> Endpoint {
    model.endpoints().remove(0)
}

fn chat() -> UnifiedRequest {
    UnifiedRequest::new("test-model")
        .with_message(Message::system("Be brief."))
        .with_message(Message::user("Hello"))
        .with_message(Message::assistant("Hi!"))
        .with_message(Message::user("How are you?"))
        .with_max_tokens(64)
        .with_temperature(0.5)
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        "Look up the weather",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )
}

#[test]
fn test_normalize_stop_reason() {
    assert_eq!(normalize_stop_reason("end_turn"), "stop");
    assert_eq!(normalize_stop_reason("STOP"), "stop");
    assert_eq!(normalize_stop_reason("max_tokens"), "length");
    assert_eq!(normalize_stop_reason("MAX_TOKENS"), "length");
    assert_eq!(normalize_stop_reason("tool_use"), "tool_calls");
    assert_eq!(normalize_stop_reason("SAFETY"), "content_filter");
    assert_eq!(normalize_stop_reason("OTHER"), "other");
}

#[test]
fn test_codec_for_family() {
    for family in [
        ProviderFamily::Anthropic,
        ProviderFamily::OpenAi,
        ProviderFamily::Google,
        ProviderFamily::Moonshot,
    ] {
        assert_eq!(codec_for(family).family(), family);
    }
}

#[test]
fn test_stream_flag_is_never_sent_upstream() {
    let request = chat().with_stream(true);
    for family in [
        ProviderFamily::Anthropic,
        ProviderFamily::OpenAi,
        ProviderFamily::Moonshot,
    ] {
        let model = descriptor(family, "https://api.example.com/v1");
        let call = codec_for(family)
            .encode(&request, &model, &endpoint(&model))
            .unwrap();
        assert_eq!(call.body["stream"], false, "{family}");
    }

    // gemini selects streaming by URL, not by body field
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let call = codec_for(ProviderFamily::Google)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();
    assert!(call.url.contains(":generateContent?"));
    assert!(call.body.get("stream").is_none());
}

#[test]
fn test_missing_key_is_config_error() {
    let model = ModelDescriptor::new("m", ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let err = codec_for(ProviderFamily::OpenAi)
        .encode(&chat(), &model, &endpoint(&model))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_wire_call_debug_masks_secrets() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let call = codec_for(ProviderFamily::Google)
        .encode(&chat(), &model, &endpoint(&model))
        .unwrap();
    let debug = format!("{call:?}");
    assert!(!debug.contains("sk-test-1234567890"));

    let model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let call = codec_for(ProviderFamily::OpenAi)
        .encode(&chat(), &model, &endpoint(&model))
        .unwrap();
    assert!(!format!("{call:?}").contains("sk-test-1234567890"));
}

// ============================================================================
// Anthropic
// ============================================================================

#[test]
fn test_anthropic_encode() {
    let model = descriptor(ProviderFamily::Anthropic, "https://api.anthropic.com/");
    let call = codec_for(ProviderFamily::Anthropic)
        .encode(&chat().with_tools(vec![weather_tool()]), &model, &endpoint(&model))
        .unwrap();

    assert_eq!(call.url, "https://api.anthropic.com/v1/messages");
    assert_eq!(call.header("x-api-key"), Some("sk-test-1234567890"));
    assert_eq!(call.header("anthropic-version"), Some(ANTHROPIC_VERSION));

    let body = &call.body;
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["system"], "Be brief.");
    assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][1]["role"], "assistant");
    assert_eq!(body["tools"][0]["name"], "get_weather");
    assert!(body["tools"][0]["input_schema"].is_object());
    assert_eq!(body["stream"], false);
}

#[test]
fn test_anthropic_encode_image() {
    let model = descriptor(ProviderFamily::Anthropic, "https://api.anthropic.com");
    let request = UnifiedRequest::new("m").with_message(Message::user(MessageContent::Parts(vec![
        ContentPart::Text {
            text: "What is this?".into(),
        },
        ContentPart::Image {
            mime_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        },
    ])));
    let call = codec_for(ProviderFamily::Anthropic)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();

    let block = &call.body["messages"][0]["content"][1];
    assert_eq!(block["type"], "image");
    assert_eq!(block["source"]["type"], "base64");
    assert_eq!(block["source"]["media_type"], "image/png");
}

#[test]
fn test_anthropic_decode() {
    let model = descriptor(ProviderFamily::Anthropic, "https://api.anthropic.com");
    let body = json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-20241022",
        "content": [
            {"type": "text", "text": "Let me check."},
            {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Seoul"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 12, "output_tokens": 30}
    });

    let response = codec_for(ProviderFamily::Anthropic)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.id, "msg_01");
    assert_eq!(response.model, "test-model");
    assert_eq!(response.text(), "Let me check.");
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    assert_eq!(response.choices[0].tool_calls[0].name, "get_weather");
    assert_eq!(response.usage, TokenUsage::new(12, 30));
    assert_eq!(response.provider, ProviderFamily::Anthropic);
}

#[test]
fn test_anthropic_decode_ignores_unknown_blocks() {
    let model = descriptor(ProviderFamily::Anthropic, "https://api.anthropic.com");
    let body = json!({
        "id": "msg_02",
        "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "ok"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 1, "output_tokens": 1}
    });
    let response = codec_for(ProviderFamily::Anthropic)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.text(), "ok");
}

#[test]
fn test_anthropic_decode_missing_usage() {
    let model = descriptor(ProviderFamily::Anthropic, "https://api.anthropic.com");
    let body = json!({"id": "msg_03", "content": [], "stop_reason": "end_turn"});
    let err = codec_for(ProviderFamily::Anthropic)
        .decode(&body, &model)
        .unwrap_err();
    assert!(matches!(err, Error::Translation(_)));
}

// ============================================================================
// OpenAI / Moonshot
// ============================================================================

#[test]
fn test_openai_encode() {
    let model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let request = chat()
        .with_penalties(0.1, 0.2)
        .with_tools(vec![weather_tool()]);
    let call = codec_for(ProviderFamily::OpenAi)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();

    assert_eq!(call.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(call.header("Authorization"), Some("Bearer sk-test-1234567890"));

    let body = &call.body;
    assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    assert_eq!(body["messages"][0]["role"], "system");
    assert!((body["frequency_penalty"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
    assert_eq!(body["tool_choice"], "auto");
}

#[test]
fn test_openai_encode_uses_model_defaults() {
    let mut model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    model.defaults.max_tokens = 321;
    let request = UnifiedRequest::new("m").with_message(Message::user("hi"));
    let call = codec_for(ProviderFamily::OpenAi)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();
    assert_eq!(call.body["max_tokens"], 321);
    assert!(call.body.get("tool_choice").is_none());
}

#[test]
fn test_openai_encode_inline_image_as_data_url() {
    let model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let request = UnifiedRequest::new("m").with_message(Message::user(MessageContent::Parts(vec![
        ContentPart::Image {
            mime_type: "image/jpeg".into(),
            data: "AAAA".into(),
        },
    ])));
    let call = codec_for(ProviderFamily::OpenAi)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();
    assert_eq!(
        call.body["messages"][0]["content"][0]["image_url"]["url"],
        "data:image/jpeg;base64,AAAA"
    );
}

#[test]
fn test_moonshot_encode_drops_unsupported_fields() {
    let model = descriptor(ProviderFamily::Moonshot, "https://api.moonshot.cn/v1")
        .with_upstream_model("moonshot-v1-8k");
    let request = chat()
        .with_penalties(0.1, 0.2)
        .with_tools(vec![weather_tool()]);
    let call = codec_for(ProviderFamily::Moonshot)
        .encode(&request, &model, &endpoint(&model))
        .unwrap();

    assert_eq!(call.url, "https://api.moonshot.cn/v1/chat/completions");
    assert_eq!(call.body["model"], "moonshot-v1-8k");
    assert!(call.body.get("frequency_penalty").is_none());
    assert!(call.body.get("presence_penalty").is_none());
    assert!(call.body.get("tool_choice").is_none());
    assert!(call.body["tools"].is_array());
}

#[test]
fn test_openai_decode() {
    let model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello there"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
    });
    let response = codec_for(ProviderFamily::OpenAi)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.id, "chatcmpl-1");
    assert_eq!(response.text(), "Hello there");
    assert_eq!(response.usage.total_tokens, 12);
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
}

#[test]
fn test_openai_decode_tool_calls_with_null_content() {
    let model = descriptor(ProviderFamily::Moonshot, "https://api.moonshot.cn/v1");
    let body = json!({
        "id": "cmpl-2",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Seoul\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30}
    });
    let response = codec_for(ProviderFamily::Moonshot)
        .decode(&body, &model)
        .unwrap();
    assert!(response.has_tool_calls());
    assert_eq!(response.text(), "");
    assert_eq!(response.provider, ProviderFamily::Moonshot);
}

#[test]
fn test_openai_decode_errors() {
    let model = descriptor(ProviderFamily::OpenAi, "https://api.openai.com/v1");
    let codec = codec_for(ProviderFamily::OpenAi);

    let no_choices = json!({"id": "x", "choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 0}});
    assert!(matches!(codec.decode(&no_choices, &model), Err(Error::Translation(_))));

    let no_usage = json!({"id": "x", "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]});
    assert!(matches!(codec.decode(&no_usage, &model), Err(Error::Translation(_))));

    let error_body = json!({"error": {"message": "bad request"}});
    assert!(matches!(codec.decode(&error_body, &model), Err(Error::Translation(_))));
}

// ============================================================================
// Google
// ============================================================================

#[test]
fn test_gemini_encode() {
    let model = descriptor(
        ProviderFamily::Google,
        "https://generativelanguage.googleapis.com/v1beta",
    )
    .with_upstream_model("gemini-1.5-flash");
    let call = codec_for(ProviderFamily::Google)
        .encode(&chat().with_tools(vec![weather_tool()]), &model, &endpoint(&model))
        .unwrap();

    assert_eq!(
        call.url,
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=sk-test-1234567890"
    );

    let contents = call.body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 4);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[0]["parts"][0]["text"], "System: Be brief.");
    assert_eq!(contents[2]["role"], "model");

    let config = &call.body["generationConfig"];
    assert_eq!(config["maxOutputTokens"], 64);
    assert!((config["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    assert!(config["topP"].is_number());
    assert_eq!(
        call.body["tools"][0]["functionDeclarations"][0]["name"],
        "get_weather"
    );
}

#[test]
fn test_gemini_encode_image() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let inline = UnifiedRequest::new("m").with_message(Message::user(MessageContent::Parts(vec![
        ContentPart::Image {
            mime_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        },
    ])));
    let call = codec_for(ProviderFamily::Google)
        .encode(&inline, &model, &endpoint(&model))
        .unwrap();
    assert_eq!(
        call.body["contents"][0]["parts"][0]["inlineData"]["mimeType"],
        "image/png"
    );

    let by_url = UnifiedRequest::new("m").with_message(Message::user(MessageContent::Parts(vec![
        ContentPart::ImageUrl {
            url: "https://example.com/cat.png".into(),
        },
    ])));
    let err = codec_for(ProviderFamily::Google)
        .encode(&by_url, &model, &endpoint(&model))
        .unwrap_err();
    assert!(matches!(err, Error::Translation(_)));
}

#[test]
fn test_gemini_decode() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let body = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "world"}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
    });
    let response = codec_for(ProviderFamily::Google)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.text(), "Hello world");
    assert_eq!(response.usage, TokenUsage::new(5, 2));
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    assert!(response.id.starts_with("gemini_"));
}

#[test]
fn test_gemini_decode_function_call() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let body = json!({
        "candidates": [{
            "content": {"parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Seoul"}}}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 5}
    });
    let response = codec_for(ProviderFamily::Google)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    let call = &response.choices[0].tool_calls[0];
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.arguments, r#"{"city":"Seoul"}"#);
    assert_eq!(response.usage.output_tokens, 0);
}

#[test]
fn test_gemini_decode_safety_block() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let body = json!({
        "candidates": [{"finishReason": "SAFETY"}],
        "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 5}
    });
    let response = codec_for(ProviderFamily::Google)
        .decode(&body, &model)
        .unwrap();
    assert_eq!(response.text(), "");
    assert_eq!(
        response.choices[0].finish_reason.as_deref(),
        Some("content_filter")
    );
}

#[test]
fn test_gemini_decode_errors() {
    let model = descriptor(ProviderFamily::Google, "https://g.example.com/v1beta");
    let codec = codec_for(ProviderFamily::Google);

    let no_candidates = json!({"candidates": [], "usageMetadata": {"totalTokenCount": 0}});
    assert!(matches!(codec.decode(&no_candidates, &model), Err(Error::Translation(_))));

    let no_usage = json!({"candidates": [{"content": {"parts": [{"text": "x"}]}}]});
    assert!(matches!(codec.decode(&no_usage, &model), Err(Error::Translation(_))));
}
