//! Scripted transport for testing
//!
//! Queued results are returned first; once the queue is empty a responder
//! closure (if set) answers, otherwise a canned success body in the wire
//! shape of the provider the call was encoded for.

use crate::codec::WireCall;
use crate::error::Result;
use crate::transport::Transport;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn Fn(&WireCall) -> Result<Value> + Send + Sync>;

/// A transport that replays scripted results and records every call
pub struct ScriptedTransport {
    queue: Arc<Mutex<VecDeque<Result<Value>>>>,
    responder: Option<Responder>,
    calls: Arc<Mutex<Vec<WireCall>>>,
    delay: Option<Duration>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &self.queue.lock().unwrap_or_else(|e| e.into_inner()).len())
            .field("calls", &self.call_count())
            .field("delay", &self.delay)
            .finish()
    }
}

impl ScriptedTransport {
    /// Create a transport answering every call with a canned success
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            responder: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Answer calls with a closure once the queue is drained
    #[must_use]
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&WireCall) -> Result<Value> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Sleep before answering each call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a result
    pub fn push(&self, result: Result<Value>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    /// Calls seen so far, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<WireCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls seen so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, call: &WireCall, _timeout: Duration) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match (queued, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(call),
            (None, None) => Ok(canned_body(call, "mock response", 10, 5)),
        }
    }
}

/// OpenAI-shaped completion body (also valid for Moonshot)
#[must_use]
pub fn openai_body(text: &str, input_tokens: u32, output_tokens: u32) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens
        }
    })
}

/// Anthropic-shaped completion body
#[must_use]
pub fn anthropic_body(text: &str, input_tokens: u32, output_tokens: u32) -> Value {
    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
    })
}

/// Gemini-shaped completion body
#[must_use]
pub fn gemini_body(text: &str, input_tokens: u32, output_tokens: u32) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {
            "promptTokenCount": input_tokens,
            "candidatesTokenCount": output_tokens,
            "totalTokenCount": input_tokens + output_tokens
        }
    })
}

/// Success body in the wire shape matching the call's endpoint
#[must_use]
pub fn canned_body(call: &WireCall, text: &str, input_tokens: u32, output_tokens: u32) -> Value {
    if call.url.contains(":generateContent") {
        gemini_body(text, input_tokens, output_tokens)
    } else if call.url.ends_with("/v1/messages") {
        anthropic_body(text, input_tokens, output_tokens)
    } else {
        openai_body(text, input_tokens, output_tokens)
    }
}
