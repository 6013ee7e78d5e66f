//! Built-in model catalogue and alias table

use super::descriptor::{ModelDescriptor, Pricing, ProviderFamily};
use std::collections::HashMap;

/// Anthropic API base URL
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
/// OpenAI API base URL
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Google Generative Language API base URL
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Moonshot API base URL
pub const MOONSHOT_BASE_URL: &str = "https://api.moonshot.cn/v1";
/// Infini-AI (Kimi K2 host) base URL
pub const INFINI_BASE_URL: &str = "https://cloud.infini-ai.com/maas/v1";

fn claude(id: &str, per_1k: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, ProviderFamily::Anthropic, ANTHROPIC_BASE_URL)
        .with_credential_env("ANTHROPIC_API_KEY")
        .with_pricing(Pricing::flat(per_1k))
        .with_rate_limit(50)
        .with_capabilities(true, true)
        .with_context_window(200_000)
}

fn openai(id: &str, per_1k: f64, priority: u32) -> ModelDescriptor {
    ModelDescriptor::new(id, ProviderFamily::OpenAi, OPENAI_BASE_URL)
        .with_credential_env("OPENAI_API_KEY")
        .with_pricing(Pricing::flat(per_1k))
        .with_rate_limit(60)
        .with_priority(priority)
        .with_capabilities(true, true)
        .with_context_window(128_000)
}

fn gemini(id: &str, per_1k: f64, priority: u32, context_window: u64) -> ModelDescriptor {
    ModelDescriptor::new(id, ProviderFamily::Google, GOOGLE_BASE_URL)
        .with_credential_env("GOOGLE_AI_API_KEY")
        .with_pricing(Pricing::flat(per_1k))
        .with_rate_limit(60)
        .with_priority(priority)
        .with_capabilities(true, true)
        .with_context_window(context_window)
}

fn moonshot(id: &str, per_1k: f64, priority: u32, context_window: u64) -> ModelDescriptor {
    ModelDescriptor::new(id, ProviderFamily::Moonshot, MOONSHOT_BASE_URL)
        .with_credential_env("MOONSHOT_API_KEY")
        .with_pricing(Pricing::flat(per_1k))
        .with_rate_limit(60)
        .with_priority(priority)
        .with_capabilities(false, true)
        .with_context_window(context_window)
}

/// The catalogue the registry starts from before the snapshot is applied
#[must_use]
pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        claude("claude-3-opus-20240229", 0.015),
        claude("claude-3-5-sonnet-20241022", 0.003),
        openai("gpt-4o", 0.005, 2),
        openai("gpt-4o-mini", 0.000_15, 1),
        gemini("gemini-1.5-pro", 0.0025, 2, 2_000_000),
        gemini("gemini-1.5-flash", 0.000_075, 1, 1_000_000),
        moonshot("moonshot-v1-8k", 0.0012, 1, 8_000),
        moonshot("moonshot-v1-32k", 0.0024, 2, 32_000),
        moonshot("moonshot-v1-128k", 0.0096, 3, 128_000),
        ModelDescriptor::new("kimi-k2-instruct-infini", ProviderFamily::Moonshot, INFINI_BASE_URL)
            .with_upstream_model("kimi-k2-instruct")
            .with_credential_env("INFINI_AI_API_KEY")
            .with_pricing(Pricing::flat(0.0005))
            .with_rate_limit(500)
            .with_capabilities(false, true)
            .with_context_window(128_000),
    ]
}

/// Short names callers commonly use, mapped to catalogue ids
#[must_use]
pub fn builtin_aliases() -> HashMap<String, String> {
    [
        ("claude-3-opus", "claude-3-opus-20240229"),
        ("claude-3-sonnet", "claude-3-5-sonnet-20241022"),
        ("claude-3-haiku", "claude-3-haiku-20240307"),
        ("gpt-4", "gpt-4o"),
        ("gpt-4-turbo", "gpt-4-turbo"),
        ("gemini-pro", "gemini-1.5-pro"),
        ("gemini-flash", "gemini-1.5-flash"),
        ("kimi-k2", "moonshot-v1-32k"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}
