//! Tests for router module

use super::*;
use crate::config::RouterConfig;
use crate::error::Error;
use crate::registry::{EndpointSpec, HealthStatus, ModelDescriptor, ModelRegistry, Pricing, ProviderFamily};
use crate::request::Message;
use crate::transport::{MockTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const OPENAI_URL: &str = "https://api.openai.test/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.test";

fn test_registry() -> ModelRegistry {
    ModelRegistry::new(vec![
        ModelDescriptor::new("gpt-4o", ProviderFamily::OpenAi, OPENAI_URL)
            .with_api_key("sk-test-openai-0001")
            .with_pricing(Pricing::flat(0.005))
            .with_priority(2)
            .with_capabilities(true, true),
        ModelDescriptor::new("gpt-4o-mini", ProviderFamily::OpenAi, OPENAI_URL)
            .with_api_key("sk-test-openai-0001")
            .with_pricing(Pricing::flat(0.000_15))
            .with_priority(1)
            .with_capabilities(true, true),
        ModelDescriptor::new("claude-3-5-sonnet", ProviderFamily::Anthropic, ANTHROPIC_URL)
            .with_api_key("sk-ant-test-0000001")
            .with_pricing(Pricing::flat(0.003))
            .with_priority(2)
            .with_capabilities(true, true)
            .with_context_window(200_000),
    ])
    .with_aliases(HashMap::from([("gpt-4".to_string(), "gpt-4o".to_string())]))
}

fn test_config() -> RouterConfig {
    RouterConfig::default()
        .without_health_checks()
        .without_persistence()
}

fn engine(config: RouterConfig, transport: Arc<dyn Transport>) -> RouterEngine {
    RouterEngine::new(config, Arc::new(test_registry()), transport)
}

fn hello(model: &str) -> UnifiedRequest {
    UnifiedRequest::new(model).with_message(Message::user("Hello"))
}

#[tokio::test]
async fn test_route_exact_model_and_cost() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Ok(openai_body("Hi there", 1000, 1000)));
    let engine = engine(test_config().without_cache(), transport.clone());

    let response = engine.route(hello("gpt-4o")).await.unwrap();
    assert_eq!(response.model, "gpt-4o");
    assert_eq!(response.text(), "Hi there");
    assert!(!response.cached);
    // 1000/1000 * 0.005 + 1000/1000 * 0.005 * 3
    assert!((response.cost - 0.02).abs() < 1e-9);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, format!("{OPENAI_URL}/chat/completions"));
    assert_eq!(calls[0].body["model"], "gpt-4o");

    let stats = engine.get_stats();
    assert_eq!(stats.successful_requests, 1);
    assert!((stats.total_cost - 0.02).abs() < 1e-9);
    assert_eq!(stats.by_provider["openai"].successes, 1);
}

#[tokio::test]
async fn test_route_alias() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport.clone());

    let response = engine.route(hello("gpt-4")).await.unwrap();
    assert_eq!(response.model, "gpt-4o");
}

#[tokio::test]
async fn test_config_alias_overrides_builtin() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut config = test_config();
    config
        .aliases
        .insert("gpt-4".to_string(), "claude-3-5-sonnet".to_string());
    let engine = engine(config, transport.clone());

    let response = engine.route(hello("gpt-4")).await.unwrap();
    assert_eq!(response.model, "claude-3-5-sonnet");
    assert_eq!(response.provider, ProviderFamily::Anthropic);
    assert!(transport.calls()[0].url.ends_with("/v1/messages"));
}

#[tokio::test]
async fn test_disabled_model_falls_back_to_task_selection() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport.clone());
    assert!(engine.set_model_enabled("gpt-4o", false));

    let response = engine.route(hello("gpt-4")).await.unwrap();
    assert_eq!(response.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_empty_model_uses_task_selection() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport);
    let response = engine.route(hello("")).await.unwrap();
    assert_eq!(response.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_no_available_model_is_accounted() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport.clone());
    for id in ["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet"] {
        engine.set_model_enabled(id, false);
    }

    let err = engine.route(hello("gpt-4")).await.unwrap_err();
    assert!(matches!(err, Error::NoAvailableModel(_)));
    assert_eq!(transport.call_count(), 0);

    let stats = engine.get_stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.by_model["gpt-4"].failures, 1);
    assert!(stats.by_provider.is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_routing() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport.clone());

    let err = engine
        .route(hello("gpt-4o").with_temperature(3.5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(engine.get_stats().failed_requests, 1);
}

#[tokio::test]
async fn test_cache_hit_skips_upstream() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Ok(openai_body("cached answer", 100, 100)));
    let engine = engine(test_config(), transport.clone());

    let first = engine.route(hello("gpt-4o")).await.unwrap();
    let second = engine.route(hello("gpt-4o")).await.unwrap();

    assert_eq!(transport.call_count(), 1);
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.text(), "cached answer");
    assert_eq!(second.cost, first.cost);

    let stats = engine.get_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.cached_requests, 1);
    assert!((stats.cache_hit_rate - 50.0).abs() < 1e-9);
    let cache = engine.cache_stats();
    assert_eq!(cache.hits, 1);
    // both report percentages
    assert!((cache.hit_rate - stats.cache_hit_rate).abs() < 1e-9);
}

#[tokio::test]
async fn test_streaming_bypasses_cache() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport.clone());

    engine.route(hello("gpt-4o").with_stream(true)).await.unwrap();
    engine.route(hello("gpt-4o").with_stream(true)).await.unwrap();
    assert_eq!(transport.call_count(), 2);
    assert_eq!(engine.cache_stats().size, 0);
}

#[tokio::test]
async fn test_stream_requests_are_buffered_upstream() {
    // an upstream asked to stream answers with an event stream the decoder rejects
    let transport = Arc::new(ScriptedTransport::new().with_responder(|call| {
        if call.body["stream"] == true {
            Err(Error::Translation("invalid JSON: event stream".into()))
        } else {
            Ok(canned_body(call, "whole answer", 10, 5))
        }
    }));
    let engine = engine(test_config(), transport.clone());

    for _ in 0..3 {
        let response = engine
            .route(hello("gpt-4o").with_stream(true))
            .await
            .unwrap();
        assert_eq!(response.text(), "whole answer");
    }
    assert_eq!(transport.call_count(), 3);
    assert!(engine.status().endpoints.unhealthy.is_empty());
    assert_eq!(engine.get_stats().successful_requests, 3);
}

#[tokio::test]
async fn test_failed_calls_are_not_cached() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Err(Error::Upstream {
        status: Some(500),
        message: "internal".into(),
    }));
    let engine = engine(test_config(), transport.clone());

    assert!(engine.route(hello("gpt-4o")).await.is_err());
    let retry = engine.route(hello("gpt-4o")).await.unwrap();
    assert!(!retry.cached);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_rate_limit_rejects_over_limit() {
    let transport = Arc::new(ScriptedTransport::new());
    let registry = test_registry();
    let limited = registry.get("gpt-4o").unwrap().with_rate_limit(2);
    registry.upsert(limited);
    let engine = RouterEngine::new(
        test_config().without_cache(),
        Arc::new(registry),
        transport.clone(),
    );

    engine.route(hello("gpt-4o")).await.unwrap();
    engine.route(hello("gpt-4o")).await.unwrap();
    let err = engine.route(hello("gpt-4o")).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { ref model } if model == "gpt-4o"));
    assert_eq!(transport.call_count(), 2);

    let stats = engine.get_stats();
    assert_eq!(stats.successful_requests, 2);
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout() {
    let transport = ScriptedTransport::new().with_delay(Duration::from_secs(5));
    let model = test_registry().get("gpt-4o").unwrap();
    let endpoint = model.endpoints().remove(0);

    let err = dispatch(
        &transport,
        &hello("gpt-4o"),
        &model,
        &endpoint,
        Duration::from_millis(250),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Timeout(250)));
}

#[tokio::test(start_paused = true)]
async fn test_route_timeout_counts_against_endpoint() {
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_secs(60)));
    let engine = engine(test_config().without_cache(), transport);

    let err = engine.route(hello("gpt-4o")).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(30_000)));

    let model = engine.registry().get("gpt-4o").unwrap();
    assert!((model.metrics.success_rate - 99.0).abs() < 1e-9);

    let endpoint = engine
        .endpoint_stats()
        .into_iter()
        .find(|e| e.endpoint_id == "gpt-4o")
        .unwrap();
    assert_eq!(endpoint.failed_requests, 1);
    assert_eq!(endpoint.consecutive_failures, 1);
    assert_eq!(endpoint.active_requests, 0);

    let stats = engine.get_stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.total_cost, 0.0);
    assert_eq!(stats.by_provider["openai"].failures, 1);
}

#[tokio::test]
async fn test_repeated_failures_mark_endpoint_unhealthy() {
    let transport = Arc::new(
        ScriptedTransport::new().with_responder(|_| Err(Error::upstream("connection refused"))),
    );
    let engine = engine(test_config().without_cache(), transport);

    for _ in 0..3 {
        assert!(engine.route(hello("gpt-4o")).await.is_err());
    }
    let status = engine.status();
    assert_eq!(status.endpoints.unhealthy, vec!["gpt-4o".to_string()]);
}

#[tokio::test]
async fn test_non_endpoint_errors_leave_endpoint_health_alone() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_responder(|_| Err(Error::Config("proxy credentials missing".into()))),
    );
    let engine = engine(test_config().without_cache(), transport);

    for _ in 0..3 {
        assert!(matches!(
            engine.route(hello("gpt-4o")).await,
            Err(Error::Config(_))
        ));
    }

    let endpoint = engine
        .endpoint_stats()
        .into_iter()
        .find(|e| e.endpoint_id == "gpt-4o")
        .unwrap();
    assert!(endpoint.is_healthy);
    assert_eq!(endpoint.active_requests, 0);
    assert_eq!(endpoint.consecutive_failures, 0);
    assert_eq!(engine.get_stats().failed_requests, 3);
}

#[tokio::test]
async fn test_success_updates_model_metrics() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config().without_cache(), transport);
    engine.route(hello("gpt-4o")).await.unwrap();

    let model = engine.registry().get("gpt-4o").unwrap();
    assert_eq!(model.metrics.success_rate, 100.0);
    assert!(model.metrics.last_used.is_some());
}

#[tokio::test]
async fn test_replica_endpoints_share_load() {
    let registry = test_registry();
    let replicated = registry
        .get("gpt-4o")
        .unwrap()
        .with_replica(EndpointSpec::new("gpt-4o-eu", "https://eu.openai.test/v1"));
    registry.upsert(replicated);
    let transport = Arc::new(ScriptedTransport::new());
    let engine = RouterEngine::new(
        test_config().without_cache(),
        Arc::new(registry),
        transport.clone(),
    );

    for _ in 0..4 {
        engine.route(hello("gpt-4o")).await.unwrap();
    }
    let eu_calls = transport
        .calls()
        .iter()
        .filter(|c| c.url.starts_with("https://eu.openai.test"))
        .count();
    assert_eq!(eu_calls, 2);

    let distribution = engine.load_distribution();
    assert!((distribution["gpt-4o"] - 50.0).abs() < 1e-9);
    assert!((distribution["gpt-4o-eu"] - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_update_endpoint_weight() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport);

    assert!(engine.update_endpoint_weight("gpt-4o", 5));
    assert_eq!(engine.registry().get("gpt-4o").unwrap().weight, 5);
    let state = engine
        .endpoint_stats()
        .into_iter()
        .find(|e| e.endpoint_id == "gpt-4o")
        .unwrap();
    assert_eq!(state.weight, 5);

    assert!(!engine.update_endpoint_weight("no-such-endpoint", 2));
}

#[tokio::test]
async fn test_switch_model() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport);

    assert!(!engine.switch_model("fast", "no-such-model"));
    engine.set_model_enabled("claude-3-5-sonnet", false);
    assert!(!engine.switch_model("fast", "claude-3-5-sonnet"));

    assert!(engine.switch_model("fast", "gpt-4o-mini"));
    let response = engine.route(hello("fast")).await.unwrap();
    assert_eq!(response.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_mock_transport_receives_encoded_call() {
    let mut mock = MockTransport::new();
    mock.expect_send()
        .withf(|call, timeout| {
            call.header("authorization") == Some("Bearer sk-test-openai-0001")
                && call.body["max_tokens"] == 64
                && *timeout == Duration::from_secs(30)
        })
        .times(1)
        .returning(|_, _| Ok(openai_body("ok", 3, 2)));

    let engine = engine(test_config(), Arc::new(mock));
    let response = engine
        .route(hello("gpt-4o-mini").with_max_tokens(64))
        .await
        .unwrap();
    assert_eq!(response.usage.total_tokens, 5);
}

#[tokio::test]
async fn test_list_available_models_and_status() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine(test_config(), transport);
    engine.set_model_enabled("claude-3-5-sonnet", false);

    let models = engine.list_available_models();
    let ids: Vec<&str> = models.iter().map(|m| m.model_id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
    assert_eq!(models[0].health.status, HealthStatus::Unknown);

    engine.route(hello("gpt-4o")).await.unwrap();
    let status = engine.status();
    assert_eq!(status.models.total, 3);
    assert_eq!(status.models.available, 2);
    assert_eq!(status.strategy, "round_robin");
    assert_eq!(status.total_requests, 1);
    assert!(status.total_cost.starts_with('$'));
    assert!(!status.health_checks_enabled);
}

#[tokio::test]
async fn test_health_monitor_disables_failing_model() {
    let transport = Arc::new(ScriptedTransport::new().with_responder(|call| {
        if call.url.starts_with(ANTHROPIC_URL) {
            Err(Error::Upstream {
                status: Some(503),
                message: "overloaded".into(),
            })
        } else {
            Ok(canned_body(call, "pong", 1, 1))
        }
    }));
    let engine = engine(test_config(), transport.clone());

    let reports = engine.health_monitor().run_once().await;
    assert_eq!(reports.len(), 3);
    assert_eq!(transport.call_count(), 3);
    assert!(transport
        .calls()
        .iter()
        .all(|c| c.body["max_tokens"] == 5));

    let claude = engine.registry().get("claude-3-5-sonnet").unwrap();
    assert!(!claude.enabled);
    assert_eq!(claude.health.status, HealthStatus::Unhealthy);
    assert!(claude.health.error.as_deref().unwrap_or("").contains("503"));

    let gpt = engine.registry().get("gpt-4o").unwrap();
    assert!(gpt.enabled);
    assert_eq!(gpt.health.status, HealthStatus::Healthy);
    assert!(gpt.health.checked_at.is_some());

    assert_eq!(engine.status().endpoints.unhealthy, vec!["claude-3-5-sonnet".to_string()]);

    // disabled models are not probed again
    engine.health_monitor().run_once().await;
    assert_eq!(transport.call_count(), 5);

    assert!(engine.set_model_enabled("claude-3-5-sonnet", true));
    assert!(engine.status().endpoints.unhealthy.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_collapses_identical_misses() {
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(100)));
    let mut config = test_config();
    config.cache.single_flight = true;
    let engine = engine(config, transport.clone());

    let (a, b) = tokio::join!(engine.route(hello("gpt-4o")), engine.route(hello("gpt-4o")));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(transport.call_count(), 1);
    assert!(a.cached != b.cached);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_route_releases_endpoint_and_flight() {
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_secs(10)));
    let mut config = test_config();
    config.cache.single_flight = true;
    let engine = engine(config, transport.clone());

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), engine.route(hello("gpt-4o"))).await;
    assert!(abandoned.is_err());
    assert_eq!(transport.call_count(), 1);

    let endpoint = engine
        .endpoint_stats()
        .into_iter()
        .find(|e| e.endpoint_id == "gpt-4o")
        .unwrap();
    assert_eq!(endpoint.active_requests, 0);
    assert_eq!(endpoint.total_requests, 0);
    assert!(endpoint.is_healthy);
    assert_eq!(engine.in_flight_groups(), 0);

    // the next identical request goes upstream again
    let response = engine.route(hello("gpt-4o")).await.unwrap();
    assert!(!response.cached);
    assert_eq!(engine.in_flight_groups(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_tasks_stop_on_shutdown() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut config = test_config();
    config.health.enabled = true;
    config.health.interval_secs = 1;
    let engine = engine(config, transport.clone());

    assert!(engine.spawn_health_monitor());
    assert!(!engine.spawn_persistence().unwrap());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    engine.shutdown().await;

    let probes = transport.call_count();
    assert!(probes >= 3);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.call_count(), probes);
}
