//! Background health probes
//!
//! Every interval, each available model's endpoints get a tiny `"ping"`
//! completion. Endpoint results feed the load balancer; a model whose
//! endpoints all fail is disabled until re-enabled by hand.

use super::dispatch;
use crate::balancer::LoadBalancer;
use crate::registry::{HealthSnapshot, HealthStatus, ModelDescriptor, ModelRegistry};
use crate::request::{Message, UnifiedRequest};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROBE_MAX_TOKENS: u32 = 5;

/// Outcome of one probe round for one model
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Model id
    pub model_id: String,
    /// Endpoint ids that answered
    pub healthy_endpoints: Vec<String>,
    /// Endpoint ids that failed, with the reason
    pub failed_endpoints: Vec<(String, String)>,
}

impl ProbeReport {
    /// Whether at least one endpoint answered
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.healthy_endpoints.is_empty()
    }
}

/// Periodic prober of every available model
pub struct HealthMonitor {
    registry: Arc<ModelRegistry>,
    balancer: Arc<LoadBalancer>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        balancer: Arc<LoadBalancer>,
        transport: Arc<dyn Transport>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            balancer,
            transport,
            interval,
            probe_timeout,
        }
    }

    fn probe_request(model_id: &str) -> UnifiedRequest {
        UnifiedRequest::new(model_id)
            .with_message(Message::user("ping"))
            .with_max_tokens(PROBE_MAX_TOKENS)
    }

    async fn probe_model(&self, model: &ModelDescriptor) -> ProbeReport {
        let request = Self::probe_request(&model.model_id);
        let mut report = ProbeReport {
            model_id: model.model_id.clone(),
            healthy_endpoints: Vec::new(),
            failed_endpoints: Vec::new(),
        };
        let mut best_latency: Option<u64> = None;

        for endpoint in model.endpoints() {
            self.balancer.add_endpoint(&endpoint.id, endpoint.weight);
            let started = Instant::now();
            match dispatch(
                self.transport.as_ref(),
                &request,
                model,
                &endpoint,
                self.probe_timeout,
            )
            .await
            {
                Ok(_) => {
                    let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    best_latency = Some(best_latency.map_or(latency, |b| b.min(latency)));
                    self.balancer.mark_healthy(&endpoint.id);
                    report.healthy_endpoints.push(endpoint.id);
                }
                Err(e) => {
                    debug!(endpoint = %endpoint.id, error = %e, "Health probe failed");
                    self.balancer.mark_unhealthy(&endpoint.id);
                    report.failed_endpoints.push((endpoint.id, e.to_string()));
                }
            }
        }

        if report.is_healthy() {
            self.registry.record_health(
                &model.model_id,
                HealthSnapshot {
                    status: HealthStatus::Healthy,
                    latency_ms: best_latency,
                    checked_at: Some(Utc::now()),
                    error: None,
                },
                false,
            );
        } else {
            let error = report
                .failed_endpoints
                .first()
                .map(|(_, e)| e.clone())
                .unwrap_or_default();
            warn!(model = %model.model_id, error = %error, "Model failed health check, disabling");
            self.registry.record_health(
                &model.model_id,
                HealthSnapshot {
                    status: HealthStatus::Unhealthy,
                    latency_ms: None,
                    checked_at: Some(Utc::now()),
                    error: Some(error),
                },
                true,
            );
        }
        report
    }

    /// Probe every available model once
    pub async fn run_once(&self) -> Vec<ProbeReport> {
        let models = self.registry.available();
        let mut reports = Vec::with_capacity(models.len());
        for model in &models {
            reports.push(self.probe_model(model).await);
        }
        let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
        debug!(models = reports.len(), unhealthy, "Health check round complete");
        reports
    }

    /// Probe on every tick until `token` is cancelled
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Health monitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.run_once() => {}
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}
