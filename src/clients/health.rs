use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    ack::AckController,
    clients::email::EmailGateway,
    consumer::ConsumerStatus,
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

pub struct HealthChecker {
    gateway: Arc<dyn EmailGateway>,
    consumers: Arc<ConsumerStatus>,
    controller: Arc<AckController>,
}

impl HealthChecker {
    pub fn new(
        gateway: Arc<dyn EmailGateway>,
        consumers: Arc<ConsumerStatus>,
        controller: Arc<AckController>,
    ) -> Self {
        Self {
            gateway,
            consumers,
            controller,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        let broker_health = self.check_consumers().await;
        checks.insert("message_broker".to_string(), broker_health);

        let gateway_health = self.check_gateway().await;
        checks.insert("email_gateway".to_string(), gateway_health);

        let overall_status = self.determine_overall_status(&checks);

        HealthCheckResponse {
            status: overall_status,
            timestamp: Utc::now(),
            checks,
            deliveries: self.controller.counts(),
        }
    }

    async fn check_consumers(&self) -> ServiceHealth {
        let queues = self.consumers.snapshot().await;

        let mut stopped: Vec<&str> = queues
            .iter()
            .filter(|(_, running)| !**running)
            .map(|(queue, _)| queue.as_str())
            .collect();
        stopped.sort_unstable();

        if queues.is_empty() {
            warn!("No queue consumers registered");
            ServiceHealth::unhealthy("No queue consumers registered".to_string())
        } else if stopped.is_empty() {
            debug!(queues = queues.len(), "All queue consumers running");
            ServiceHealth::healthy(0)
        } else {
            warn!(stopped = ?stopped, "Queue consumers not running");
            ServiceHealth::unhealthy(format!("Consumers not running: {}", stopped.join(", ")))
        }
    }

    async fn check_gateway(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.gateway.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(
                    gateway = self.gateway.name(),
                    response_time_ms = elapsed,
                    "Email gateway health check passed"
                );
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(gateway = self.gateway.name(), error = %e, "Email gateway health check failed");
                ServiceHealth::degraded(format!("Gateway check failed: {}", e))
            }
        }
    }

    fn determine_overall_status(&self, checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let has_unhealthy = checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy);

        let has_degraded = checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded);

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
