use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    clients::email::{EmailGateway, GatewayError},
    models::{
        message::{EmailJob, NotificationJob},
        outcome::{DispatchOutcome, RejectReason},
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

// Upper bound on how much of an undecodable payload ends up in the logs.
const MAX_LOGGED_PAYLOAD_BYTES: usize = 256;

/// Turns raw queue payloads into email sends.
pub struct Dispatcher {
    gateway: Arc<dyn EmailGateway>,
    retry_config: RetryConfig,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn EmailGateway>, retry_config: RetryConfig) -> Self {
        Self {
            gateway,
            retry_config,
        }
    }

    pub async fn dispatch(&self, raw: &[u8]) -> DispatchOutcome {
        let job = match parse_job(raw) {
            Ok(job) => job,
            Err(reason) => return DispatchOutcome::Rejected(reason),
        };

        info!(
            recipient = %job.recipient(),
            job_type = %job.job_type(),
            "Processing email job"
        );

        match self.send(&job).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                error!(
                    recipient = %job.recipient(),
                    job_type = %job.job_type(),
                    gateway = self.gateway.name(),
                    error = %e,
                    "Failed to send email"
                );
                DispatchOutcome::Rejected(RejectReason::DeliveryFailed)
            }
        }
    }

    async fn send(&self, job: &EmailJob) -> Result<(), GatewayError> {
        let email = job.render();

        retry_with_backoff(
            &self.retry_config,
            || self.gateway.send(&email.to, &email.subject, &email.body),
            GatewayError::is_transient,
        )
        .await
    }
}

/// Decodes and validates a payload without touching the gateway.
pub fn parse_job(raw: &[u8]) -> Result<EmailJob, RejectReason> {
    let job = NotificationJob::decode(raw).map_err(|e| {
        let shown = &raw[..raw.len().min(MAX_LOGGED_PAYLOAD_BYTES)];
        warn!(
            error = %e,
            payload = %String::from_utf8_lossy(shown),
            payload_len = raw.len(),
            "Failed to decode job payload"
        );
        RejectReason::MalformedPayload
    })?;

    let job_type = job.job_type.clone();

    EmailJob::try_from(job).inspect_err(|reason| {
        warn!(
            job_type = job_type.as_deref().unwrap_or("<missing>"),
            reason = %reason,
            "Invalid job payload"
        );
    })
}
