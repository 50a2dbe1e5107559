use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use email_worker::{
    ack::{Delivery, DeliveryHandle},
    clients::email::{EmailGateway, GatewayError},
    error::BrokerError,
    models::{message::OutgoingEmail, retry::RetryConfig},
};

#[derive(Debug, Clone, Copy)]
pub enum FailureMode {
    Permanent,
    AlwaysTransient,
    /// Fails transiently on the first `n` attempts, then succeeds.
    TransientTimes(u32),
}

/// Records every email it is asked to send.
#[derive(Default)]
pub struct MockEmailGateway {
    sent: Mutex<Vec<OutgoingEmail>>,
    attempts: AtomicU32,
    failure: Option<FailureMode>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl MockEmailGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mode: FailureMode) -> Self {
        Self {
            failure: Some(mode),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailGateway for MockEmailGateway {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), GatewayError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.fetch_add(1, Ordering::SeqCst);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failure {
            Some(FailureMode::Permanent) => {
                return Err(GatewayError::Permanent("550 mailbox unavailable".to_string()));
            }
            Some(FailureMode::AlwaysTransient) => {
                return Err(GatewayError::Transient("421 try again later".to_string()));
            }
            Some(FailureMode::TransientTimes(n)) if attempt <= n => {
                return Err(GatewayError::Transient("421 try again later".to_string()));
            }
            _ => {}
        }

        self.sent.lock().unwrap().push(OutgoingEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });

        Ok(())
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        match self.failure {
            Some(_) => Err(GatewayError::Transient("connection refused".to_string())),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ack,
    Reject { requeue: bool },
}

pub type ResolutionLog = Arc<Mutex<Vec<(u64, Resolution)>>>;

/// Records how each delivery was resolved instead of talking to a broker.
pub struct RecordingHandle {
    delivery_tag: u64,
    log: ResolutionLog,
    fail: bool,
}

impl RecordingHandle {
    pub fn new(delivery_tag: u64, log: &ResolutionLog) -> Self {
        Self {
            delivery_tag,
            log: Arc::clone(log),
            fail: false,
        }
    }

    pub fn broken(delivery_tag: u64, log: &ResolutionLog) -> Self {
        Self {
            fail: true,
            ..Self::new(delivery_tag, log)
        }
    }

    fn record(&self, resolution: Resolution) -> Result<(), BrokerError> {
        if self.fail {
            return Err(BrokerError::Ack {
                delivery_tag: self.delivery_tag,
                reason: "channel closed".to_string(),
            });
        }
        self.log.lock().unwrap().push((self.delivery_tag, resolution));
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandle for RecordingHandle {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.record(Resolution::Ack)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.record(Resolution::Reject { requeue })
    }
}

pub fn resolution_log() -> ResolutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn delivery(delivery_tag: u64, payload: &str, log: &ResolutionLog) -> Delivery<RecordingHandle> {
    Delivery::new(
        "test_queue",
        payload.as_bytes().to_vec(),
        false,
        RecordingHandle::new(delivery_tag, log),
    )
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2,
    }
}

pub const WELCOME: &str = r#"{"type":"welcome","email":"a@x.com","subject":"Hi","text":"Welcome!"}"#;
pub const PASSWORD_RESET: &str = r#"{"type":"password_reset","email":"b@x.com","code":"123456"}"#;
pub const MISSING_CODE: &str = r#"{"type":"password_reset","email":"b@x.com"}"#;
pub const MISSING_TYPE: &str = r#"{"email":"c@x.com"}"#;
