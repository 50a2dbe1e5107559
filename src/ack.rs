use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
    error::BrokerError,
    models::{health::DeliveryCounts, outcome::DispatchOutcome},
};

/// The broker-side handle of one delivery.
#[async_trait]
pub trait DeliveryHandle: Send + Sync + 'static {
    fn delivery_tag(&self) -> u64;

    async fn ack(&self) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to the worker by the broker, not yet resolved.
///
/// Resolving consumes the delivery, so it can be acknowledged or rejected
/// only once.
#[derive(Debug)]
pub struct Delivery<H> {
    pub queue: String,
    pub data: Vec<u8>,
    pub redelivered: bool,
    handle: H,
}

impl<H: DeliveryHandle> Delivery<H> {
    pub fn new(queue: impl Into<String>, data: Vec<u8>, redelivered: bool, handle: H) -> Self {
        Self {
            queue: queue.into(),
            data,
            redelivered,
            handle,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.handle.delivery_tag()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Reject { requeue: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Acknowledged,
    Rejected,
}

/// Rejections are never requeued.
pub fn decide(outcome: &DispatchOutcome) -> AckDecision {
    match outcome {
        DispatchOutcome::Handled => AckDecision::Ack,
        DispatchOutcome::Rejected(_) => AckDecision::Reject { requeue: false },
    }
}

#[derive(Debug, Default)]
pub struct AckController {
    acknowledged: AtomicU64,
    rejected: AtomicU64,
}

impl AckController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve<H: DeliveryHandle>(
        &self,
        delivery: Delivery<H>,
        outcome: DispatchOutcome,
    ) -> Result<AckState, BrokerError> {
        let delivery_tag = delivery.delivery_tag();

        match decide(&outcome) {
            AckDecision::Ack => {
                delivery.handle.ack().await?;
                self.acknowledged.fetch_add(1, Ordering::Relaxed);

                info!(queue = %delivery.queue, delivery_tag, "Delivery acknowledged");
                Ok(AckState::Acknowledged)
            }
            AckDecision::Reject { requeue } => {
                delivery.handle.reject(requeue).await?;
                self.rejected.fetch_add(1, Ordering::Relaxed);

                match outcome {
                    DispatchOutcome::Rejected(reason) if !reason.is_payload_error() => error!(
                        queue = %delivery.queue,
                        delivery_tag,
                        reason = %reason,
                        requeue,
                        "Delivery rejected after send failure"
                    ),
                    _ => warn!(
                        queue = %delivery.queue,
                        delivery_tag,
                        outcome = %outcome,
                        requeue,
                        "Delivery rejected"
                    ),
                }
                Ok(AckState::Rejected)
            }
        }
    }

    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
