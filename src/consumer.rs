use std::{collections::HashMap, sync::Arc, time::Duration};

use futures_util::{Stream, StreamExt};
use tokio::{
    sync::{RwLock, Semaphore, watch},
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ack::{AckController, Delivery, DeliveryHandle},
    dispatcher::Dispatcher,
    error::BrokerError,
};

/// Which queue consumers are currently pulling deliveries.
#[derive(Debug, Default)]
pub struct ConsumerStatus {
    queues: RwLock<HashMap<String, bool>>,
}

impl ConsumerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, queue: &str) {
        self.queues.write().await.entry(queue.to_string()).or_insert(false);
    }

    pub async fn set_running(&self, queue: &str, running: bool) {
        self.queues.write().await.insert(queue.to_string(), running);
    }

    pub async fn snapshot(&self) -> HashMap<String, bool> {
        self.queues.read().await.clone()
    }
}

pub fn consumer_tag(queue: &str) -> String {
    format!("email-worker-{}-{}", queue, Uuid::new_v4())
}

/// Pulls deliveries for one queue and handles each on its own task, with at
/// most `concurrency` deliveries in flight.
pub struct QueueConsumer {
    queue: String,
    dispatcher: Arc<Dispatcher>,
    controller: Arc<AckController>,
    status: Arc<ConsumerStatus>,
    concurrency: usize,
    shutdown_timeout: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        controller: Arc<AckController>,
        status: Arc<ConsumerStatus>,
    ) -> Self {
        Self {
            queue: queue.into(),
            dispatcher,
            controller,
            status,
            concurrency: 10,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Runs until `shutdown` flips to true or the delivery stream fails.
    ///
    /// Deliveries already being handled are given `shutdown_timeout` to
    /// resolve before this returns. A stream that ends or errors is reported
    /// as an error: the channel behind it is gone.
    pub async fn run<S, H>(
        &self,
        mut deliveries: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError>
    where
        S: Stream<Item = Result<Delivery<H>, BrokerError>> + Unpin,
        H: DeliveryHandle,
    {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        self.status.set_running(&self.queue, true).await;
        info!(
            queue = %self.queue,
            concurrency = self.concurrency,
            "Waiting for messages"
        );

        let result = loop {
            let permit = tokio::select! {
                _ = stop_requested(&mut shutdown) => break Ok(()),
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let next = tokio::select! {
                _ = stop_requested(&mut shutdown) => break Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => break Err(e),
                None => break Err(BrokerError::StreamClosed(self.queue.clone())),
            };

            while let Some(finished) = in_flight.try_join_next() {
                log_task_failure(&self.queue, finished);
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let controller = Arc::clone(&self.controller);

            in_flight.spawn(async move {
                let _permit = permit;
                handle_delivery(&dispatcher, &controller, delivery).await;
            });
        };

        self.status.set_running(&self.queue, false).await;

        match &result {
            Ok(()) => info!(queue = %self.queue, "Consumer stopping"),
            Err(e) => error!(queue = %self.queue, error = %e, "Consumer failed"),
        }

        self.drain(in_flight).await;

        result
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(
            queue = %self.queue,
            in_flight = in_flight.len(),
            "Waiting for in-flight deliveries to resolve"
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(finished) = in_flight.join_next().await {
                log_task_failure(&self.queue, finished);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                queue = %self.queue,
                abandoned = in_flight.len(),
                "Shutdown timeout elapsed, abandoning in-flight deliveries"
            );
            in_flight.abort_all();
        }
    }
}

async fn handle_delivery<H: DeliveryHandle>(
    dispatcher: &Dispatcher,
    controller: &AckController,
    delivery: Delivery<H>,
) {
    let queue = delivery.queue.clone();
    let delivery_tag = delivery.delivery_tag();

    if delivery.redelivered {
        debug!(queue = %queue, delivery_tag, "Processing redelivered message");
    }

    let outcome = dispatcher.dispatch(&delivery.data).await;

    if let Err(e) = controller.resolve(delivery, outcome).await {
        error!(
            queue = %queue,
            delivery_tag,
            outcome = %outcome,
            error = %e,
            "Failed to resolve delivery"
        );
    }
}

// Also resolves when the sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_task_failure(queue: &str, finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        error!(queue, error = %e, "Delivery task panicked");
    }
}
