use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use lapin::{
    Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info, warn};

use crate::{
    ack::{Delivery, DeliveryHandle},
    error::BrokerError,
    models::queue::QueueBinding,
};

pub type DeliveryStream = BoxStream<'static, Result<Delivery<RabbitDeliveryHandle>, BrokerError>>;

/// One broker connection shared by every queue the worker consumes.
pub struct RabbitMqClient {
    connection: Connection,
    prefetch_count: u16,
}

impl RabbitMqClient {
    pub async fn connect(url: &str, prefetch_count: u16) -> Result<Self, BrokerError> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(BrokerError::Connection)?;

        info!("RabbitMQ connection established");

        Ok(Self {
            connection,
            prefetch_count,
        })
    }

    pub async fn open_channel(&self) -> Result<Channel, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(BrokerError::Channel)?;

        debug!(prefetch_count = self.prefetch_count, "RabbitMQ channel created");

        Ok(channel)
    }

    pub async fn declare_queue(channel: &Channel, binding: &QueueBinding) -> Result<(), BrokerError> {
        channel
            .queue_declare(
                binding.name.as_str(),
                QueueDeclareOptions {
                    durable: binding.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| {
                if BrokerError::is_precondition_failed(&source) {
                    BrokerError::QueueConflict {
                        queue: binding.name.clone(),
                        source,
                    }
                } else {
                    BrokerError::Declare {
                        queue: binding.name.clone(),
                        source,
                    }
                }
            })?;

        info!(queue = %binding, durable = binding.durable, "Queue declared");

        Ok(())
    }

    /// Opens a dedicated channel for `binding` and declares its queue on it.
    pub async fn bind(&self, binding: &QueueBinding) -> Result<QueueChannel, BrokerError> {
        let channel = self.open_channel().await?;
        Self::declare_queue(&channel, binding).await?;

        Ok(QueueChannel {
            channel,
            binding: binding.clone(),
        })
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "Worker shutdown").await {
            warn!(error = %e, "Failed to close RabbitMQ connection cleanly");
        } else {
            info!("RabbitMQ connection closed");
        }
    }
}

pub struct QueueChannel {
    channel: Channel,
    binding: QueueBinding,
}

impl QueueChannel {
    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    pub async fn consume(&self, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                self.binding.name.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Consume {
                queue: self.binding.name.clone(),
                source,
            })?;

        info!(queue = %self.binding, consumer_tag, "Consumer registered");

        let channel = self.channel.clone();
        let queue = self.binding.name.clone();

        Ok(consumer
            .map(move |result| match result {
                Ok(delivery) => Ok(Delivery::new(
                    queue.clone(),
                    delivery.data,
                    delivery.redelivered,
                    RabbitDeliveryHandle {
                        channel: channel.clone(),
                        delivery_tag: delivery.delivery_tag,
                    },
                )),
                Err(source) => Err(BrokerError::Consume {
                    queue: queue.clone(),
                    source,
                }),
            })
            .boxed())
    }
}

/// Resolves a delivery on the channel it arrived on, by its delivery tag.
#[derive(Clone)]
pub struct RabbitDeliveryHandle {
    channel: Channel,
    delivery_tag: u64,
}

#[async_trait]
impl DeliveryHandle for RabbitDeliveryHandle {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(self.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                delivery_tag: self.delivery_tag,
                reason: format!("Failed to acknowledge message: {}", e),
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(self.delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::Ack {
                delivery_tag: self.delivery_tag,
                reason: format!("Failed to reject message: {}", e),
            })
    }
}
