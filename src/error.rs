use lapin::{
    ErrorKind,
    protocol::{AMQPErrorKind, AMQPSoftError},
};
use thiserror::Error;

/// Failures talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to RabbitMQ: {0}")]
    Connection(#[source] lapin::Error),

    #[error("RabbitMQ channel error: {0}")]
    Channel(#[source] lapin::Error),

    #[error("queue '{queue}' already exists with different properties: {source}")]
    QueueConflict {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue '{queue}': {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to consume from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("delivery stream for queue '{0}' closed")]
    StreamClosed(String),

    #[error("failed to resolve delivery {delivery_tag}: {reason}")]
    Ack { delivery_tag: u64, reason: String },
}

impl BrokerError {
    /// The broker answered with `PRECONDITION_FAILED` (reply code 406).
    pub fn is_precondition_failed(error: &lapin::Error) -> bool {
        matches!(
            error.kind(),
            ErrorKind::ProtocolError(e)
                if e.kind() == &AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        )
    }
}
