use anyhow::anyhow;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{self, authentication::Credentials},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

const SUBMISSION_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl GatewayError {
    /// Whether sending the same email again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Sends a single plain-text email.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), GatewayError>;

    async fn health_check(&self) -> Result<(), GatewayError>;

    fn name(&self) -> &'static str;
}

pub struct SmtpGateway {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpGateway {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let sender = config
            .sender_address()
            .ok_or_else(|| anyhow!("No sender address configured"))?;
        let from: Mailbox = sender
            .parse()
            .map_err(|e| anyhow!("Invalid sender address '{}': {}", sender, e))?;

        let credentials = match (&config.email_user, &config.email_pass) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        };

        let transport = if config.smtp_use_tls {
            // 587 is the submission port and upgrades with STARTTLS; anything
            // else gets implicit TLS.
            let relay = if config.smtp_port == SUBMISSION_PORT {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            };
            let mut builder = relay
                .map_err(|e| anyhow!("Failed to create SMTP relay: {}", e))?
                .port(config.smtp_port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        } else {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                    .port(config.smtp_port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        };

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            tls = config.smtp_use_tls,
            "SMTP gateway initialized"
        );

        Ok(Self { transport, from })
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, GatewayError> {
        let recipient: Mailbox = to.parse().map_err(|e: lettre::address::AddressError| {
            GatewayError::InvalidAddress {
                address: to.to_string(),
                reason: e.to_string(),
            }
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| GatewayError::Permanent(format!("Failed to build message: {}", e)))
    }
}

fn classify(error: smtp::Error) -> GatewayError {
    if error.is_permanent() {
        GatewayError::Permanent(error.to_string())
    } else {
        GatewayError::Transient(error.to_string())
    }
}

#[async_trait]
impl EmailGateway for SmtpGateway {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), GatewayError> {
        let message = self.build_message(to, subject, body)?;

        debug!(recipient = to, "Sending email over SMTP");

        self.transport.send(message).await.map_err(classify)?;

        info!(recipient = to, "Email sent");

        Ok(())
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(GatewayError::Transient(
                "SMTP server did not accept the connection".to_string(),
            )),
            Err(e) => Err(classify(e)),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
