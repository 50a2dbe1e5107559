use std::time::Duration;

use anyhow::{Error, Result, anyhow, bail};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{queue::QueueBinding, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub queue_name_forgot: String,
    pub queue_name_register: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    pub email_user: Option<String>,
    pub email_pass: Option<String>,
    pub email_from: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_true() -> bool {
    true
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    /// Loads from an explicit set of `(KEY, value)` pairs instead of the
    /// process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(pairs)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rabbitmq_url.trim().is_empty() {
            bail!("RABBITMQ_URL must not be empty");
        }
        if self.queue_name_forgot.trim().is_empty() {
            bail!("QUEUE_NAME_FORGOT must not be empty");
        }
        if self.queue_name_register.trim().is_empty() {
            bail!("QUEUE_NAME_REGISTER must not be empty");
        }
        if self.worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if self.max_retry_attempts == 0 {
            bail!("MAX_RETRY_ATTEMPTS must be at least 1");
        }
        if self.sender_address().is_none() {
            bail!("EMAIL_FROM or EMAIL_USER must be set");
        }

        Ok(())
    }

    /// Every queue the worker declares and consumes, forgot queue first.
    pub fn queue_bindings(&self) -> Vec<QueueBinding> {
        let mut bindings = vec![QueueBinding::durable(&self.queue_name_forgot)];
        if self.queue_name_register != self.queue_name_forgot {
            bindings.push(QueueBinding::durable(&self.queue_name_register));
        }
        bindings
    }

    pub fn sender_address(&self) -> Option<&str> {
        self.email_from
            .as_deref()
            .or(self.email_user.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}
