use std::{process::ExitCode, sync::Arc};

use anyhow::{Error, Result, anyhow};
use email_worker::{
    ack::AckController,
    api::run_api_server,
    clients::{
        email::{EmailGateway, SmtpGateway},
        health::HealthChecker,
        rbmq::RabbitMqClient,
    },
    config::{Config, LogFormat},
    consumer::{ConsumerStatus, QueueConsumer, consumer_tag},
    dispatcher::Dispatcher,
    error::BrokerError,
    utils::init_tracing,
};
use tokio::{
    signal,
    sync::watch,
    task::{JoinError, JoinSet},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Pretty);
            error!(error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => {
            info!("Email worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Email worker exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Error> {
    // lettre's rustls transport needs a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let gateway: Arc<dyn EmailGateway> = Arc::new(SmtpGateway::new(&config)?);
    let dispatcher = Arc::new(Dispatcher::new(gateway.clone(), config.retry_config()));
    let controller = Arc::new(AckController::new());
    let status = Arc::new(ConsumerStatus::new());

    let client = RabbitMqClient::connect(&config.rabbitmq_url, config.prefetch_count).await?;

    // Every queue is declared before any of them is consumed.
    let mut channels = Vec::new();
    for binding in config.queue_bindings() {
        channels.push(client.bind(&binding).await?);
        status.register(&binding.name).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumers = JoinSet::new();
    for channel in &channels {
        let queue = channel.binding().name.clone();
        let deliveries = channel.consume(&consumer_tag(&queue)).await?;

        let consumer = QueueConsumer::new(
            queue,
            Arc::clone(&dispatcher),
            Arc::clone(&controller),
            Arc::clone(&status),
        )
        .with_concurrency(config.worker_concurrency)
        .with_shutdown_timeout(config.shutdown_timeout());

        let shutdown = shutdown_rx.clone();
        consumers.spawn(async move { consumer.run(deliveries, shutdown).await });
    }

    let health_checker = HealthChecker::new(gateway, Arc::clone(&status), Arc::clone(&controller));
    let api = tokio::spawn(run_api_server(
        config.server_port,
        health_checker,
        shutdown_rx.clone(),
    ));

    let mut failure = None;

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        Some(finished) = consumers.join_next() => {
            failure = Some(
                consumer_result(finished)
                    .err()
                    .unwrap_or_else(|| anyhow!("Consumer stopped unexpectedly")),
            );
        }
    }

    let _ = shutdown_tx.send(true);

    while let Some(finished) = consumers.join_next().await {
        if let Err(e) = consumer_result(finished) {
            failure.get_or_insert(e);
        }
    }

    match api.await {
        Ok(Err(e)) => warn!(error = %e, "Health check server failed"),
        Err(e) => warn!(error = %e, "Health check server task failed"),
        Ok(Ok(())) => {}
    }

    client.close().await;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn consumer_result(finished: Result<Result<(), BrokerError>, JoinError>) -> Result<(), Error> {
    match finished {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(anyhow!("Consumer task failed: {}", e)),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
