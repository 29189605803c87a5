//! Courier Drain - validates and drains a message queue.
//!
//! This binary:
//! 1. Connects to the first reachable server in `QUEUE_SERVERS`
//! 2. Polls the configured queue one message at a time
//! 3. Acks envelopes that pass their type's validators
//! 4. Re-publishes invalid envelopes with an error record until
//!    `MAX_REQUEUE`, then rejects them

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courier::envelope::Validator;
use courier::manager::DeliveryOf;
use courier::{
    Config, EmailMessage, Envelope, ErrorKind, InviteMessage, LapinTransport, Message, Retrieved,
    ServerConnectionManager,
};

/// Error code recorded on envelopes that fail validation.
const INVALID_MESSAGE_CODE: i64 = 422;

type Manager = ServerConnectionManager<LapinTransport>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("drain_starting");

    let config = Config::from_env();
    info!(
        servers = config.queue.servers.len(),
        prefix = %config.queue.prefix,
        queue = %config.default_queue,
        purpose = %config.purpose,
        max_requeue = config.max_requeue,
        "config_loaded"
    );

    run(config).await
}

/// Validators for the envelope's type namespace.
fn validators_for(envelope: &Envelope) -> &'static [Validator] {
    match envelope.namespace() {
        "email" => EmailMessage::VALIDATORS,
        "invite" => InviteMessage::VALIDATORS,
        _ => Envelope::VALIDATORS,
    }
}

fn is_deliverable(envelope: &Envelope) -> bool {
    validators_for(envelope).iter().all(|check| check(envelope))
}

async fn run(config: Config) -> Result<()> {
    let mut manager = Manager::from_settings(
        LapinTransport::default(),
        config.queue.clone(),
        &config.default_queue,
    );

    manager
        .open()
        .await
        .context("Failed to connect to RabbitMQ")?;

    declare_queue(&mut manager, &config).await?;

    let queue = manager
        .queue_name("")
        .context("Failed to resolve queue name")?;
    info!(queue = %queue, "drain_ready");

    let idle = Duration::from_millis(config.poll_interval_ms);

    // Create shutdown signal future
    let shutdown = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }
    };

    tokio::pin!(shutdown);

    loop {
        let polled = tokio::select! {
            _ = &mut shutdown => None,
            result = manager.retrieve_envelope(&config.purpose, "") => Some(result),
        };

        let result = match polled {
            Some(result) => result,
            None => {
                info!("drain_stopping");
                break;
            }
        };

        let wait = match result {
            Ok(Some(retrieved)) => {
                if let Err(e) = handle(&mut manager, &config, retrieved).await {
                    error!(error = %e, "envelope_handle_failed");
                }
                false
            }
            Ok(None) => true,
            Err(e) if e.kind() == ErrorKind::Malformed => {
                // Already rejected by the manager
                false
            }
            Err(e) if matches!(e.kind(), ErrorKind::Connectivity | ErrorKind::State) => {
                warn!(error = %e, "rabbitmq_connection_lost");
                let reset = manager.reset().await.map(|_| ());
                match reset {
                    Ok(()) => {
                        if let Err(e) = declare_queue(&mut manager, &config).await {
                            error!(error = %e, "rabbitmq_queue_declare_failed");
                        }
                    }
                    Err(e) => error!(error = %e, "rabbitmq_reset_failed"),
                }
                true
            }
            Err(e) => {
                error!(error = %e, "envelope_retrieve_failed");
                true
            }
        };

        if wait {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("drain_stopping");
                    break;
                }
                _ = tokio::time::sleep(idle) => {}
            }
        }
    }

    if let Err(e) = manager.close().await {
        warn!(error = %e, "rabbitmq_close_failed");
    }

    info!("drain_shutdown_complete");
    Ok(())
}

/// Declare the drained queue so `basic_get` never hits a missing queue.
async fn declare_queue(manager: &mut Manager, config: &Config) -> Result<()> {
    manager
        .open_queue_channel(&config.purpose, "", true)
        .await
        .context("Failed to declare queue")?;
    Ok(())
}

async fn handle(
    manager: &mut Manager,
    config: &Config,
    mut retrieved: Retrieved<DeliveryOf<LapinTransport>>,
) -> Result<()> {
    let envelope = &retrieved.envelope;

    if is_deliverable(envelope) {
        retrieved.ack().await.context("Failed to ack envelope")?;
        info!(
            message_id = %envelope.id(),
            message_type = %envelope.kind(),
            "envelope_drained"
        );
        return Ok(());
    }

    if envelope.requeue_count() >= config.max_requeue {
        warn!(
            message_id = %envelope.id(),
            message_type = %envelope.kind(),
            requeue_count = envelope.requeue_count(),
            "envelope_discarded"
        );
        retrieved
            .reject(false)
            .await
            .context("Failed to reject envelope")?;
        return Ok(());
    }

    let count = manager
        .requeue_envelope(
            &config.purpose,
            "",
            &mut retrieved,
            INVALID_MESSAGE_CODE,
            "message failed validation",
        )
        .await
        .context("Failed to requeue envelope")?;

    warn!(
        message_id = %retrieved.envelope.id(),
        requeue_count = count,
        "envelope_invalid"
    );
    Ok(())
}
