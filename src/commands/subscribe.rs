use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::{error, info, warn};

use pubsub_subscriber::config::SubscriberConfig;
use pubsub_subscriber::jetstream::{self, JetStreamSubscription};
use pubsub_subscriber::observer::TracingObserver;
use pubsub_subscriber::processor::LoggingProcessor;
use pubsub_subscriber::subscriber::SubscriberLoop;

pub async fn handle_subscribe(config: SubscriberConfig) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "subscribe");
        scope.set_tag("project_id", &config.project_id);
        scope.set_tag("subscription", config.subscription.as_str());
    });

    info!(
        "Starting subscriber - project: {}, NATS: {}, stream: {}, subscription: {}",
        config.project_id, config.nats_url, config.stream, config.subscription
    );
    info!(
        "Retry policy: max_attempts={}, initial_delay={:?}, max_delay={:?}, delay_multiplier={}",
        config.retry.max_attempts(),
        config.retry.initial_delay(),
        config.retry.max_delay(),
        config.retry.delay_multiplier()
    );
    info!("Redelivery delays: {:?}", config.retry.backoff_schedule());

    if let Some(port) = config.metrics_port {
        pubsub_subscriber::metrics::start_metrics_exporter(port)?;
        tokio::spawn(
            pubsub_subscriber::metrics::process_metrics_task()
                .instrument(tracing::info_span!("process_metrics")),
        );
    }
    // Needs the recorder installed above, otherwise these are no-ops
    pubsub_subscriber::metrics::initialize_subscriber_metrics();

    let policy = Arc::new(config.retry);
    let subscriber = SubscriberLoop::new(
        config.subscription.as_str(),
        Arc::new(LoggingProcessor),
        policy.clone(),
    )?
    .with_observer(Arc::new(TracingObserver))
    .with_max_in_flight(config.max_in_flight)?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let client_name = format!("{}-subscriber", config.project_id);

    // Retry loop for NATS connection and consumer setup
    while !shutdown.is_cancelled() {
        info!("Connecting to NATS at {}...", config.nats_url);
        let client = match jetstream::connect(
            &config.nats_url,
            &client_name,
            config.credentials.as_deref(),
        )
        .await
        {
            Ok(client) => {
                info!("Connected to NATS successfully");
                client
            }
            Err(e) => {
                error!("Failed to connect to NATS: {:#} - retrying in 1s", e);
                metrics::counter!("subscriber.connection.failed").increment(1);
                pause_unless_cancelled(&shutdown).await;
                continue;
            }
        };

        let subscription = match JetStreamSubscription::bind(
            async_nats::jetstream::new(client),
            &config.stream,
            &config.subscription,
            &policy,
            &config.consumer,
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to set up JetStream consumer: {:#} - retrying in 1s", e);
                metrics::counter!("subscriber.consumer_setup.failed").increment(1);
                pause_unless_cancelled(&shutdown).await;
                continue;
            }
        };

        let deliveries = match subscription.deliveries().await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!("Failed to open message stream: {:#} - retrying in 1s", e);
                metrics::counter!("subscriber.consumer_setup.failed").increment(1);
                pause_unless_cancelled(&shutdown).await;
                continue;
            }
        };

        metrics::gauge!("subscriber.connection.connected").set(1.0);
        let summary = subscriber.run(deliveries, shutdown.clone()).await;
        metrics::gauge!("subscriber.connection.connected").set(0.0);

        if shutdown.is_cancelled() {
            info!(
                "Subscriber stopped gracefully after {} messages ({} acked, {} nacked)",
                summary.received, summary.acked, summary.nacked
            );
            break;
        }

        warn!("Message stream ended unexpectedly - reconnecting in 1s");
        pause_unless_cancelled(&shutdown).await;
    }

    Ok(())
}

async fn pause_unless_cancelled(shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(tokio::time::Duration::from_secs(1)) => {}
    }
}

/// Cancel `shutdown` on SIGTERM or SIGINT. In-flight messages are settled by
/// the subscriber loop before it returns.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to register signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, draining in-flight messages...");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT (Ctrl+C), draining in-flight messages...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT (Ctrl+C), draining in-flight messages...");
                }
                Err(err) => {
                    error!("Failed to listen for SIGINT signal: {}", err);
                    return;
                }
            }
        }

        shutdown.cancel();
    });
}
