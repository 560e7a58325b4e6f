//! NATS JetStream binding for the subscriber.
//!
//! A subscription maps onto a durable pull consumer with explicit acks. The
//! broker stops redelivering after `max_deliver` attempts, and every nak
//! carries the delay the retry policy picked. No consumer `backoff` is set:
//! the server would use it in place of `ack_wait` as the lease.

use anyhow::{Context, Result};
use async_nats::jetstream::{
    AckKind,
    consumer::{AckPolicy, DeliverPolicy, pull::Config as PullConfig},
    context::Context as JetStreamContext,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::{AckTransportError, ReceiveError};
use crate::retry_policy::RetryPolicy;
use crate::subscriber::SubscriptionName;

/// Connects to NATS, optionally authenticating with a credentials file.
pub async fn connect(
    nats_url: &str,
    client_name: &str,
    credentials: Option<&Path>,
) -> Result<async_nats::Client> {
    let options = match credentials {
        Some(path) => async_nats::ConnectOptions::with_credentials_file(path)
            .await
            .with_context(|| format!("Failed to load NATS credentials from {:?}", path))?,
        None => async_nats::ConnectOptions::new(),
    };

    options
        .name(client_name)
        .connect(nats_url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", nats_url))
}

/// One JetStream message, settled through [`Envelope`].
pub struct JetStreamEnvelope {
    inner: async_nats::jetstream::Message,
}

impl JetStreamEnvelope {
    pub fn new(inner: async_nats::jetstream::Message) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Envelope for JetStreamEnvelope {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn delivery_attempt(&self) -> Option<u32> {
        self.inner
            .info()
            .ok()
            .and_then(|info| u32::try_from(info.delivered).ok())
    }

    async fn ack(self) -> Result<(), AckTransportError> {
        self.inner
            .ack()
            .await
            .map_err(|e| AckTransportError::ack(e.to_string()))
    }

    async fn nack(self, redeliver_after: Option<Duration>) -> Result<(), AckTransportError> {
        self.inner
            .ack_with(AckKind::Nak(redeliver_after))
            .await
            .map_err(|e| AckTransportError::nack(e.to_string()))
    }
}

/// Consumer settings that are not part of the retry policy.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub filter_subject: Option<String>,
    /// Lease: how long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,
    pub max_ack_pending: usize,
}

/// Builds the durable pull consumer config for a subscription.
pub fn consumer_config(
    subscription: &SubscriptionName,
    policy: &RetryPolicy,
    settings: &ConsumerSettings,
) -> PullConfig {
    PullConfig {
        durable_name: Some(subscription.to_string()),
        ack_policy: AckPolicy::Explicit,
        deliver_policy: DeliverPolicy::All,
        filter_subject: settings.filter_subject.clone().unwrap_or_default(),
        ack_wait: settings.ack_wait,
        max_deliver: i64::from(policy.max_attempts()),
        max_ack_pending: i64::try_from(settings.max_ack_pending).unwrap_or(i64::MAX),
        ..Default::default()
    }
}

/// A subscription bound to a JetStream stream.
pub struct JetStreamSubscription {
    jetstream: JetStreamContext,
    stream_name: String,
    subscription: SubscriptionName,
}

impl JetStreamSubscription {
    /// Reuses the durable consumer if it exists, otherwise creates it with the
    /// configured retry policy.
    pub async fn bind(
        jetstream: JetStreamContext,
        stream_name: &str,
        subscription: &SubscriptionName,
        policy: &RetryPolicy,
        settings: &ConsumerSettings,
    ) -> Result<Self> {
        info!(
            "Setting up JetStream consumer '{}' for stream '{}'...",
            subscription, stream_name
        );

        let stream = jetstream
            .get_stream(stream_name)
            .await
            .with_context(|| format!("Failed to get JetStream stream '{}'", stream_name))?;

        match stream.get_consumer::<PullConfig>(subscription.as_str()).await {
            Ok(consumer) => {
                let existing = &consumer.cached_info().config;

                if existing.max_deliver != i64::from(policy.max_attempts()) {
                    warn!(
                        "JetStream consumer '{}' has max_deliver={} but the retry policy allows {} attempts; later deliveries are nacked with max_delay",
                        subscription,
                        existing.max_deliver,
                        policy.max_attempts()
                    );
                }
                info!(
                    "JetStream consumer '{}' already exists, reusing it",
                    subscription
                );
            }
            Err(_) => {
                info!("Creating new JetStream consumer '{}'...", subscription);
                stream
                    .create_consumer(consumer_config(subscription, policy, settings))
                    .await
                    .with_context(|| {
                        format!("Failed to create JetStream consumer '{}'", subscription)
                    })?;
                info!("JetStream consumer '{}' created", subscription);
            }
        }

        Ok(Self {
            jetstream,
            stream_name: stream_name.to_string(),
            subscription: subscription.clone(),
        })
    }

    /// Opens the message stream. Items are envelopes ready for the
    /// subscriber loop.
    pub async fn deliveries(
        &self,
    ) -> Result<BoxStream<'static, Result<JetStreamEnvelope, ReceiveError>>> {
        let consumer = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .context("Failed to get stream")?
            .get_consumer::<PullConfig>(self.subscription.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get consumer: {}", e))?;

        let messages = consumer
            .messages()
            .await
            .context("Failed to get messages")?;

        info!(
            "JetStream consumer ready, waiting for messages on stream '{}'",
            self.stream_name
        );

        Ok(messages
            .map(|message| {
                message
                    .map(JetStreamEnvelope::new)
                    .map_err(|e| ReceiveError(e.to_string()))
            })
            .boxed())
    }
}
