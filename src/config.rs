use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigurationError;
use crate::jetstream::ConsumerSettings;
use crate::retry_policy::{RetryPolicy, RetrySettings};
use crate::subscriber::{DEFAULT_MAX_IN_FLIGHT, SubscriptionName};

/// Broker connection section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub project_id: String,
    pub url: String,
    /// NATS credentials file
    pub credentials: Option<PathBuf>,
    pub stream: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            project_id: "local".to_string(),
            url: "nats://localhost:4222".to_string(),
            credentials: None,
            stream: "MESSAGES".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSection {
    pub name: Option<String>,
    pub filter_subject: Option<String>,
    pub max_in_flight: usize,
    #[serde(with = "humantime_serde")]
    pub ack_wait: Duration,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            name: None,
            filter_subject: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ack_wait: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub port: Option<u16>,
}

/// Config file as written on disk. Every field has a default except the
/// subscription name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfigFile {
    pub broker: BrokerSection,
    pub subscription: SubscriptionSection,
    pub retry: RetrySettings,
    pub metrics: MetricsSection,
}

/// Validated configuration the subscriber starts from.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub project_id: String,
    pub nats_url: String,
    pub credentials: Option<PathBuf>,
    pub stream: String,
    pub subscription: SubscriptionName,
    pub max_in_flight: usize,
    pub consumer: ConsumerSettings,
    pub retry: RetryPolicy,
    pub metrics_port: Option<u16>,
}

impl SubscriberConfigFile {
    /// Loads the file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project_id) = lookup("PUBSUB_PROJECT_ID") {
            self.broker.project_id = project_id;
        }
        if let Some(credentials) = lookup("PUBSUB_CREDENTIALS") {
            self.broker.credentials = Some(PathBuf::from(credentials));
        }
        if let Some(url) = lookup("NATS_URL") {
            self.broker.url = url;
        }
        if let Some(stream) = lookup("PUBSUB_STREAM") {
            self.broker.stream = stream;
        }
        if let Some(name) = lookup("PUBSUB_SUBSCRIPTION") {
            self.subscription.name = Some(name);
        }
        if let Some(port) = lookup("METRICS_PORT") {
            let parsed = port
                .parse::<u16>()
                .map_err(|e| ConfigurationError::InvalidValue {
                    key: "METRICS_PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                })?;
            self.metrics.port = Some(parsed);
        }
        Ok(())
    }

    pub fn validate(self) -> Result<SubscriberConfig, ConfigurationError> {
        let subscription =
            SubscriptionName::parse(self.subscription.name.as_deref().unwrap_or_default())?;
        let retry = self.retry.validate()?;

        if self.subscription.max_in_flight == 0 {
            return Err(ConfigurationError::ZeroMaxInFlight);
        }

        if self.broker.stream.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "broker.stream",
                value: self.broker.stream,
                reason: "stream name must not be blank".to_string(),
            });
        }

        Ok(SubscriberConfig {
            project_id: self.broker.project_id,
            nats_url: self.broker.url,
            credentials: self.broker.credentials,
            stream: self.broker.stream,
            subscription,
            max_in_flight: self.subscription.max_in_flight,
            consumer: ConsumerSettings {
                filter_subject: self.subscription.filter_subject,
                ack_wait: self.subscription.ack_wait,
                max_ack_pending: self.subscription.max_in_flight,
            },
            retry,
            metrics_port: self.metrics.port,
        })
    }
}

impl SubscriberConfig {
    /// File, then environment overrides, then validation.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let mut file = SubscriberConfigFile::load(path)?;
        file.apply_env_overrides(|key| std::env::var(key).ok())?;
        file.validate()
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` on the command line
/// 2. `PUBSUB_SUBSCRIBER_CONFIG` env var
/// 3. `./subscriber.toml`
pub fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }

    if let Ok(path) = std::env::var("PUBSUB_SUBSCRIBER_CONFIG") {
        return PathBuf::from(path);
    }

    PathBuf::from("./subscriber.toml")
}
