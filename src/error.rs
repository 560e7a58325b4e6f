//! Error taxonomy for the subscriber.
//!
//! Only [`ConfigurationError`] is fatal. Everything else is scoped to a single
//! delivery and ends in an ack or nack, never in a crashed loop.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal startup error. The process refuses to start consuming.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("subscription name is missing or blank")]
    MissingSubscription,

    #[error("retry policy max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("retry policy initial_delay must be greater than zero")]
    ZeroInitialDelay,

    #[error("retry policy max_delay ({max_delay:?}) is below initial_delay ({initial_delay:?})")]
    MaxDelayBelowInitial {
        initial_delay: Duration,
        max_delay: Duration,
    },

    #[error("retry policy delay_multiplier must be greater than 1.0, got {0}")]
    MultiplierNotAboveOne(f64),

    #[error("retry policy delay_multiplier must be finite")]
    InfiniteMultiplier,

    #[error("max_in_flight must be at least 1")]
    ZeroMaxInFlight,

    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The payload could not be turned into a [`crate::message::DomainMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("payload is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("payload is JSON but not an object")]
    NotAnObject,

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("required field '{0}' is blank")]
    BlankField(&'static str),

    #[error("field '{field}' must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' holds an invalid date-time {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// The processor rejected a decoded message and wants it redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ProcessingFailure {
    reason: String,
}

impl ProcessingFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Builds a failure from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(format!("panicked: {detail}"))
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<anyhow::Error> for ProcessingFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// An ack or nack call could not reach the broker.
///
/// Never retried locally: the unsettled message is redelivered once its
/// lease expires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {reason}")]
pub struct AckTransportError {
    operation: &'static str,
    reason: String,
}

impl AckTransportError {
    pub fn ack(reason: impl Into<String>) -> Self {
        Self {
            operation: "ack",
            reason: reason.into(),
        }
    }

    pub fn nack(reason: impl Into<String>) -> Self {
        Self {
            operation: "nack",
            reason: reason.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// The transport failed to hand over the next envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to receive message: {0}")]
pub struct ReceiveError(pub String);
