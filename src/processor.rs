use async_trait::async_trait;
use tracing::info;

use crate::error::ProcessingFailure;
use crate::message::DomainMessage;

/// Business logic run for every decoded message.
///
/// Returning `Err` asks for redelivery. Panics are caught by the subscriber
/// and treated the same way.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &DomainMessage) -> Result<(), ProcessingFailure>;
}

/// Default processor: records each message and accepts it.
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &DomainMessage) -> Result<(), ProcessingFailure> {
        info!(
            message_id = %message.id,
            message_type = %message.kind(),
            content = message.content.as_deref().unwrap_or(""),
            timestamp = ?message.timestamp,
            "Processing message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_processor_accepts_everything() {
        let message = DomainMessage {
            id: "m1".to_string(),
            content: None,
            timestamp: None,
            message_type: None,
        };
        assert!(LoggingProcessor.process(&message).await.is_ok());
    }
}
