use std::time::Duration;

use async_trait::async_trait;
use aw_common::QueueMessage;
use tracing::{debug, info};

use crate::error::ProcessingError;

/// Business logic applied to each received message.
///
/// The consumer loop times every call and deletes the message afterwards,
/// whether or not processing succeeded.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &QueueMessage) -> Result<(), ProcessingError>;

    /// Processing budget for this message. `None` uses the configured default.
    fn expected_duration(&self, _message: &QueueMessage) -> Option<Duration> {
        None
    }
}

/// Placeholder processor: logs the message and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &QueueMessage) -> Result<(), ProcessingError> {
        info!(
            message_id = %message.message_id,
            receive_count = ?message.receive_count(),
            "Received message"
        );
        debug!(message_id = %message.message_id, body = %message.body, "Message body");
        Ok(())
    }
}
