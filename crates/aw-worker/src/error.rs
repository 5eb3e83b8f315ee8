use aw_queue::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Fatal queue error: {0}")]
    Fatal(#[source] QueueError),

    #[error("Worker already terminated on a fatal error; restart the process")]
    AlreadyFailed,
}

/// Failure reported by a `MessageProcessor`. The loop logs it and still
/// deletes the message.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Processing failed: {0}")]
    Failed(String),
}
