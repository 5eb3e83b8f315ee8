//! Queue abstraction for the assessment worker
//!
//! - `QueueConsumer`: receive-one / delete-one contract over a managed queue
//! - `QueueError` + `ErrorClass`: failure taxonomy that decides whether the
//!   consumer loop retries, continues, or stops
//! - `retry`: backoff combinator applied to transient failures only
//! - `sqs`: Amazon SQS implementation (feature `sqs`)

use async_trait::async_trait;
use aw_common::QueueMessage;
use thiserror::Error;

pub mod retry;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use retry::{retry_on_transient, RetryConfig};

/// How the consumer loop should react to a queue failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Throttling, temporary unavailability, network trouble. Retry with backoff.
    Transient,
    /// The queue is gone or the credentials are bad. Never self-heals.
    Fatal,
    /// Anything unanticipated. Logged and the loop carries on.
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Request signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal service error: {0}")]
    Internal(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Receipt handle is invalid: {0}")]
    ReceiptHandleInvalid(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Queue service error {code}: {message}")]
    Service { code: String, message: String },
}

impl QueueError {
    /// Map a provider error code to a typed error.
    ///
    /// Codes follow the SQS query and JSON protocols; both spellings of the
    /// missing-queue code are accepted.
    pub fn from_service_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
                QueueError::QueueNotFound(message)
            }
            "AccessDenied" | "AccessDeniedException" => QueueError::AccessDenied(message),
            "InvalidAccessKeyId" | "InvalidClientTokenId" | "UnrecognizedClientException"
            | "InvalidSecurity" | "ExpiredToken" => QueueError::InvalidCredentials(message),
            "SignatureDoesNotMatch" | "IncompleteSignature" => QueueError::SignatureMismatch(message),
            "Throttling" | "ThrottlingException" | "RequestThrottled" | "KmsThrottled" => {
                QueueError::Throttled(message)
            }
            "ServiceUnavailable" | "ServiceUnavailableException" => {
                QueueError::ServiceUnavailable(message)
            }
            "InternalError" | "InternalFailure" | "InternalServerError" => {
                QueueError::Internal(message)
            }
            "ReceiptHandleIsInvalid" | "AWS.SimpleQueueService.ReceiptHandleIsInvalid" => {
                QueueError::ReceiptHandleInvalid(message)
            }
            other => QueueError::Service {
                code: other.to_string(),
                message,
            },
        }
    }

    pub fn classify(&self) -> ErrorClass {
        match self {
            QueueError::QueueNotFound(_)
            | QueueError::AccessDenied(_)
            | QueueError::InvalidCredentials(_)
            | QueueError::SignatureMismatch(_) => ErrorClass::Fatal,

            QueueError::Throttled(_)
            | QueueError::ServiceUnavailable(_)
            | QueueError::Internal(_)
            | QueueError::Transport(_) => ErrorClass::Transient,

            QueueError::ReceiptHandleInvalid(_)
            | QueueError::InvalidMessage(_)
            | QueueError::Service { .. } => ErrorClass::Unknown,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.classify() == ErrorClass::Fatal
    }

    pub fn is_transient(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// One-message-at-a-time consumer over a managed queue
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Queue URL or other identifier, for logging
    fn identifier(&self) -> &str;

    /// Long-poll for at most one message, waiting up to `wait_time_seconds`
    /// server-side when the queue is empty.
    async fn receive_one(&self, wait_time_seconds: u32) -> Result<Option<QueueMessage>>;

    /// Remove one delivered message, keyed by its receipt handle.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}
