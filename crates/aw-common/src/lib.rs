use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod logging;

// ============================================================================
// Worker Status
// ============================================================================

/// Lifecycle phase of the consumer, stored as a small integer so it can live
/// in an atomic shared with the health server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    /// Terminated on a fatal queue error
    Error = -1,
    /// Not started, or exited cleanly
    Stopped = 0,
    /// Polling the queue
    Running = 1,
}

impl WorkerStatus {
    /// Convert from the code stored in the shared atomic.
    /// Unknown codes map to Error.
    pub fn from_code(code: i8) -> Self {
        match code {
            0 => Self::Stopped,
            1 => Self::Running,
            _ => Self::Error,
        }
    }

    pub fn code(&self) -> i8 {
        *self as i8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Queue Message
// ============================================================================

/// A single message received from the queue.
///
/// Lives for exactly one processing attempt. The receipt handle is the opaque
/// token the queue needs to delete this particular delivery; a redelivery of
/// the same message carries a different handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: String,
    /// System attributes (SentTimestamp, ApproximateReceiveCount, ...)
    pub attributes: Option<HashMap<String, String>>,
    /// User-supplied message attributes, string values only
    pub message_attributes: Option<HashMap<String, String>>,
    pub md5_of_body: Option<String>,
}

impl QueueMessage {
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            attributes: None,
            message_attributes: None,
            md5_of_body: None,
        }
    }

    /// Number of times the queue has handed this message out, if reported.
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .as_ref()?
            .get("ApproximateReceiveCount")?
            .parse()
            .ok()
    }
}

// ============================================================================
// Clock
// ============================================================================

pub mod clock {
    use std::sync::OnceLock;
    use std::time::Instant;

    use chrono::Utc;

    static ANCHOR: OnceLock<(Instant, f64)> = OnceLock::new();

    fn anchor() -> &'static (Instant, f64) {
        ANCHOR.get_or_init(|| (Instant::now(), Utc::now().timestamp_micros() as f64 / 1_000_000.0))
    }

    /// Fractional seconds since the Unix epoch, advanced by a monotonic clock.
    ///
    /// The wall clock is read once, on first use; later readings add the
    /// `Instant` elapsed since then, so NTP steps never move heartbeat ages
    /// forwards or backwards. Zero is reserved as the "never" marker in the
    /// shared health state, so callers can rely on this always being positive.
    pub fn now_epoch_secs() -> f64 {
        let (start, epoch) = anchor();
        epoch + start.elapsed().as_secs_f64()
    }

}
