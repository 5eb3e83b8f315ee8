//! Worker - single-message consumer loop
//!
//! Each iteration:
//! 1. Stamps the heartbeat
//! 2. Long-polls for at most one message (transient failures retried with backoff)
//! 3. Marks the worker ready after the first receive that does not fail
//! 4. Processes the message inside a timing bracket, then deletes it
//!
//! Fatal queue errors end the loop with status ERROR. Everything else is
//! logged, followed by a short pause, and the loop carries on. `stop()` is
//! cooperative: it is observed at the top of the next iteration, so an
//! in-flight long poll finishes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aw_common::{clock::now_epoch_secs, QueueMessage, WorkerStatus};
use aw_config::WorkerConfig;
use aw_queue::{retry_on_transient, ErrorClass, QueueConsumer, QueueError, RetryConfig};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::processor::MessageProcessor;
use crate::state::HealthState;
use crate::Result;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Long-poll wait per receive, 0-20 seconds
    pub wait_time_seconds: u32,
    /// Budget used when the processor gives no estimate
    pub default_task_duration: Duration,
    /// Pause after a non-fatal iteration failure
    pub error_pause: Duration,
    pub retry: RetryConfig,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            wait_time_seconds: 20,
            default_task_duration: Duration::from_secs(300),
            error_pause: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            wait_time_seconds: config.sqs_wait_time_seconds,
            default_task_duration: config.default_task_duration(),
            error_pause: config.error_pause(),
            retry: RetryConfig::new(
                config.retry.max_attempts,
                config.retry.base_delay(),
                config.retry.max_delay(),
            ),
        }
    }
}

/// Cooperative cancellation flag. Cheap to clone; safe to trigger from a
/// signal task or another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stop requested, worker will exit after the current iteration");
        }
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early if stop is requested.
    async fn sleep(&self, duration: Duration) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_stopped() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = notified => {}
        }
    }
}

/// Clears the task timing fields and stamps the heartbeat when dropped, so
/// the bracket closes on success, error, and unwinding alike.
struct TaskTimer<'a> {
    state: &'a HealthState,
}

impl<'a> TaskTimer<'a> {
    fn start(state: &'a HealthState, expected: Duration) -> Self {
        state.begin_task(now_epoch_secs(), expected.as_secs_f64());
        Self { state }
    }
}

impl Drop for TaskTimer<'_> {
    fn drop(&mut self) {
        self.state.end_task();
        self.state.heartbeat(now_epoch_secs());
    }
}

/// Queue call an iteration failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueOp {
    Receive,
    Delete,
}

impl QueueOp {
    fn as_str(&self) -> &'static str {
        match self {
            QueueOp::Receive => "receive",
            QueueOp::Delete => "delete",
        }
    }
}

#[derive(Debug)]
struct IterationError {
    op: QueueOp,
    source: QueueError,
}

/// Moves the status off RUNNING when `run()` returns, unwinds, or is dropped.
/// ERROR set by a fatal failure is left in place.
struct RunGuard<'a> {
    state: &'a HealthState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.state.status() == WorkerStatus::Running {
            self.state.set_status(WorkerStatus::Stopped);
        }
    }
}

pub struct Worker {
    consumer: Arc<dyn QueueConsumer>,
    processor: Arc<dyn MessageProcessor>,
    state: Arc<HealthState>,
    settings: WorkerSettings,
    stop: StopHandle,
}

impl Worker {
    pub fn new(
        consumer: Arc<dyn QueueConsumer>,
        processor: Arc<dyn MessageProcessor>,
        state: Arc<HealthState>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            consumer,
            processor,
            state,
            settings,
            stop: StopHandle::new(),
        }
    }

    pub fn state(&self) -> &Arc<HealthState> {
        &self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run until stopped or a fatal queue error occurs.
    ///
    /// Returns `Err(WorkerError::Fatal)` when the loop ended in the error
    /// state. A worker that has failed cannot be run again.
    pub async fn run(&self) -> Result<()> {
        if self.state.status() == WorkerStatus::Error {
            return Err(WorkerError::AlreadyFailed);
        }

        info!(
            queue = %self.consumer.identifier(),
            wait_time_seconds = self.settings.wait_time_seconds,
            "Worker started, polling for messages"
        );

        self.state.set_status(WorkerStatus::Running);
        self.state.heartbeat(now_epoch_secs());

        let _guard = RunGuard { state: &self.state };
        let mut fatal = None;

        while !self.stop.is_stopped() {
            self.state.heartbeat(now_epoch_secs());

            let Err(IterationError { op, source: err }) = self.run_iteration().await else {
                continue;
            };

            let class = err.classify();
            metrics::counter!("aw_queue_errors_total", "class" => class.as_str(), "op" => op.as_str())
                .increment(1);

            match (class, op) {
                (ErrorClass::Fatal, _) => {
                    error!(op = op.as_str(), error = %err, "Fatal queue error, cannot continue");
                    self.state.set_status(WorkerStatus::Error);
                    fatal = Some(err);
                    break;
                }
                (ErrorClass::Transient, QueueOp::Receive) => {
                    warn!(error = %err, "Receive failed after retries, continuing");
                }
                (ErrorClass::Transient, QueueOp::Delete) => {
                    warn!(error = %err, "Delete failed, message will be redelivered");
                }
                (ErrorClass::Unknown, _) => {
                    error!(op = op.as_str(), error = %err, "Unexpected error in worker loop, continuing");
                }
            }
            self.stop.sleep(self.settings.error_pause).await;
        }

        match fatal {
            Some(err) => {
                info!("Worker stopped on fatal error");
                Err(WorkerError::Fatal(err))
            }
            None => {
                info!("Worker stopped");
                Ok(())
            }
        }
    }

    async fn run_iteration(&self) -> std::result::Result<(), IterationError> {
        let consumer: &dyn QueueConsumer = self.consumer.as_ref();
        let wait_time = self.settings.wait_time_seconds;

        let received = retry_on_transient(&self.settings.retry, QueueError::classify, move |_| {
            consumer.receive_one(wait_time)
        })
        .await
        .map_err(|source| IterationError { op: QueueOp::Receive, source })?;

        if self.state.mark_ready() {
            info!(queue = %consumer.identifier(), "First successful poll, worker is ready");
        }

        let Some(message) = received else {
            debug!(wait_time_seconds = wait_time, "No messages received");
            metrics::counter!("aw_empty_polls_total").increment(1);
            return Ok(());
        };

        metrics::counter!("aw_messages_received_total").increment(1);
        self.handle_message(message)
            .await
            .map_err(|source| IterationError { op: QueueOp::Delete, source })
    }

    async fn handle_message(&self, message: QueueMessage) -> aw_queue::Result<()> {
        let expected = self
            .processor
            .expected_duration(&message)
            .filter(|d| !d.is_zero())
            .unwrap_or(self.settings.default_task_duration);

        {
            let _timer = TaskTimer::start(&self.state, expected);
            if let Err(e) = self.processor.process(&message).await {
                metrics::counter!("aw_message_processing_failures_total").increment(1);
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Message processing failed, deleting anyway"
                );
            }
        }

        self.delete_message(&message).await
    }

    async fn delete_message(&self, message: &QueueMessage) -> aw_queue::Result<()> {
        match self.consumer.delete(&message.receipt_handle).await {
            Ok(()) => {
                metrics::counter!("aw_messages_deleted_total").increment(1);
                info!(message_id = %message.message_id, "Deleted message");
                Ok(())
            }
            Err(QueueError::ReceiptHandleInvalid(reason)) => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "Receipt handle expired, message may have already been deleted"
                );
                Ok(())
            }
            Err(e) => {
                // Left on the queue; it reappears after the visibility timeout
                error!(message_id = %message.message_id, error = %e, "Failed to delete message");
                Err(e)
            }
        }
    }
}
