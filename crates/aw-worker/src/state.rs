//! Shared liveness record between the consumer loop and the health server.
//!
//! Every field is its own atomic. The consumer is the only writer; the health
//! side only reads, one field at a time. There is no multi-field lock, so a
//! reader can observe a task start without its expected duration for an
//! instant, which the evaluator tolerates.

use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU64, Ordering};

use aw_common::WorkerStatus;
use serde::Serialize;

/// f64 stored as its bit pattern so it fits an AtomicU64
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
pub struct HealthState {
    status: AtomicI8,
    /// Epoch seconds, 0 = never
    last_heartbeat: AtomicF64,
    /// Set after the first successful receive, never cleared
    ready: AtomicBool,
    /// Epoch seconds, 0 = idle
    task_start_time: AtomicF64,
    /// Seconds, 0 = idle
    expected_task_duration: AtomicF64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            status: AtomicI8::new(WorkerStatus::Stopped.code()),
            last_heartbeat: AtomicF64::new(0.0),
            ready: AtomicBool::new(false),
            task_start_time: AtomicF64::new(0.0),
            expected_task_duration: AtomicF64::new(0.0),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_code(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status.code(), Ordering::Release);
    }

    pub fn last_heartbeat(&self) -> f64 {
        self.last_heartbeat.load()
    }

    pub fn heartbeat(&self, now: f64) {
        self.last_heartbeat.store(now);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns true only for the call that flipped the flag.
    pub fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::AcqRel)
    }

    pub fn task_start_time(&self) -> f64 {
        self.task_start_time.load()
    }

    pub fn expected_task_duration(&self) -> f64 {
        self.expected_task_duration.load()
    }

    pub fn begin_task(&self, start: f64, expected_duration_secs: f64) {
        self.task_start_time.store(start);
        self.expected_task_duration.store(expected_duration_secs);
    }

    pub fn end_task(&self) {
        self.task_start_time.store(0.0);
        self.expected_task_duration.store(0.0);
    }

    /// One read per field; not a consistent multi-field view.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status(),
            last_heartbeat: self.last_heartbeat(),
            ready: self.is_ready(),
            task_start_time: self.task_start_time(),
            expected_task_duration: self.expected_task_duration(),
        }
    }
}

/// Plain copy of the shared fields handed to the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: WorkerStatus,
    pub last_heartbeat: f64,
    pub ready: bool,
    pub task_start_time: f64,
    pub expected_task_duration: f64,
}

impl HealthSnapshot {
    pub fn is_processing(&self) -> bool {
        self.task_start_time > 0.0 && self.expected_task_duration > 0.0
    }
}
