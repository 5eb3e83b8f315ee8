//! Assessment Worker core
//!
//! - HealthState: lock-free liveness record shared with the health server
//! - Worker: the receive → process → delete loop that keeps HealthState current
//! - MessageProcessor: the business-logic seam, timed by the loop
//! - health: turns a HealthState snapshot into a healthy/unhealthy verdict

pub mod error;
pub mod state;
pub mod processor;
pub mod worker;
pub mod health;

pub use error::{WorkerError, ProcessingError};
pub use state::{HealthState, HealthSnapshot};
pub use processor::{MessageProcessor, LoggingProcessor};
pub use worker::{Worker, WorkerSettings, StopHandle};
pub use health::{evaluate, HealthConfig, HealthVerdict, HealthDiagnostics};

pub type Result<T> = std::result::Result<T, WorkerError>;
