//! Health verdict from a HealthState snapshot
//!
//! A fixed heartbeat timeout alone would flag the worker during a long task,
//! because the heartbeat is only stamped between iterations. While a task is
//! in flight the timeout basis switches to the task's own expected duration
//! scaled by a buffer, so a stuck task is still caught.

use aw_common::WorkerStatus;
use aw_config::WorkerConfig;
use serde::Serialize;

use crate::state::HealthSnapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    /// Seconds between heartbeats before an idle worker counts as stalled
    pub heartbeat_timeout: f64,
    /// Multiplier on a task's expected duration
    pub task_timeout_buffer: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: 120.0,
            task_timeout_buffer: 1.5,
        }
    }
}

impl From<&WorkerConfig> for HealthConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout as f64,
            task_timeout_buffer: config.task_timeout_buffer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthDiagnostics {
    pub status: WorkerStatus,
    pub ready: bool,
    /// Rounded to 0.1 s; None when no heartbeat was ever stamped
    pub heartbeat_age_seconds: Option<f64>,
    pub is_long_task_running: bool,
    pub task_elapsed_seconds: Option<f64>,
    pub effective_timeout_seconds: f64,
    pub is_overtime: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthVerdict {
    pub healthy: bool,
    pub diagnostics: HealthDiagnostics,
}

impl HealthVerdict {
    /// Failed sub-conditions joined with "; ", empty when healthy.
    pub fn reason(&self) -> String {
        let d = &self.diagnostics;
        let mut reasons = Vec::new();

        if d.status != WorkerStatus::Running {
            reasons.push(format!("worker status is {} (expected RUNNING)", d.status));
        }

        if d.is_overtime {
            if d.is_long_task_running {
                reasons.push(format!(
                    "task overtime: running {:.1}s exceeds budget {:.1}s",
                    d.task_elapsed_seconds.unwrap_or_default(),
                    d.effective_timeout_seconds
                ));
            } else {
                match d.heartbeat_age_seconds {
                    Some(age) => reasons.push(format!(
                        "heartbeat overtime: last heartbeat {:.1}s ago exceeds timeout {:.1}s",
                        age, d.effective_timeout_seconds
                    )),
                    None => reasons.push("heartbeat overtime: no heartbeat recorded".to_string()),
                }
            }
        }

        reasons.join("; ")
    }
}

/// Compute the verdict for `snapshot` at time `now` (epoch seconds).
pub fn evaluate(snapshot: &HealthSnapshot, config: &HealthConfig, now: f64) -> HealthVerdict {
    let heartbeat_age = if snapshot.last_heartbeat > 0.0 {
        now - snapshot.last_heartbeat
    } else {
        f64::INFINITY
    };

    let is_long_task = snapshot.is_processing();

    let (effective_timeout, is_overtime, task_elapsed) = if is_long_task {
        let effective = snapshot.expected_task_duration * config.task_timeout_buffer;
        let elapsed = now - snapshot.task_start_time;
        (effective, elapsed > effective, Some(round_tenths(elapsed)))
    } else {
        let effective = config.heartbeat_timeout;
        (effective, heartbeat_age > effective, None)
    };

    let healthy = snapshot.status == WorkerStatus::Running && !is_overtime;

    HealthVerdict {
        healthy,
        diagnostics: HealthDiagnostics {
            status: snapshot.status,
            ready: snapshot.ready,
            heartbeat_age_seconds: heartbeat_age.is_finite().then(|| round_tenths(heartbeat_age)),
            is_long_task_running: is_long_task,
            task_elapsed_seconds: task_elapsed,
            effective_timeout_seconds: effective_timeout,
            is_overtime,
        },
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    fn running(last_heartbeat: f64) -> HealthSnapshot {
        HealthSnapshot {
            status: WorkerStatus::Running,
            last_heartbeat,
            ready: true,
            task_start_time: 0.0,
            expected_task_duration: 0.0,
        }
    }

    #[test]
    fn test_fresh_state_unhealthy() {
        let snap = HealthSnapshot {
            status: WorkerStatus::Stopped,
            last_heartbeat: 0.0,
            ready: false,
            task_start_time: 0.0,
            expected_task_duration: 0.0,
        };
        let verdict = evaluate(&snap, &HealthConfig::default(), NOW);

        assert!(!verdict.healthy);
        assert_eq!(verdict.diagnostics.heartbeat_age_seconds, None);
        assert!(verdict.diagnostics.is_overtime);
        assert!(verdict.reason().contains("status is STOPPED"));
    }

    #[test]
    fn test_recent_heartbeat_healthy() {
        let verdict = evaluate(&running(NOW - 5.0), &HealthConfig::default(), NOW);
        assert!(verdict.healthy);
        assert_eq!(verdict.diagnostics.heartbeat_age_seconds, Some(5.0));
        assert_eq!(verdict.diagnostics.effective_timeout_seconds, 120.0);
        assert!(verdict.reason().is_empty());
    }

    #[test]
    fn test_heartbeat_at_timeout_boundary_healthy() {
        let verdict = evaluate(&running(NOW - 120.0), &HealthConfig::default(), NOW);
        assert!(verdict.healthy);

        let verdict = evaluate(&running(NOW - 120.5), &HealthConfig::default(), NOW);
        assert!(!verdict.healthy);
        assert!(verdict.reason().contains("heartbeat overtime"));
    }

    #[test]
    fn test_long_task_under_budget_healthy() {
        // Heartbeat is stale, but the task's own budget governs
        let snap = HealthSnapshot {
            last_heartbeat: NOW - 400.0,
            task_start_time: NOW - 400.0,
            expected_task_duration: 300.0,
            ..running(0.0)
        };
        let verdict = evaluate(&snap, &HealthConfig::default(), NOW);

        assert!(verdict.healthy);
        assert!(verdict.diagnostics.is_long_task_running);
        assert_eq!(verdict.diagnostics.effective_timeout_seconds, 450.0);
        assert_eq!(verdict.diagnostics.task_elapsed_seconds, Some(400.0));
    }

    #[test]
    fn test_long_task_over_budget_unhealthy() {
        let snap = HealthSnapshot {
            last_heartbeat: NOW - 460.0,
            task_start_time: NOW - 460.0,
            expected_task_duration: 300.0,
            ..running(0.0)
        };
        let verdict = evaluate(&snap, &HealthConfig::default(), NOW);

        assert!(!verdict.healthy);
        assert!(verdict.diagnostics.is_overtime);
        assert!(verdict.reason().contains("task overtime"));
    }

    #[test]
    fn test_not_running_always_unhealthy() {
        for status in [WorkerStatus::Stopped, WorkerStatus::Error] {
            let snap = HealthSnapshot {
                status,
                ..running(NOW - 1.0)
            };
            let verdict = evaluate(&snap, &HealthConfig::default(), NOW);
            assert!(!verdict.healthy);
            assert!(!verdict.diagnostics.is_overtime);
            assert!(verdict.reason().contains("expected RUNNING"));
        }
    }

    #[test]
    fn test_half_written_task_falls_back_to_heartbeat() {
        // Reader saw the start time before the expected duration landed
        let snap = HealthSnapshot {
            task_start_time: NOW - 1.0,
            ..running(NOW - 1.0)
        };
        let verdict = evaluate(&snap, &HealthConfig::default(), NOW);
        assert!(verdict.healthy);
        assert!(!verdict.diagnostics.is_long_task_running);
    }

    #[test]
    fn test_combined_reasons() {
        let snap = HealthSnapshot {
            status: WorkerStatus::Error,
            ..running(NOW - 500.0)
        };
        let reason = evaluate(&snap, &HealthConfig::default(), NOW).reason();
        assert!(reason.contains("status is ERROR"));
        assert!(reason.contains("; heartbeat overtime"));
    }

    #[test]
    fn test_diagnostics_serialize_null_age() {
        let snap = HealthSnapshot {
            last_heartbeat: 0.0,
            ..running(0.0)
        };
        let verdict = evaluate(&snap, &HealthConfig::default(), NOW);
        let json = serde_json::to_value(&verdict.diagnostics).unwrap();
        assert!(json["heartbeat_age_seconds"].is_null());
        assert_eq!(json["status"], "RUNNING");
    }
}
