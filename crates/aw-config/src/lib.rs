//! Assessment Worker Configuration
//!
//! Values are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional TOML file named by `WORKER_CONFIG_FILE`
//! 3. Process environment
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SERVICE_NAME` | `assessment-worker` | Name reported by the health endpoint |
//! | `REGION` / `AWS_REGION` | `eu-west-2` | Queue region |
//! | `SQS_ENDPOINT` | - | Endpoint override (LocalStack only) |
//! | `SQS_QUEUE_NAME` | `assessment-queue` | Queue to resolve at startup |
//! | `SQS_QUEUE_URL` | - | Skip name resolution and use this URL |
//! | `SQS_WAIT_TIME_SECONDS` | `20` | Long-poll wait, 0-20 |
//! | `HEALTH_PORT` | `8085` | Health server port |
//! | `HEARTBEAT_TIMEOUT` | `120` | Seconds between heartbeats before unhealthy |
//! | `TASK_TIMEOUT_BUFFER` | `1.5` | Multiplier applied to a task's expected duration |
//! | `DEFAULT_TASK_DURATION` | `300` | Expected processing time per message, seconds |
//! | `ERROR_PAUSE_SECONDS` | `5` | Pause after a non-fatal loop error |
//! | `RETRY_MAX_ATTEMPTS` | `3` | Receive attempts on transient errors |
//! | `RETRY_BASE_DELAY_MS` | `1000` | First backoff delay |
//! | `RETRY_MAX_DELAY_MS` | `10000` | Backoff cap |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Protocol maximum for a single long-poll receive.
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

pub const CONFIG_FILE_VAR: &str = "WORKER_CONFIG_FILE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Backoff settings for the receive call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub service_name: String,
    pub region: String,
    /// Only needed for LocalStack
    pub sqs_endpoint: Option<String>,
    pub sqs_queue_name: String,
    pub sqs_queue_url: Option<String>,
    pub sqs_wait_time_seconds: u32,
    pub health_port: u16,
    /// Max seconds between heartbeats while idle
    pub heartbeat_timeout: u64,
    /// Multiplier applied to the expected duration of an in-flight task
    pub task_timeout_buffer: f64,
    pub default_task_duration: u64,
    pub error_pause_seconds: u64,
    pub retry: RetrySettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            service_name: "assessment-worker".to_string(),
            region: "eu-west-2".to_string(),
            sqs_endpoint: None,
            sqs_queue_name: "assessment-queue".to_string(),
            sqs_queue_url: None,
            sqs_wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            health_port: 8085,
            heartbeat_timeout: 120,
            task_timeout_buffer: 1.5,
            default_task_duration: 300,
            error_pause_seconds: 5,
            retry: RetrySettings::default(),
        }
    }
}

impl WorkerConfig {
    /// Load from the process environment (and the file it points at).
    pub fn load() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        Self::from_vars(&vars)
    }

    /// Load from an explicit variable map. Keys must be upper-case.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = match vars.get(CONFIG_FILE_VAR).filter(|p| !p.is_empty()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Loaded worker config file");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(v) = vars.get("SERVICE_NAME") {
            self.service_name = v.clone();
        }
        if let Some(v) = vars.get("REGION").or_else(|| vars.get("AWS_REGION")) {
            self.region = v.clone();
        }
        if let Some(v) = vars.get("SQS_ENDPOINT") {
            self.sqs_endpoint = non_empty(v);
        }
        if let Some(v) = vars.get("SQS_QUEUE_NAME") {
            self.sqs_queue_name = v.clone();
        }
        if let Some(v) = vars.get("SQS_QUEUE_URL") {
            self.sqs_queue_url = non_empty(v);
        }

        set_parsed(vars, "SQS_WAIT_TIME_SECONDS", &mut self.sqs_wait_time_seconds)?;
        set_parsed(vars, "HEALTH_PORT", &mut self.health_port)?;
        set_parsed(vars, "HEARTBEAT_TIMEOUT", &mut self.heartbeat_timeout)?;
        set_parsed(vars, "TASK_TIMEOUT_BUFFER", &mut self.task_timeout_buffer)?;
        set_parsed(vars, "DEFAULT_TASK_DURATION", &mut self.default_task_duration)?;
        set_parsed(vars, "ERROR_PAUSE_SECONDS", &mut self.error_pause_seconds)?;
        set_parsed(vars, "RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts)?;
        set_parsed(vars, "RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        set_parsed(vars, "RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sqs_wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ConfigError::invalid(
                "SQS_WAIT_TIME_SECONDS",
                format!(
                    "Wait time must be between 0 and {} seconds, got {}",
                    MAX_WAIT_TIME_SECONDS, self.sqs_wait_time_seconds
                ),
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::invalid("SERVICE_NAME", "must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::invalid("REGION", "must not be empty"));
        }
        if self.sqs_queue_url.is_none() && self.sqs_queue_name.trim().is_empty() {
            return Err(ConfigError::invalid(
                "SQS_QUEUE_NAME",
                "either a queue name or a queue URL is required",
            ));
        }
        if self.health_port == 0 {
            return Err(ConfigError::invalid("HEALTH_PORT", "must not be 0"));
        }
        if self.heartbeat_timeout == 0 {
            return Err(ConfigError::invalid("HEARTBEAT_TIMEOUT", "must be positive"));
        }
        if !self.task_timeout_buffer.is_finite() || self.task_timeout_buffer < 1.0 {
            return Err(ConfigError::invalid(
                "TASK_TIMEOUT_BUFFER",
                format!("must be a finite multiplier >= 1.0, got {}", self.task_timeout_buffer),
            ));
        }
        if self.default_task_duration == 0 {
            return Err(ConfigError::invalid("DEFAULT_TASK_DURATION", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("RETRY_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "RETRY_MAX_DELAY_MS",
                "must not be smaller than RETRY_BASE_DELAY_MS",
            ));
        }
        Ok(())
    }

    /// Queue endpoint override for the SDK client
    pub fn endpoint_url(&self) -> Option<&str> {
        self.sqs_endpoint.as_deref()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout)
    }

    pub fn default_task_duration(&self) -> Duration {
        Duration::from_secs(self.default_task_duration)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_secs(self.error_pause_seconds)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn set_parsed<T>(vars: &HashMap<String, String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = vars.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{:?}: {}", raw, e)))?;
    }
    Ok(())
}
