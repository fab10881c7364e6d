/// Configuration management for the Mechaflow engine
///
/// Handles server configuration, file storage locations, and scheduler timing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// File storage configuration
    pub storage: StorageConfig,
    /// Scheduler daemon configuration
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// File storage configuration
///
/// Everything lives under one data directory:
/// - {data_dir}/workflows/{id}.json
/// - {data_dir}/schedules/{id}.json
/// - {data_dir}/schedule_executions/{schedule_id}_{YYYYMMDD}.json
/// - {data_dir}/debug/debug_export_{session_id}_{unix}.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all persisted documents (default: "data")
    pub data_dir: String,
}

impl StorageConfig {
    pub fn workflows_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("workflows")
    }

    pub fn schedules_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("schedules")
    }

    pub fn history_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("schedule_executions")
    }

    pub fn debug_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("debug")
    }
}

/// Scheduler daemon timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the daemon is started with the server
    pub enabled: bool,
    /// Seconds between schedule evaluations
    pub check_interval_secs: u64,
    /// Seconds between execution state polls while monitoring a triggered run
    pub monitor_poll_secs: u64,
    /// Seconds after which a monitored run is recorded as timed out
    pub execution_timeout_secs: u64,
    /// Seconds `stop()` waits for monitored runs to drain
    pub shutdown_grace_secs: u64,
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("MECHAFLOW_SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            check_interval_secs: std::env::var("MECHAFLOW_SCHEDULER_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            monitor_poll_secs: 10,
            execution_timeout_secs: 3600,
            shutdown_grace_secs: 300,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("MECHAFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("MECHAFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            storage: StorageConfig {
                data_dir: std::env::var("MECHAFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            scheduler: SchedulerConfig::default(),
        }
    }
}
