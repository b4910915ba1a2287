//! Application configuration.

use std::time::Duration;

use mkr_gateway::GatewayBackend;
use mkr_persistence::JournalConfig;
use mkr_risk::RiskLimits;
use mkr_store::StoreBackend;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV: &str = "MKR_CONFIG";

/// Used when neither the flag nor the environment variable is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ============================================================================
// ManagerConfig
// ============================================================================

/// Schedules and deadlines of the manager loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Step cadence (ms). Default: 1,000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a cycle waits for agent steps (ms). A step still running
    /// after this keeps running and its agent skips the next cycles.
    /// Default: 15,000.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Deadline of each gateway call (ms). Default: 10,000.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Deadline of each config store load (ms). Default: 10,000.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Risk evaluation cadence (s). Default: 5.
    #[serde(default = "default_risk_check_interval_secs")]
    pub risk_check_interval_secs: u64,
    /// Config store sync cadence (s). Default: 30.
    #[serde(default = "default_config_sync_interval_secs")]
    pub config_sync_interval_secs: u64,
    /// Status report cadence (s). Default: 5.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Cancel every resting order on shutdown. Off unless set; resting
    /// orders are otherwise left with the exchange. Default: false.
    #[serde(default = "default_cancel_on_shutdown")]
    pub cancel_on_shutdown: bool,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_step_timeout_ms() -> u64 {
    15_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_risk_check_interval_secs() -> u64 {
    5
}

fn default_config_sync_interval_secs() -> u64 {
    30
}

fn default_status_interval_secs() -> u64 {
    5
}

fn default_cancel_on_shutdown() -> bool {
    false
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            risk_check_interval_secs: default_risk_check_interval_secs(),
            config_sync_interval_secs: default_config_sync_interval_secs(),
            status_interval_secs: default_status_interval_secs(),
            cancel_on_shutdown: default_cancel_on_shutdown(),
        }
    }
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn risk_check_interval(&self) -> Duration {
        Duration::from_secs(self.risk_check_interval_secs)
    }

    pub fn config_sync_interval(&self) -> Duration {
        Duration::from_secs(self.config_sync_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Every interval must be non-zero; `tokio::time::interval` panics on zero.
    pub fn validate(&self) -> AppResult<()> {
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("step_timeout_ms", self.step_timeout_ms),
            ("call_timeout_ms", self.call_timeout_ms),
            ("store_timeout_ms", self.store_timeout_ms),
            ("risk_check_interval_secs", self.risk_check_interval_secs),
            ("config_sync_interval_secs", self.config_sync_interval_secs),
            ("status_interval_secs", self.status_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(AppError::Config(format!("manager.{name} must be > 0")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TelemetryConfig
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Append the Prometheus text exposition to each status report
    /// (debug level).
    #[serde(default)]
    pub report_metrics: bool,
}

// ============================================================================
// AppConfig
// ============================================================================

/// Main application configuration.
///
/// ```toml
/// [manager]
/// poll_interval_ms = 1000
///
/// [risk]
/// max_total_exposure = "10000"
///
/// [gateway]
/// kind = "paper"
///
/// [store]
/// kind = "file"
/// path = "config/agents.toml"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub gateway: GatewayBackend,
    #[serde(default)]
    pub store: StoreBackend,
    /// Fill journal; disabled when absent.
    #[serde(default)]
    pub journal: Option<JournalConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the path (CLI flag > `MKR_CONFIG` > default) and load it.
    pub fn load(cli_path: Option<String>) -> AppResult<(String, Self)> {
        let path = resolve_path(cli_path, std::env::var(CONFIG_ENV).ok());
        let config = Self::from_file(&path)?;
        Ok((path, config))
    }

    pub fn validate(&self) -> AppResult<()> {
        self.manager.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}

fn resolve_path(cli_path: Option<String>, env_path: Option<String>) -> String {
    cli_path
        .or(env_path)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
