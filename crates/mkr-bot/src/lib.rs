//! Passive market-making bot.
//!
//! The [`Manager`] owns one [`TraderAgent`](mkr_agent::TraderAgent) per
//! configured instrument and drives four schedules:
//! - steps: every agent steps concurrently, never two steps per agent at once
//! - risk: agent statuses folded into the [`RiskSupervisor`](mkr_risk::RiskSupervisor)
//! - config sync: agents added, removed, replaced, paused from the config store
//! - status report: one log line per agent plus totals

pub mod app;
pub mod config;
pub mod error;
pub mod manager;

pub use app::Application;
pub use config::{AppConfig, ManagerConfig, TelemetryConfig};
pub use error::{AppError, AppResult};
pub use manager::{Manager, ManagerCommand, ManagerHandle, SyncSummary};
