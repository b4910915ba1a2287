//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] mkr_gateway::GatewayError),

    #[error("Config store error: {0}")]
    Store(#[from] mkr_store::StoreError),

    #[error("Risk error: {0}")]
    Risk(#[from] mkr_risk::RiskError),

    #[error("Agent error: {0}")]
    Agent(#[from] mkr_agent::AgentError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mkr_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] mkr_persistence::PersistenceError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Trading halted: {0}")]
    Halted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

pub type AppResult<T> = Result<T, AppError>;
