//! Agent error types.

use mkr_core::CoreError;
use mkr_gateway::GatewayError;
use mkr_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid agent config: {0}")]
    Config(#[from] CoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Journal error: {0}")]
    Journal(#[from] PersistenceError),
}

pub type AgentResult<T> = Result<T, AgentError>;
