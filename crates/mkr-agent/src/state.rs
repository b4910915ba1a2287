//! Agent lifecycle states.

use serde::{Deserialize, Serialize};

/// `Idle -> Fetching -> Deciding -> Submitting -> Idle`, with `Paused`
/// reachable from anywhere and `Stopped` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Fetching,
    Deciding,
    Submitting,
    Paused,
    Stopped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Deciding => "deciding",
            Self::Submitting => "submitting",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// A step is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Fetching | Self::Deciding | Self::Submitting)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
