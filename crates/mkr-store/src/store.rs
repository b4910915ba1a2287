//! Config store capability.

use std::collections::HashSet;
use std::sync::Arc;

use mkr_core::{AgentConfig, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreResult;

/// Operator-controlled lifecycle flag stored next to each agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatusFlag {
    #[default]
    Active,
    Paused,
    /// Soft-deleted row. Never returned by a store.
    Deleted,
}

impl std::fmt::Display for AgentStatusFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One agent row: quoting parameters plus lifecycle flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAgent {
    #[serde(flatten)]
    pub config: AgentConfig,
    #[serde(default)]
    pub status: AgentStatusFlag,
}

impl StoredAgent {
    pub fn active(config: AgentConfig) -> Self {
        Self {
            config,
            status: AgentStatusFlag::Active,
        }
    }

    pub fn paused(config: AgentConfig) -> Self {
        Self {
            config,
            status: AgentStatusFlag::Paused,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == AgentStatusFlag::Paused
    }
}

/// Source of agent configurations.
pub trait ConfigStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// All active and paused agents. Deleted rows are excluded.
    fn load_all_agent_configs(&self) -> BoxFuture<'_, StoreResult<Vec<StoredAgent>>>;
}

/// Arc wrapper for store trait objects.
pub type DynConfigStore = Arc<dyn ConfigStore>;

/// Drop deleted and invalid rows, keep the first row per instrument.
pub(crate) fn sanitize(rows: Vec<StoredAgent>, source: &str) -> Vec<StoredAgent> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| row.status != AgentStatusFlag::Deleted)
        .filter(|row| match row.config.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(source, error = %e, "Skipping invalid agent config");
                false
            }
        })
        .filter(|row| {
            let fresh = seen.insert(row.config.instrument.clone());
            if !fresh {
                warn!(
                    source,
                    instrument = %row.config.instrument,
                    "Duplicate agent config, keeping the first"
                );
            }
            fresh
        })
        .collect()
}
