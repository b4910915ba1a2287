//! Store access with a deadline and last-known-good fallback.

use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::{DynConfigStore, StoredAgent};

/// Result of one refresh.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Store answered.
    Fresh(Vec<StoredAgent>),
    /// Store failed; serving the previous good set.
    LastKnownGood {
        agents: Vec<StoredAgent>,
        error: StoreError,
    },
    /// Store failed and nothing was ever loaded.
    Unavailable(StoreError),
}

impl SyncOutcome {
    /// Agents to apply, if any set is known.
    pub fn agents(&self) -> Option<&[StoredAgent]> {
        match self {
            Self::Fresh(agents) | Self::LastKnownGood { agents, .. } => Some(agents),
            Self::Unavailable(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            Self::Fresh(_) => None,
            Self::LastKnownGood { error, .. } | Self::Unavailable(error) => Some(error),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Wraps a [`ConfigStore`](crate::ConfigStore) so a failed load never loses
/// the configuration in force.
pub struct ConfigSync {
    store: DynConfigStore,
    timeout: Duration,
    last_good: RwLock<Option<Vec<StoredAgent>>>,
}

impl ConfigSync {
    pub fn new(store: DynConfigStore, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            last_good: RwLock::new(None),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn last_good(&self) -> Option<Vec<StoredAgent>> {
        self.last_good.read().clone()
    }

    pub async fn refresh(&self) -> SyncOutcome {
        let result =
            match tokio::time::timeout(self.timeout, self.store.load_all_agent_configs()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

        match result {
            Ok(agents) => {
                info!(store = self.store.name(), count = agents.len(), "Agent configs loaded");
                *self.last_good.write() = Some(agents.clone());
                SyncOutcome::Fresh(agents)
            }
            Err(error) => match self.last_good() {
                Some(agents) => {
                    warn!(
                        store = self.store.name(),
                        ?error,
                        count = agents.len(),
                        "Config store load failed, keeping last-known-good set"
                    );
                    SyncOutcome::LastKnownGood { agents, error }
                }
                None => {
                    warn!(
                        store = self.store.name(),
                        ?error,
                        "Config store load failed, no configuration loaded yet"
                    );
                    SyncOutcome::Unavailable(error)
                }
            },
        }
    }
}
