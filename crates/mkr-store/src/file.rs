//! TOML file store.
//!
//! ```toml
//! [[agents]]
//! instrument = "will-it-rain"
//! max_inventory = "100"
//! spread_threshold = "0.02"
//! price_improvement = "0.01"
//! status = "paused"
//! ```
//!
//! The file is re-read on every load, so edits take effect at the next sync.

use std::path::{Path, PathBuf};

use mkr_core::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{sanitize, ConfigStore, StoredAgent};

#[derive(Debug, Default, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<StoredAgent>,
}

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StoreResult<Vec<StoredAgent>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file: AgentsFile = toml::from_str(&content).map_err(|e| {
            StoreError::Parse(format!("{}: {e}", self.path.display()))
        })?;

        let agents = sanitize(file.agents, "file");
        debug!(path = %self.path.display(), count = agents.len(), "Loaded agent configs");
        Ok(agents)
    }
}

impl ConfigStore for FileConfigStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load_all_agent_configs(&self) -> BoxFuture<'_, StoreResult<Vec<StoredAgent>>> {
        Box::pin(self.load())
    }
}
