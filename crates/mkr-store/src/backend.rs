//! Config store selection from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreResult;
use crate::file::FileConfigStore;
use crate::memory::MemoryConfigStore;
use crate::rest::{RestConfigStore, RestStoreConfig};
use crate::store::{DynConfigStore, StoredAgent};

/// Where agent configurations come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// TOML file with `[[agents]]` tables.
    File { path: PathBuf },
    /// PostgREST table.
    Rest(RestStoreConfig),
    /// Agents listed inline in the application config.
    Memory {
        #[serde(default)]
        agents: Vec<StoredAgent>,
    },
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("config/agents.toml"),
        }
    }
}

impl StoreBackend {
    pub fn build(&self) -> StoreResult<DynConfigStore> {
        let store: DynConfigStore = match self {
            Self::File { path } => Arc::new(FileConfigStore::new(path.clone())),
            Self::Rest(config) => Arc::new(RestConfigStore::new(config)?),
            Self::Memory { agents } => Arc::new(MemoryConfigStore::new(agents.clone())),
        };
        info!(store = store.name(), "Config store ready");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_from_toml() {
        let backend: StoreBackend =
            toml::from_str("kind = \"file\"\npath = \"agents.toml\"").unwrap();
        assert_eq!(backend.build().unwrap().name(), "file");
    }

    #[tokio::test]
    async fn test_memory_backend_with_inline_agents() {
        let backend: StoreBackend = toml::from_str(
            r#"
kind = "memory"

[[agents]]
instrument = "rain"
max_inventory = "100"
spread_threshold = "0.02"
price_improvement = "0.01"
"#,
        )
        .unwrap();

        let store = backend.build().unwrap();
        let agents = store.load_all_agent_configs().await.unwrap();
        assert_eq!(agents.len(), 1);
    }

    #[test]
    fn test_rest_backend_without_key_fails_to_build() {
        let backend: StoreBackend =
            toml::from_str("kind = \"rest\"\nurl = \"http://localhost\"").unwrap();
        assert!(backend.build().is_err());
    }
}
