//! Agent configuration store.
//!
//! The manager loads every agent's [`AgentConfig`](mkr_core::AgentConfig)
//! through a [`ConfigStore`] at startup and on a sync interval.
//! [`ConfigSync`] adds a deadline and keeps the last-known-good set when a
//! load fails.

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod rest;
pub mod store;
pub mod sync;

pub use backend::StoreBackend;
pub use error::{StoreError, StoreResult};
pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;
pub use rest::{RestConfigStore, RestStoreConfig};
pub use store::{AgentStatusFlag, ConfigStore, DynConfigStore, StoredAgent};
pub use sync::{ConfigSync, SyncOutcome};
