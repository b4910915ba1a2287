//! In-memory store for tests and embedding.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use mkr_core::{BoxFuture, InstrumentId};
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::{sanitize, AgentStatusFlag, ConfigStore, StoredAgent};

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    rows: Mutex<Vec<StoredAgent>>,
    fail_next: AtomicU32,
    loads: AtomicU64,
}

impl MemoryConfigStore {
    pub fn new(rows: Vec<StoredAgent>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn set_agents(&self, rows: Vec<StoredAgent>) {
        *self.rows.lock() = rows;
    }

    /// Insert or replace the row for the row's instrument.
    pub fn upsert(&self, row: StoredAgent) {
        let mut rows = self.rows.lock();
        match rows
            .iter_mut()
            .find(|r| r.config.instrument == row.config.instrument)
        {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
    }

    pub fn set_status(&self, instrument: &InstrumentId, status: AgentStatusFlag) -> bool {
        let mut rows = self.rows.lock();
        match rows.iter_mut().find(|r| &r.config.instrument == instrument) {
            Some(row) => {
                row.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, instrument: &InstrumentId) -> bool {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| &r.config.instrument != instrument);
        rows.len() != before
    }

    /// Make the next `n` loads fail.
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of load attempts, failed ones included.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    fn load(&self) -> StoreResult<Vec<StoredAgent>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(sanitize(self.rows.lock().clone(), "memory"))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load_all_agent_configs(&self) -> BoxFuture<'_, StoreResult<Vec<StoredAgent>>> {
        let result = self.load();
        Box::pin(async move { result })
    }
}
