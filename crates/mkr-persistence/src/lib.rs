//! Fill journal.
//!
//! Inferred fills are appended to daily JSON Lines files
//! (`fills_YYYY-MM-DD.jsonl`) for post-trade analysis.

pub mod error;
pub mod journal;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::{FillJournal, FillRecord, JournalConfig};
