//! Cross-agent risk supervision.
//!
//! Agents report exposure and P&L through their status; the
//! [`RiskSupervisor`] folds those into a single [`RiskState`] and checks two
//! global caps:
//! - total exposure (`sum |inventory * mid|`) at or below `max_total_exposure`
//! - total P&L at or above `max_total_pnl_loss`
//!
//! A breach trips the [`HaltLatch`]. The latch stays tripped until an
//! operator resets it.

pub mod error;
pub mod latch;
pub mod supervisor;

pub use error::{RiskError, RiskResult};
pub use latch::{HaltLatch, HaltReason};
pub use supervisor::{AgentExposure, RiskLimits, RiskState, RiskSupervisor, RiskVerdict};
