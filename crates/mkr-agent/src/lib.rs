//! Trader agent for one instrument.
//!
//! # Step
//!
//! ```text
//! Manager tick → TraderAgent::step()
//!                 ├─ ExchangeGateway::fetch_snapshot   (Fetching)
//!                 ├─ TradeStats::observe               (fill inference)
//!                 ├─ compute_quotes + reconcile_pair   (Deciding)
//!                 └─ cancel / place per side           (Submitting)
//! ```
//!
//! A step never returns an error. Fetch failures skip the step; submit
//! failures are logged and left for the next step to reconcile.

pub mod agent;
pub mod error;
pub mod state;
pub mod stats;
pub mod status;

pub use agent::{AgentOptions, SharedJournal, StepOutcome, StepReport, SubmitOutcome, TraderAgent};
pub use error::{AgentError, AgentResult};
pub use state::AgentState;
pub use stats::{InferredFill, TradeStats};
pub use status::{AgentStatus, StatsView};
