//! Quote decision and order reconciliation.
//!
//! Both halves are pure functions of a `MarketSnapshot`:
//! - `compute_quotes`: desired bid/ask (price and size, or a hold reason)
//! - `reconcile_pair`: one place/cancel/replace/no-op action per side
//!
//! # Architecture
//!
//! ```text
//! MarketSnapshot + AgentConfig
//!      ↓
//! compute_quotes()  → QuotePair { bid, ask }
//!      ↓
//! reconcile_pair()  → ActionPair { bid, ask }
//!      ↓
//! TraderAgent submits via ExchangeGateway
//! ```

pub mod quote_engine;
pub mod reconcile;

pub use quote_engine::{compute_quotes, DesiredQuote, HoldReason, QuoteMetrics, QuotePair};
pub use reconcile::{reconcile, reconcile_pair, ActionPair, ReconcileAction};
