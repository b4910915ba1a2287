//! Core domain types for the market-making agents.
//!
//! This crate provides fundamental types used throughout the workspace:
//! - `Price`, `Size`: exact decimal types
//! - `OrderSide`, `OrderId`, `InstrumentId`: identifiers
//! - `MarketSnapshot`: the per-step view of book, own orders and inventory
//! - `AgentConfig`: per-agent quoting parameters

pub mod config;
pub mod decimal;
pub mod error;
pub mod future;
pub mod instrument;
pub mod order;
pub mod snapshot;

pub use config::AgentConfig;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use future::BoxFuture;
pub use instrument::InstrumentId;
pub use order::{OrderId, OrderSide};
pub use snapshot::{BookLevel, MarketSnapshot, OwnOrder};
