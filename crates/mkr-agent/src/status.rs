//! Read-only agent status.

use chrono::{DateTime, Utc};
use mkr_core::{InstrumentId, OwnOrder, Price, Size};
use mkr_quote::DesiredQuote;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::state::AgentState;
use crate::stats::TradeStats;

/// Cumulative statistics as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsView {
    pub total_trades: u64,
    pub total_bought: Decimal,
    pub total_sold: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
}

impl From<&TradeStats> for StatsView {
    fn from(stats: &TradeStats) -> Self {
        Self {
            total_trades: stats.total_trades,
            total_bought: stats.total_bought,
            total_sold: stats.total_sold,
            avg_cost: stats.avg_cost,
            realized_pnl: stats.realized_pnl,
        }
    }
}

/// Agent view computed from a fresh snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub instrument: InstrumentId,
    pub name: String,
    pub state: AgentState,
    pub paused: bool,
    pub inventory: Size,
    pub best_bid: Price,
    pub best_ask: Price,
    pub mid: Price,
    pub spread: Price,
    pub effective_spread: Price,
    pub balance: Size,
    /// `|inventory * mid|`.
    pub exposure: Decimal,
    pub bid_plan: DesiredQuote,
    pub ask_plan: DesiredQuote,
    pub open_orders: Vec<OwnOrder>,
    pub stats: StatsView,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl AgentStatus {
    /// One-line summary of the resting orders, e.g. `buy 50@0.46, sell 20@0.49`.
    pub fn orders_summary(&self) -> String {
        if self.open_orders.is_empty() {
            return "none".to_string();
        }
        self.open_orders
            .iter()
            .map(|o| format!("{} {}@{}", o.side, o.size, o.price))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
