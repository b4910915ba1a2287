//! Per-agent trade statistics.
//!
//! The exchange reports inventory, not fills. A fill is inferred from the
//! change in inventory between two consecutive snapshots and priced at the
//! order the agent had resting on that side (mid when nothing rested).
//! Statistics are for reporting only and never feed quoting.

use mkr_core::{OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::Serialize;

/// A fill inferred from an inventory change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferredFill {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// Realized by this fill (zero when it adds to the position).
    pub realized_pnl: Decimal,
}

/// Running position, cost basis and P&L.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeStats {
    /// Last authoritative inventory seen; `None` before the first snapshot.
    last_inventory: Option<Size>,
    /// Price of the order resting on each side after the last step.
    resting_bid: Option<Price>,
    resting_ask: Option<Price>,
    pub position: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub total_trades: u64,
    pub total_bought: Decimal,
    pub total_sold: Decimal,
}

impl TradeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember what rests on each side once the step's submissions are done.
    pub fn set_resting(&mut self, bid: Option<Price>, ask: Option<Price>) {
        self.resting_bid = bid;
        self.resting_ask = ask;
    }

    /// Feed the inventory of a fresh snapshot.
    ///
    /// The first observation only sets the baseline; inventory held at that
    /// point is carried at `mid`.
    pub fn observe(&mut self, inventory: Size, mid: Price) -> Option<InferredFill> {
        let Some(previous) = self.last_inventory.replace(inventory) else {
            self.position = inventory.inner();
            self.avg_cost = if inventory.is_zero() {
                Decimal::ZERO
            } else {
                mid.inner()
            };
            return None;
        };

        let delta = inventory.inner() - previous.inner();
        if delta.is_zero() {
            return None;
        }

        let (side, resting) = if delta.is_sign_positive() {
            (OrderSide::Buy, self.resting_bid)
        } else {
            (OrderSide::Sell, self.resting_ask)
        };
        let price = resting.unwrap_or(mid);
        let size = Size::new(delta.abs());
        let realized_pnl = self.record_fill(side, price, size);

        Some(InferredFill {
            side,
            price,
            size,
            realized_pnl,
        })
    }

    /// Apply a fill to position and cost basis. Returns the realized P&L.
    fn record_fill(&mut self, side: OrderSide, price: Price, size: Size) -> Decimal {
        let fill_size = size.inner();
        let fill_price = price.inner();
        let signed = match side {
            OrderSide::Buy => fill_size,
            OrderSide::Sell => -fill_size,
        };

        let old = self.position;
        let new = old + signed;
        let mut realized = Decimal::ZERO;

        // Reducing: realize against the cost basis.
        if (old > Decimal::ZERO && signed < Decimal::ZERO)
            || (old < Decimal::ZERO && signed > Decimal::ZERO)
        {
            let reduced = signed.abs().min(old.abs());
            realized = if old > Decimal::ZERO {
                (fill_price - self.avg_cost) * reduced
            } else {
                (self.avg_cost - fill_price) * reduced
            };
            self.realized_pnl += realized;
        }

        if new.is_zero() {
            self.avg_cost = Decimal::ZERO;
        } else if !old.is_zero() && new.is_sign_positive() != old.is_sign_positive() {
            // Flipped through flat.
            self.avg_cost = fill_price;
        } else if old.is_zero() || new.is_sign_positive() == signed.is_sign_positive() {
            let total = new.abs();
            self.avg_cost = (old.abs() * self.avg_cost + fill_size * fill_price) / total;
        }

        self.position = new;
        self.total_trades += 1;
        match side {
            OrderSide::Buy => self.total_bought += fill_size,
            OrderSide::Sell => self.total_sold += fill_size,
        }
        realized
    }

    /// Mark-to-mid P&L of the open position.
    pub fn unrealized_pnl(&self, mid: Price) -> Decimal {
        if self.position.is_zero() {
            return Decimal::ZERO;
        }
        (mid.inner() - self.avg_cost) * self.position
    }

    pub fn total_pnl(&self, mid: Price) -> Decimal {
        self.realized_pnl + self.unrealized_pnl(mid)
    }
}
