//! Per-step market snapshot.
//!
//! A [`MarketSnapshot`] is the complete input to one quoting decision:
//! top two levels of each side, the exchange minimum order size, the
//! agent's inventory and its own resting orders. It is built once per
//! fetch and never mutated afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::{InstrumentId, OrderId, OrderSide, Price, Size};

/// One aggregated price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Size,
}

impl BookLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// The agent's own resting order on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnOrder {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub price: Price,
    /// Remaining (unfilled) size.
    pub size: Size,
    /// Whether the order rests at the best price of its side.
    ///
    /// Derived by [`MarketSnapshot::from_book`]; any value passed in is
    /// overwritten.
    pub is_best: bool,
    pub placed_at: DateTime<Utc>,
}

impl OwnOrder {
    /// Age of the order at `now` (zero if `placed_at` is in the future).
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.placed_at).to_std().unwrap_or_default()
    }

    /// Whether the order has rested longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        self.age(now) > timeout
    }
}

/// Immutable view of one instrument at the instant it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: InstrumentId,
    pub best_bid: Price,
    pub best_bid_size: Size,
    pub best_ask: Price,
    pub best_ask_size: Size,
    pub second_best_bid: Option<Price>,
    pub second_best_ask: Option<Price>,
    pub min_order_size: Size,
    /// Price increment the venue accepts. Zero when it does not quantize.
    #[serde(default)]
    pub price_tick: Price,
    /// Size increment the venue accepts. Zero when it does not quantize.
    #[serde(default)]
    pub size_lot: Size,
    /// Signed inventory, authoritative from the exchange.
    pub inventory: Size,
    pub own_bid: Option<OwnOrder>,
    pub own_ask: Option<OwnOrder>,
    /// Own orders beyond the one tracked per side. Only ever cancelled.
    pub stray_orders: Vec<OwnOrder>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a snapshot from raw book levels.
    ///
    /// `bids` and `asks` may arrive in any order and may repeat a price;
    /// levels are aggregated by price and zero-size levels are dropped.
    /// They must already include the agent's own resting size. When more
    /// than one own order rests on a side, the best priced one is tracked
    /// and the rest are reported in `stray_orders`.
    ///
    /// Fails with [`CoreError::IncompleteBook`] when either side is empty,
    /// a best price is not positive, or the book is crossed.
    pub fn from_book(
        instrument: InstrumentId,
        bids: &[BookLevel],
        asks: &[BookLevel],
        min_order_size: Size,
        inventory: Size,
        own_orders: Vec<OwnOrder>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self> {
        if min_order_size.inner().is_sign_negative() {
            return Err(CoreError::IncompleteBook(format!(
                "{instrument}: negative min_order_size {min_order_size}"
            )));
        }

        let bid_levels = aggregate(bids);
        let ask_levels = aggregate(asks);

        // Bids: highest first. Asks: lowest first.
        let mut bid_iter = bid_levels.iter().rev();
        let mut ask_iter = ask_levels.iter();

        let (best_bid, best_bid_size) = bid_iter
            .next()
            .map(|(p, s)| (*p, *s))
            .ok_or_else(|| CoreError::IncompleteBook(format!("{instrument}: no bids")))?;
        let (best_ask, best_ask_size) = ask_iter
            .next()
            .map(|(p, s)| (*p, *s))
            .ok_or_else(|| CoreError::IncompleteBook(format!("{instrument}: no asks")))?;

        if !best_bid.is_positive() || !best_ask.is_positive() {
            return Err(CoreError::IncompleteBook(format!(
                "{instrument}: non-positive top of book {best_bid}/{best_ask}"
            )));
        }
        if best_bid >= best_ask {
            return Err(CoreError::IncompleteBook(format!(
                "{instrument}: crossed book {best_bid} >= {best_ask}"
            )));
        }

        let second_best_bid = bid_iter.next().map(|(p, _)| *p);
        let second_best_ask = ask_iter.next().map(|(p, _)| *p);

        let (own_bid, own_ask, stray_orders) = split_own_orders(own_orders, best_bid, best_ask);

        Ok(Self {
            instrument,
            best_bid,
            best_bid_size,
            best_ask,
            best_ask_size,
            second_best_bid,
            second_best_ask,
            min_order_size,
            price_tick: Price::ZERO,
            size_lot: Size::ZERO,
            inventory,
            own_bid,
            own_ask,
            stray_orders,
            fetched_at,
        })
    }

    /// Record the venue's tick and lot so quotes are computed at the
    /// precision orders actually rest at.
    pub fn with_precision(mut self, price_tick: Price, size_lot: Size) -> Self {
        self.price_tick = price_tick;
        self.size_lot = size_lot;
        self
    }

    /// Spread: `best_ask - best_bid`.
    pub fn spread(&self) -> Price {
        self.best_ask - self.best_bid
    }

    pub fn mid_price(&self) -> Price {
        Price::midpoint(self.best_bid, self.best_ask)
    }

    pub fn best(&self, side: OrderSide) -> Price {
        match side {
            OrderSide::Buy => self.best_bid,
            OrderSide::Sell => self.best_ask,
        }
    }

    pub fn best_size(&self, side: OrderSide) -> Size {
        match side {
            OrderSide::Buy => self.best_bid_size,
            OrderSide::Sell => self.best_ask_size,
        }
    }

    pub fn second_best(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Buy => self.second_best_bid,
            OrderSide::Sell => self.second_best_ask,
        }
    }

    pub fn own(&self, side: OrderSide) -> Option<&OwnOrder> {
        match side {
            OrderSide::Buy => self.own_bid.as_ref(),
            OrderSide::Sell => self.own_ask.as_ref(),
        }
    }

    /// All own resting orders, tracked and stray.
    pub fn open_orders(&self) -> impl Iterator<Item = &OwnOrder> {
        self.own_bid
            .iter()
            .chain(self.own_ask.iter())
            .chain(self.stray_orders.iter())
    }

    /// Exposure: `|inventory × mid|`.
    pub fn exposure(&self) -> rust_decimal::Decimal {
        self.inventory.notional(self.mid_price()).abs()
    }
}

/// Sum sizes per price, dropping empty levels.
fn aggregate(levels: &[BookLevel]) -> BTreeMap<Price, Size> {
    let mut book = BTreeMap::new();
    for level in levels.iter().filter(|l| l.size.is_positive()) {
        let entry = book.entry(level.price).or_insert(Size::ZERO);
        *entry = *entry + level.size;
    }
    book
}

fn split_own_orders(
    own_orders: Vec<OwnOrder>,
    best_bid: Price,
    best_ask: Price,
) -> (Option<OwnOrder>, Option<OwnOrder>, Vec<OwnOrder>) {
    let mut own_bid: Option<OwnOrder> = None;
    let mut own_ask: Option<OwnOrder> = None;
    let mut strays = Vec::new();

    for mut order in own_orders {
        let (slot, better) = match order.side {
            OrderSide::Buy => {
                order.is_best = order.price >= best_bid;
                let better = own_bid.as_ref().map_or(true, |cur| order.price > cur.price);
                (&mut own_bid, better)
            }
            OrderSide::Sell => {
                order.is_best = order.price <= best_ask;
                let better = own_ask.as_ref().map_or(true, |cur| order.price < cur.price);
                (&mut own_ask, better)
            }
        };
        if better {
            if let Some(previous) = slot.replace(order) {
                strays.push(previous);
            }
        } else {
            strays.push(order);
        }
    }

    (own_bid, own_ask, strays)
}
