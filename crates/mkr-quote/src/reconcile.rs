//! Order reconciliation.
//!
//! Diffs the desired quote for a side against the agent's own resting
//! order on that side and yields exactly one action. The exchange has no
//! in-place amendment, so any change to a resting order is a
//! cancel-and-replace.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mkr_core::{MarketSnapshot, OrderId, OrderSide, OwnOrder, Price, Size};
use serde::{Deserialize, Serialize};

use crate::quote_engine::{DesiredQuote, QuotePair};

/// Action for one side of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Resting state already matches.
    NoOp,
    /// Remove the resting order.
    Cancel { order_id: OrderId },
    /// Remove the resting order, then place a new one.
    CancelAndReplace {
        order_id: OrderId,
        price: Price,
        size: Size,
    },
    /// Place a new order; nothing rests on this side.
    Place { price: Price, size: Size },
}

impl ReconcileAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::Cancel { .. } => "cancel",
            Self::CancelAndReplace { .. } => "cancel_replace",
            Self::Place { .. } => "place",
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => write!(f, "noop"),
            Self::Cancel { order_id } => write!(f, "cancel {order_id}"),
            Self::CancelAndReplace {
                order_id,
                price,
                size,
            } => write!(f, "cancel {order_id} -> place {size}@{price}"),
            Self::Place { price, size } => write!(f, "place {size}@{price}"),
        }
    }
}

/// Actions for both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPair {
    pub bid: ReconcileAction,
    pub ask: ReconcileAction,
}

impl ActionPair {
    pub fn side(&self, side: OrderSide) -> &ReconcileAction {
        match side {
            OrderSide::Buy => &self.bid,
            OrderSide::Sell => &self.ask,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.bid.is_noop() && self.ask.is_noop()
    }
}

/// Reconcile one side.
///
/// An order older than `order_timeout` at `now` is always replaced (or
/// cancelled when the side should be empty), even if it is otherwise
/// correct.
pub fn reconcile(
    desired: &DesiredQuote,
    own: Option<&OwnOrder>,
    now: DateTime<Utc>,
    order_timeout: Duration,
) -> ReconcileAction {
    match (desired, own) {
        (DesiredQuote::None(_), None) => ReconcileAction::NoOp,
        (DesiredQuote::None(_), Some(order)) => ReconcileAction::Cancel {
            order_id: order.order_id.clone(),
        },
        (DesiredQuote::Quote { price, size }, None) => ReconcileAction::Place {
            price: *price,
            size: *size,
        },
        (DesiredQuote::Quote { price, size }, Some(order)) => {
            let replace = ReconcileAction::CancelAndReplace {
                order_id: order.order_id.clone(),
                price: *price,
                size: *size,
            };

            if order.is_stale(now, order_timeout) || !order.is_best {
                return replace;
            }
            if *size > order.size || *price != order.price {
                return replace;
            }
            ReconcileAction::NoOp
        }
    }
}

/// Reconcile both sides of `snapshot` against `quotes`.
///
/// Order age is measured at the snapshot's fetch time.
pub fn reconcile_pair(
    quotes: &QuotePair,
    snapshot: &MarketSnapshot,
    order_timeout: Duration,
) -> ActionPair {
    let now = snapshot.fetched_at;
    ActionPair {
        bid: reconcile(&quotes.bid, snapshot.own_bid.as_ref(), now, order_timeout),
        ask: reconcile(&quotes.ask, snapshot.own_ask.as_ref(), now, order_timeout),
    }
}
