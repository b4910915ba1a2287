//! Desired quote calculation.
//!
//! Computes, per side, the order the agent should have resting right now:
//! - Sell: offer the full inventory one improvement below the best ask
//! - Buy: bid for the remaining headroom one improvement above the best bid,
//!   but only when the spread left after improving is wide enough
//! - Gap-closing: when the agent alone holds the best price and the next
//!   level is far away, move toward that level instead of leaving the
//!   gap on the table
//!
//! Everything here is a pure function of the snapshot and the config.

use std::fmt;

use mkr_core::{AgentConfig, MarketSnapshot, OrderSide, Price, Size};
use serde::{Deserialize, Serialize};

/// Why a side is not quoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HoldReason {
    /// Nothing to sell.
    NoInventory,
    /// Inventory is positive but below the exchange minimum (stranded).
    BelowMinimum { inventory: Size, min_order_size: Size },
    /// Spread after improvement is under the configured threshold.
    SpreadTooThin { effective_spread: Price, threshold: Price },
    /// Inventory is at or above the cap.
    NoHeadroom { balance: Size },
    /// Remaining headroom is below the exchange minimum.
    HeadroomBelowMinimum { balance: Size, min_order_size: Size },
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInventory => write!(f, "no inventory"),
            Self::BelowMinimum {
                inventory,
                min_order_size,
            } => write!(f, "inventory {inventory} below minimum {min_order_size}"),
            Self::SpreadTooThin {
                effective_spread,
                threshold,
            } => write!(f, "effective spread {effective_spread} < threshold {threshold}"),
            Self::NoHeadroom { balance } => write!(f, "no headroom (balance {balance})"),
            Self::HeadroomBelowMinimum {
                balance,
                min_order_size,
            } => write!(f, "headroom {balance} below minimum {min_order_size}"),
        }
    }
}

/// Desired state of one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DesiredQuote {
    /// No order should rest on this side.
    None(HoldReason),
    /// Exactly this order should rest on this side.
    Quote { price: Price, size: Size },
}

impl DesiredQuote {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None(_))
    }

    pub fn hold_reason(&self) -> Option<&HoldReason> {
        match self {
            Self::None(reason) => Some(reason),
            Self::Quote { .. } => None,
        }
    }
}

impl fmt::Display for DesiredQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None(reason) => write!(f, "none ({reason})"),
            Self::Quote { price, size } => write!(f, "{size}@{price}"),
        }
    }
}

/// Desired quotes for both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePair {
    pub bid: DesiredQuote,
    pub ask: DesiredQuote,
}

impl QuotePair {
    pub fn side(&self, side: OrderSide) -> &DesiredQuote {
        match side {
            OrderSide::Buy => &self.bid,
            OrderSide::Sell => &self.ask,
        }
    }
}

/// Intermediate values shared by the quote decision and status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteMetrics {
    /// `best_ask - best_bid`.
    pub spread: Price,
    /// `spread - price_improvement`.
    pub effective_spread: Price,
    /// `max_inventory - inventory` (negative when over the cap).
    pub balance: Size,
}

impl QuoteMetrics {
    pub fn compute(snapshot: &MarketSnapshot, config: &AgentConfig) -> Self {
        let spread = snapshot.spread();
        Self {
            spread,
            effective_spread: spread - config.price_improvement,
            balance: config.max_inventory - snapshot.inventory,
        }
    }
}

/// Compute the desired quotes for both sides.
pub fn compute_quotes(snapshot: &MarketSnapshot, config: &AgentConfig) -> QuotePair {
    let metrics = QuoteMetrics::compute(snapshot, config);
    QuotePair {
        bid: buy_quote(snapshot, config, &metrics),
        ask: sell_quote(snapshot, config),
    }
}

fn sell_quote(snapshot: &MarketSnapshot, config: &AgentConfig) -> DesiredQuote {
    let inventory = snapshot.inventory;

    if !inventory.is_positive() {
        return DesiredQuote::None(HoldReason::NoInventory);
    }
    if inventory < snapshot.min_order_size {
        return DesiredQuote::None(HoldReason::BelowMinimum {
            inventory,
            min_order_size: snapshot.min_order_size,
        });
    }

    let size = inventory.round_to_lot(snapshot.size_lot);
    if size < snapshot.min_order_size {
        return DesiredQuote::None(HoldReason::BelowMinimum {
            inventory,
            min_order_size: snapshot.min_order_size,
        });
    }

    DesiredQuote::Quote {
        price: target_price(snapshot, OrderSide::Sell, config.price_improvement),
        size,
    }
}

fn buy_quote(
    snapshot: &MarketSnapshot,
    config: &AgentConfig,
    metrics: &QuoteMetrics,
) -> DesiredQuote {
    if metrics.effective_spread < config.spread_threshold {
        return DesiredQuote::None(HoldReason::SpreadTooThin {
            effective_spread: metrics.effective_spread,
            threshold: config.spread_threshold,
        });
    }

    let balance = metrics.balance;
    if !balance.is_positive() {
        return DesiredQuote::None(HoldReason::NoHeadroom { balance });
    }
    if balance < snapshot.min_order_size {
        return DesiredQuote::None(HoldReason::HeadroomBelowMinimum {
            balance,
            min_order_size: snapshot.min_order_size,
        });
    }

    let size = balance.round_to_lot(snapshot.size_lot);
    if size < snapshot.min_order_size {
        return DesiredQuote::None(HoldReason::HeadroomBelowMinimum {
            balance,
            min_order_size: snapshot.min_order_size,
        });
    }

    DesiredQuote::Quote {
        price: target_price(snapshot, OrderSide::Buy, config.price_improvement),
        size,
    }
}

/// Target price for one side.
///
/// - Not alone at the best price: improve on it by `improvement`.
/// - Alone at the best price and the next level is more than `improvement`
///   away: close the gap to one improvement inside that level.
/// - Alone at the best price otherwise: stay where we are.
///
/// The result is snapped to the venue tick away from the other side, so a
/// quote never ends up more aggressive than intended.
fn target_price(snapshot: &MarketSnapshot, side: OrderSide, improvement: Price) -> Price {
    let best = snapshot.best(side);

    let raw = if !is_sole_best(snapshot, side) {
        improve(best, side, improvement)
    } else {
        match snapshot.second_best(side) {
            Some(second) if distance(best, second) > improvement => {
                // One improvement inside the second level, i.e. back toward it.
                improve(second, side, improvement)
            }
            _ => best,
        }
    };

    match side {
        OrderSide::Buy => raw.round_to_tick(snapshot.price_tick),
        OrderSide::Sell => raw.round_up_to_tick(snapshot.price_tick),
    }
}

/// The own order is at the best price and accounts for all of its size.
fn is_sole_best(snapshot: &MarketSnapshot, side: OrderSide) -> bool {
    snapshot.own(side).is_some_and(|own| {
        own.price == snapshot.best(side) && own.size == snapshot.best_size(side)
    })
}

/// Move `price` one `improvement` toward the other side of the book.
fn improve(price: Price, side: OrderSide, improvement: Price) -> Price {
    match side {
        OrderSide::Buy => price + improvement,
        OrderSide::Sell => price - improvement,
    }
}

fn distance(a: Price, b: Price) -> Price {
    if a >= b {
        a - b
    } else {
        b - a
    }
}
