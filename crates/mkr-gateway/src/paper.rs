//! In-memory paper exchange.
//!
//! Holds one book per instrument: external resting levels, the agent's own
//! orders and its inventory. Orders are post-only: one that would cross
//! the book is rejected, and resting orders never match on their own. Fills
//! are driven explicitly with [`PaperExchange::fill_order`]. Used as the
//! `paper` backend and as the gateway in tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use mkr_core::{BookLevel, InstrumentId, MarketSnapshot, OrderId, OrderSide, OwnOrder, Price, Size};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, ExchangeGateway};

/// Seed for one paper book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBookConfig {
    pub instrument: InstrumentId,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Size,
    #[serde(default)]
    pub inventory: Size,
}

fn default_min_order_size() -> Size {
    Size::new(dec!(5))
}

/// Paper backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default)]
    pub books: Vec<PaperBookConfig>,
    /// Price tick orders are rounded down to. Zero disables rounding.
    #[serde(default)]
    pub price_tick: Price,
    /// Size lot orders are rounded down to. Zero disables rounding.
    #[serde(default)]
    pub size_lot: Size,
}

/// A call received by the paper exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperCall {
    Fetch(InstrumentId),
    Place {
        instrument: InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    },
    Cancel(OrderId),
}

#[derive(Debug, Clone)]
struct PaperBook {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    min_order_size: Size,
    inventory: Size,
    orders: Vec<OwnOrder>,
}

impl PaperBook {
    /// Book served for instruments nobody seeded.
    fn fallback() -> Self {
        Self {
            bids: vec![BookLevel::new(Price::new(dec!(0.50)), Size::new(dec!(100)))],
            asks: vec![BookLevel::new(Price::new(dec!(0.51)), Size::new(dec!(100)))],
            min_order_size: default_min_order_size(),
            inventory: Size::ZERO,
            orders: Vec::new(),
        }
    }

    /// External levels merged with own resting size.
    fn merged_levels(&self, side: OrderSide) -> Vec<BookLevel> {
        let external = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        external
            .iter()
            .copied()
            .chain(
                self.orders
                    .iter()
                    .filter(|o| o.side == side)
                    .map(|o| BookLevel::new(o.price, o.size)),
            )
            .collect()
    }

    /// Whether an order at `price` would trade against the opposite side.
    fn crosses(&self, side: OrderSide, price: Price) -> bool {
        match side {
            OrderSide::Buy => self
                .merged_levels(OrderSide::Sell)
                .iter()
                .any(|level| level.price <= price),
            OrderSide::Sell => self
                .merged_levels(OrderSide::Buy)
                .iter()
                .any(|level| level.price >= price),
        }
    }
}

/// Remaining injected failures per call type.
#[derive(Debug, Default)]
struct FailurePlan {
    fetch: AtomicU32,
    place: AtomicU32,
    cancel: AtomicU32,
}

impl FailurePlan {
    /// Consume one injected failure if any are pending.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory exchange.
#[derive(Debug)]
pub struct PaperExchange {
    books: DashMap<InstrumentId, PaperBook>,
    order_index: DashMap<OrderId, InstrumentId>,
    calls: Mutex<Vec<PaperCall>>,
    failures: FailurePlan,
    latency: Mutex<Duration>,
    sell_unlock_delay: Duration,
    price_tick: Price,
    size_lot: Size,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
            order_index: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: FailurePlan::default(),
            latency: Mutex::new(Duration::ZERO),
            sell_unlock_delay: Duration::ZERO,
            price_tick: Price::ZERO,
            size_lot: Size::ZERO,
        }
    }

    pub fn from_config(config: &PaperConfig) -> Self {
        let exchange = Self::new().with_precision(config.price_tick, config.size_lot);
        for book in &config.books {
            exchange.seed_book(
                book.instrument.clone(),
                book.bids.clone(),
                book.asks.clone(),
                book.min_order_size,
                book.inventory,
            );
        }
        info!(books = config.books.len(), "Paper exchange initialised");
        exchange
    }

    /// Replace the whole book of an instrument, dropping its own orders.
    pub fn seed_book(
        &self,
        instrument: InstrumentId,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        min_order_size: Size,
        inventory: Size,
    ) {
        self.order_index.retain(|_, inst| *inst != instrument);
        self.books.insert(
            instrument,
            PaperBook {
                bids,
                asks,
                min_order_size,
                inventory,
                orders: Vec::new(),
            },
        );
    }

    /// Replace the external levels, keeping own orders and inventory.
    pub fn set_levels(&self, instrument: &InstrumentId, bids: Vec<BookLevel>, asks: Vec<BookLevel>) {
        let mut book = self.book_mut(instrument);
        book.bids = bids;
        book.asks = asks;
    }

    pub fn set_inventory(&self, instrument: &InstrumentId, inventory: Size) {
        self.book_mut(instrument).inventory = inventory;
    }

    pub fn inventory(&self, instrument: &InstrumentId) -> Size {
        self.books
            .get(instrument)
            .map(|b| b.inventory)
            .unwrap_or(Size::ZERO)
    }

    /// Own resting orders for an instrument.
    pub fn resting_orders(&self, instrument: &InstrumentId) -> Vec<OwnOrder> {
        self.books
            .get(instrument)
            .map(|b| b.orders.clone())
            .unwrap_or_default()
    }

    /// Insert an own order directly, bypassing `place` (e.g. an aged order).
    pub fn insert_resting_order(&self, instrument: &InstrumentId, order: OwnOrder) {
        self.order_index
            .insert(order.order_id.clone(), instrument.clone());
        self.book_mut(instrument).orders.push(order);
    }

    /// Fill `size` of a resting order, moving inventory accordingly.
    pub fn fill_order(&self, order_id: &OrderId, size: Size) -> GatewayResult<()> {
        let instrument = self
            .order_index
            .get(order_id)
            .map(|i| i.clone())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;

        let mut book = self.book_mut(&instrument);
        let pos = book
            .orders
            .iter()
            .position(|o| &o.order_id == order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;

        let order = &mut book.orders[pos];
        let filled = if size > order.size { order.size } else { size };
        order.size = order.size - filled;
        let side = order.side;
        let exhausted = order.size.is_zero();

        book.inventory = match side {
            OrderSide::Buy => book.inventory + filled,
            OrderSide::Sell => book.inventory - filled,
        };

        if exhausted {
            book.orders.remove(pos);
            drop(book);
            self.order_index.remove(order_id);
        }

        debug!(order_id = %order_id, %side, filled = %filled, "Paper fill");
        Ok(())
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.failures.fetch.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_places(&self, count: u32) {
        self.failures.place.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_cancels(&self, count: u32) {
        self.failures.cancel.store(count, Ordering::SeqCst);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn with_sell_unlock_delay(mut self, delay: Duration) -> Self {
        self.sell_unlock_delay = delay;
        self
    }

    /// Round submitted orders down to `price_tick` and `size_lot`, like a
    /// venue with fixed increments.
    pub fn with_precision(mut self, price_tick: Price, size_lot: Size) -> Self {
        self.price_tick = price_tick;
        self.size_lot = size_lot;
        self
    }

    pub fn calls(&self) -> Vec<PaperCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    // === Private helpers ===

    fn book_mut(
        &self,
        instrument: &InstrumentId,
    ) -> dashmap::mapref::one::RefMut<'_, InstrumentId, PaperBook> {
        self.books
            .entry(instrument.clone())
            .or_insert_with(PaperBook::fallback)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, call: PaperCall) {
        self.calls.lock().push(call);
    }

    fn snapshot_of(&self, instrument: &InstrumentId) -> GatewayResult<MarketSnapshot> {
        let book = self.book_mut(instrument);
        let snapshot = MarketSnapshot::from_book(
            instrument.clone(),
            &book.merged_levels(OrderSide::Buy),
            &book.merged_levels(OrderSide::Sell),
            book.min_order_size,
            book.inventory,
            book.orders.clone(),
            Utc::now(),
        )?
        .with_precision(self.price_tick, self.size_lot);
        Ok(snapshot)
    }

    fn place_order(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    ) -> GatewayResult<OrderId> {
        let price = price.round_to_tick(self.price_tick);
        let size = size.round_to_lot(self.size_lot);
        if !price.is_positive() || !size.is_positive() {
            return Err(GatewayError::Rejected(format!(
                "invalid order {size}@{price}"
            )));
        }

        let mut book = self.book_mut(instrument);
        if size < book.min_order_size {
            return Err(GatewayError::Rejected(format!(
                "size {size} below minimum {}",
                book.min_order_size
            )));
        }
        if book.crosses(side, price) {
            return Err(GatewayError::Rejected(format!(
                "post-only {side} {size}@{price} would cross the book"
            )));
        }
        if side == OrderSide::Sell {
            let committed = book
                .orders
                .iter()
                .filter(|o| o.side == OrderSide::Sell)
                .fold(Size::ZERO, |acc, o| acc + o.size);
            if committed + size > book.inventory {
                return Err(GatewayError::Rejected(format!(
                    "insufficient inventory: {} held, {} already offered",
                    book.inventory, committed
                )));
            }
        }

        let order_id = OrderId::generate();
        book.orders.push(OwnOrder {
            order_id: order_id.clone(),
            side,
            price,
            size,
            is_best: false,
            placed_at: Utc::now(),
        });
        drop(book);

        self.order_index.insert(order_id.clone(), instrument.clone());
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: &OrderId) -> GatewayResult<()> {
        let (_, instrument) = self
            .order_index
            .remove(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {order_id}")))?;
        self.book_mut(&instrument)
            .orders
            .retain(|o| &o.order_id != order_id);
        Ok(())
    }
}

impl ExchangeGateway for PaperExchange {
    fn name(&self) -> &'static str {
        "paper"
    }

    fn fetch_snapshot<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, GatewayResult<MarketSnapshot>> {
        Box::pin(async move {
            self.record(PaperCall::Fetch(instrument.clone()));
            self.simulate_latency().await;
            if FailurePlan::take(&self.failures.fetch) {
                return Err(GatewayError::Fetch("injected fetch failure".to_string()));
            }
            self.snapshot_of(instrument)
        })
    }

    fn place<'a>(
        &'a self,
        instrument: &'a InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    ) -> BoxFuture<'a, GatewayResult<OrderId>> {
        Box::pin(async move {
            self.record(PaperCall::Place {
                instrument: instrument.clone(),
                side,
                price,
                size,
            });
            self.simulate_latency().await;
            if FailurePlan::take(&self.failures.place) {
                return Err(GatewayError::Submit("injected place failure".to_string()));
            }
            self.place_order(instrument, side, price, size)
        })
    }

    fn cancel<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            self.record(PaperCall::Cancel(order_id.clone()));
            self.simulate_latency().await;
            if FailurePlan::take(&self.failures.cancel) {
                return Err(GatewayError::Submit("injected cancel failure".to_string()));
            }
            self.cancel_order(order_id)
        })
    }

    fn sell_unlock_delay(&self) -> Duration {
        self.sell_unlock_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn instrument() -> InstrumentId {
        InstrumentId::new("paper-test").unwrap()
    }

    fn level(price: Decimal, size: Decimal) -> BookLevel {
        BookLevel::new(Price::new(price), Size::new(size))
    }

    fn seeded(inventory: Decimal) -> PaperExchange {
        let exchange = PaperExchange::new();
        exchange.seed_book(
            instrument(),
            vec![level(dec!(45), dec!(10)), level(dec!(44), dec!(10))],
            vec![level(dec!(50), dec!(10)), level(dec!(52), dec!(10))],
            Size::new(dec!(5)),
            Size::new(inventory),
        );
        exchange
    }

    #[tokio::test]
    async fn test_unseeded_instrument_serves_fallback_book() {
        let exchange = PaperExchange::new();
        let snap = exchange.fetch_snapshot(&instrument()).await.unwrap();

        assert_eq!(snap.best_bid.inner(), dec!(0.50));
        assert_eq!(snap.best_ask.inner(), dec!(0.51));
        assert_eq!(snap.min_order_size.inner(), dec!(5));
    }

    #[tokio::test]
    async fn test_place_shows_up_as_own_best_order() {
        let exchange = seeded(dec!(0));
        let id = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46)), Size::new(dec!(20)))
            .await
            .unwrap();

        let snap = exchange.fetch_snapshot(&instrument()).await.unwrap();
        let own = snap.own_bid.unwrap();
        assert_eq!(own.order_id, id);
        assert!(own.is_best);
        assert_eq!(snap.best_bid.inner(), dec!(46));
        assert_eq!(snap.best_bid_size.inner(), dec!(20));
        assert_eq!(snap.second_best_bid, Some(Price::new(dec!(45))));
    }

    #[tokio::test]
    async fn test_cancel_removes_order() {
        let exchange = seeded(dec!(0));
        let id = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46)), Size::new(dec!(20)))
            .await
            .unwrap();

        exchange.cancel(&id).await.unwrap();
        assert!(exchange.resting_orders(&instrument()).is_empty());
        assert!(matches!(
            exchange.cancel(&id).await,
            Err(GatewayError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_place_rejects_below_minimum_and_oversold() {
        let exchange = seeded(dec!(10));

        let small = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46)), Size::new(dec!(1)))
            .await;
        assert!(matches!(small, Err(GatewayError::Rejected(_))));

        let oversold = exchange
            .place(&instrument(), OrderSide::Sell, Price::new(dec!(49)), Size::new(dec!(11)))
            .await;
        assert!(matches!(oversold, Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_crossing_orders_are_rejected() {
        let exchange = seeded(dec!(10));

        let buy = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(50)), Size::new(dec!(5)))
            .await;
        assert!(matches!(buy, Err(GatewayError::Rejected(_))));

        let sell = exchange
            .place(&instrument(), OrderSide::Sell, Price::new(dec!(45)), Size::new(dec!(5)))
            .await;
        assert!(matches!(sell, Err(GatewayError::Rejected(_))));

        assert!(exchange.resting_orders(&instrument()).is_empty());
        assert!(exchange.fetch_snapshot(&instrument()).await.is_ok());
    }

    #[tokio::test]
    async fn test_order_crossing_own_order_is_rejected() {
        let exchange = seeded(dec!(10));
        exchange
            .place(&instrument(), OrderSide::Sell, Price::new(dec!(48)), Size::new(dec!(5)))
            .await
            .unwrap();

        let buy = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(48)), Size::new(dec!(5)))
            .await;
        assert!(matches!(buy, Err(GatewayError::Rejected(_))));
        assert!(exchange.fetch_snapshot(&instrument()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fill_order_moves_inventory() {
        let exchange = seeded(dec!(0));
        let id = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46)), Size::new(dec!(20)))
            .await
            .unwrap();

        exchange.fill_order(&id, Size::new(dec!(5))).unwrap();
        assert_eq!(exchange.inventory(&instrument()).inner(), dec!(5));
        assert_eq!(exchange.resting_orders(&instrument())[0].size.inner(), dec!(15));

        exchange.fill_order(&id, Size::new(dec!(100))).unwrap();
        assert_eq!(exchange.inventory(&instrument()).inner(), dec!(20));
        assert!(exchange.resting_orders(&instrument()).is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let exchange = seeded(dec!(0));
        exchange.fail_next_fetches(1);

        assert!(matches!(
            exchange.fetch_snapshot(&instrument()).await,
            Err(GatewayError::Fetch(_))
        ));
        assert!(exchange.fetch_snapshot(&instrument()).await.is_ok());
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let exchange = seeded(dec!(0));
        let id = exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46)), Size::new(dec!(20)))
            .await
            .unwrap();
        exchange.cancel(&id).await.unwrap();

        let calls = exchange.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], PaperCall::Place { .. }));
        assert_eq!(calls[1], PaperCall::Cancel(id));
    }

    #[tokio::test]
    async fn test_precision_rounds_orders_down() {
        let exchange = PaperExchange::new().with_precision(Price::new(dec!(0.5)), Size::new(dec!(1)));
        exchange.seed_book(
            instrument(),
            vec![level(dec!(45), dec!(10))],
            vec![level(dec!(50), dec!(10))],
            Size::new(dec!(5)),
            Size::ZERO,
        );

        exchange
            .place(&instrument(), OrderSide::Buy, Price::new(dec!(46.7)), Size::new(dec!(20.9)))
            .await
            .unwrap();

        let resting = exchange.resting_orders(&instrument());
        assert_eq!(resting[0].price.inner(), dec!(46.5));
        assert_eq!(resting[0].size.inner(), dec!(20));

        let snap = exchange.fetch_snapshot(&instrument()).await.unwrap();
        assert_eq!(snap.price_tick.inner(), dec!(0.5));
        assert_eq!(snap.size_lot.inner(), dec!(1));
    }

    #[test]
    fn test_paper_config_from_toml() {
        let toml_str = r#"
            [[books]]
            instrument = "rain"
            bids = [{ price = "0.45", size = "100" }]
            asks = [{ price = "0.50", size = "100" }]
            inventory = "10"
        "#;
        let config: PaperConfig = toml::from_str(toml_str).unwrap();
        let exchange = PaperExchange::from_config(&config);

        let rain = InstrumentId::new("rain").unwrap();
        assert_eq!(exchange.inventory(&rain).inner(), dec!(10));
    }
}
