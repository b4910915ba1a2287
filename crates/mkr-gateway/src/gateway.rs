//! Exchange gateway trait.
//!
//! Everything the agents need from an exchange: a fresh snapshot, place,
//! cancel. Transport, authentication and rounding live behind it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use mkr_core::BoxFuture;
use mkr_core::{InstrumentId, MarketSnapshot, OrderId, OrderSide, Price, Size};

use crate::error::{GatewayError, GatewayResult};

/// Exchange capability used by the agents.
///
/// Implementations must make `place`/`cancel` safe to call again after a
/// timeout: a retried call must not silently leave two orders resting.
pub trait ExchangeGateway: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch book, own orders and inventory for `instrument`.
    fn fetch_snapshot<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, GatewayResult<MarketSnapshot>>;

    /// Place a resting limit order and return its id.
    fn place<'a>(
        &'a self,
        instrument: &'a InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    ) -> BoxFuture<'a, GatewayResult<OrderId>>;

    /// Cancel a resting order.
    fn cancel<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, GatewayResult<()>>;

    /// Time to wait after cancelling a sell order before the freed
    /// inventory can be offered again.
    fn sell_unlock_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Arc wrapper for gateway trait objects.
pub type DynGateway = Arc<dyn ExchangeGateway>;

/// Run a gateway call with a deadline; expiry becomes [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
