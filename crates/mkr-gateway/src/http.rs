//! REST gateway.
//!
//! Talks to an exchange (or a signing proxy in front of one) over a small
//! JSON API:
//!
//! | call | request |
//! |---|---|
//! | book | `GET {base}/book/{instrument}` |
//! | own orders | `GET {base}/orders?instrument={instrument}` |
//! | inventory | `GET {base}/position/{instrument}` |
//! | place | `POST {base}/orders` |
//! | cancel | `DELETE {base}/orders/{order_id}` |
//!
//! Prices and sizes are rounded down to the configured tick and lot before
//! submission.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mkr_core::{BookLevel, InstrumentId, MarketSnapshot, OrderId, OrderSide, OwnOrder, Price, Size};
use reqwest::{Client, RequestBuilder};
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, ExchangeGateway};

/// Header carrying the API key, when one is configured.
const API_KEY_HEADER: &str = "X-API-KEY";

/// HTTP backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGatewayConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// API key given inline.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of an environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Client-level request timeout (ms). Default: 10000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Price tick for rounding. Default: 0.0001.
    #[serde(default = "default_price_tick")]
    pub price_tick: Price,
    /// Size lot for rounding. Default: 0.01.
    #[serde(default = "default_size_lot")]
    pub size_lot: Size,
    /// Minimum order size when the book response omits it. Default: 5.
    #[serde(default = "default_min_order_size")]
    pub default_min_order_size: Size,
    /// Wait between cancelling a sell and re-offering (ms). Default: 100.
    #[serde(default = "default_sell_unlock_delay_ms")]
    pub sell_unlock_delay_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_price_tick() -> Price {
    Price::new(dec!(0.0001))
}

fn default_size_lot() -> Size {
    Size::new(dec!(0.01))
}

fn default_min_order_size() -> Size {
    Size::new(dec!(5))
}

fn default_sell_unlock_delay_ms() -> u64 {
    100
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_env: None,
            request_timeout_ms: default_request_timeout_ms(),
            price_tick: default_price_tick(),
            size_lot: default_size_lot(),
            default_min_order_size: default_min_order_size(),
            sell_unlock_delay_ms: default_sell_unlock_delay_ms(),
        }
    }

    /// Inline key wins over the environment variable.
    fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
    #[serde(default)]
    min_order_size: Option<Size>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderResponse {
    id: String,
    side: OrderSide,
    price: Price,
    /// Remaining size.
    size: Size,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    #[serde(default)]
    size: Size,
}

#[derive(Debug, Serialize)]
struct PlaceRequest<'a> {
    instrument: &'a str,
    side: OrderSide,
    price: Price,
    size: Size,
    order_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PlaceResponse {
    order_id: String,
}

// ============================================================================
// HttpGateway
// ============================================================================

/// REST exchange gateway.
pub struct HttpGateway {
    client: Client,
    config: HttpGatewayConfig,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> GatewayResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::Config("base_url must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_key = config.resolve_api_key();
        info!(
            base_url = %config.base_url,
            authenticated = api_key.is_some(),
            "HTTP gateway configured"
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> GatewayResult<T> {
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| GatewayError::Fetch(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Fetch(format!("GET {url}: HTTP {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Fetch(format!("GET {url}: failed to parse response: {e}")))
    }

    async fn fetch(&self, instrument: &InstrumentId) -> GatewayResult<MarketSnapshot> {
        let id = instrument.as_str();
        let (book, orders, position) = tokio::try_join!(
            self.get_json::<BookResponse>(self.url(&format!("book/{id}"))),
            self.get_json::<Vec<OpenOrderResponse>>(self.url(&format!("orders?instrument={id}"))),
            self.get_json::<PositionResponse>(self.url(&format!("position/{id}"))),
        )?;

        let own_orders = orders
            .into_iter()
            .map(|o| OwnOrder {
                order_id: OrderId::from(o.id),
                side: o.side,
                price: o.price,
                size: o.size,
                is_best: false,
                placed_at: o.created_at,
            })
            .collect();

        let snapshot = MarketSnapshot::from_book(
            instrument.clone(),
            &book.bids,
            &book.asks,
            book.min_order_size
                .unwrap_or(self.config.default_min_order_size),
            position.size,
            own_orders,
            Utc::now(),
        )?
        .with_precision(self.config.price_tick, self.config.size_lot);

        debug!(
            instrument = %instrument,
            best_bid = %snapshot.best_bid,
            best_ask = %snapshot.best_ask,
            inventory = %snapshot.inventory,
            "Snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn submit_place(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    ) -> GatewayResult<OrderId> {
        let request = PlaceRequest {
            instrument: instrument.as_str(),
            side,
            price: price.round_to_tick(self.config.price_tick),
            size: size.round_to_lot(self.config.size_lot),
            order_type: "limit",
        };
        if !request.size.is_positive() {
            return Err(GatewayError::Rejected(format!(
                "size {size} rounds to zero at lot {}",
                self.config.size_lot
            )));
        }

        let url = self.url("orders");
        let response = self
            .authorize(self.client.post(&url).json(&request))
            .send()
            .await
            .map_err(|e| GatewayError::Submit(format!("POST {url}: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Submit(format!("HTTP {status}: {body}")));
        }

        let placed: PlaceResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Submit(format!("failed to parse place response: {e}")))?;
        Ok(OrderId::from(placed.order_id))
    }

    async fn submit_cancel(&self, order_id: &OrderId) -> GatewayResult<()> {
        let url = self.url(&format!("orders/{order_id}"));
        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| GatewayError::Submit(format!("DELETE {url}: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Submit(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

impl ExchangeGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch_snapshot<'a>(
        &'a self,
        instrument: &'a InstrumentId,
    ) -> BoxFuture<'a, GatewayResult<MarketSnapshot>> {
        Box::pin(self.fetch(instrument))
    }

    fn place<'a>(
        &'a self,
        instrument: &'a InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
    ) -> BoxFuture<'a, GatewayResult<OrderId>> {
        Box::pin(self.submit_place(instrument, side, price, size))
    }

    fn cancel<'a>(&'a self, order_id: &'a OrderId) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(self.submit_cancel(order_id))
    }

    fn sell_unlock_delay(&self) -> Duration {
        Duration::from_millis(self.config.sell_unlock_delay_ms)
    }
}
