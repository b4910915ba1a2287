//! Exchange gateway capability.
//!
//! [`ExchangeGateway`] is the only way agents touch an exchange. Two
//! backends ship with the crate:
//!
//! - [`PaperExchange`]: in-memory books, explicit fills, failure injection
//! - [`HttpGateway`]: REST client with tick/lot rounding
//!
//! [`GatewayBackend`] picks one from configuration.

pub mod backend;
pub mod error;
pub mod gateway;
pub mod http;
pub mod paper;

pub use backend::GatewayBackend;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{with_timeout, BoxFuture, DynGateway, ExchangeGateway};
pub use http::{HttpGateway, HttpGatewayConfig};
pub use paper::{PaperBookConfig, PaperCall, PaperConfig, PaperExchange};
