//! Gateway backend selection from configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GatewayResult;
use crate::gateway::DynGateway;
use crate::http::{HttpGateway, HttpGatewayConfig};
use crate::paper::{PaperConfig, PaperExchange};

/// Which exchange backend to run against.
///
/// ```toml
/// [gateway]
/// kind = "http"
/// base_url = "http://127.0.0.1:8080"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GatewayBackend {
    Paper(PaperConfig),
    Http(HttpGatewayConfig),
}

impl Default for GatewayBackend {
    fn default() -> Self {
        Self::Paper(PaperConfig::default())
    }
}

impl GatewayBackend {
    pub fn build(&self) -> GatewayResult<DynGateway> {
        let gateway: DynGateway = match self {
            Self::Paper(config) => Arc::new(PaperExchange::from_config(config)),
            Self::Http(config) => Arc::new(HttpGateway::new(config.clone())?),
        };
        info!(backend = gateway.name(), "Exchange gateway ready");
        Ok(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_paper() {
        let gateway = GatewayBackend::default().build().unwrap();
        assert_eq!(gateway.name(), "paper");
    }

    #[test]
    fn test_http_backend_from_toml() {
        let backend: GatewayBackend = toml::from_str(
            r#"
kind = "http"
base_url = "http://127.0.0.1:8080"
sell_unlock_delay_ms = 250
"#,
        )
        .unwrap();

        let gateway = backend.build().unwrap();
        assert_eq!(gateway.name(), "http");
        assert_eq!(gateway.sell_unlock_delay().as_millis(), 250);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<GatewayBackend, _> = toml::from_str(r#"kind = "fix""#);
        assert!(result.is_err());
    }
}
