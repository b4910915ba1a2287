//! Per-agent quoting configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::{InstrumentId, Price, Size};

/// Quoting parameters for one agent.
///
/// Immutable once an agent is built; a changed configuration replaces the
/// agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Instrument the agent quotes.
    pub instrument: InstrumentId,
    /// Display name. Falls back to the instrument id.
    #[serde(default)]
    pub name: Option<String>,
    /// Inventory cap; buying headroom is `max_inventory - inventory`.
    pub max_inventory: Size,
    /// Minimum effective spread required before bidding.
    pub spread_threshold: Price,
    /// Offset applied to beat the best price.
    pub price_improvement: Price,
    /// Resting orders older than this are cancelled and re-placed.
    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,
    /// Log a warning every step while inventory is below the exchange minimum.
    #[serde(default = "default_stranded_inventory_warn")]
    pub stranded_inventory_warn: bool,
}

fn default_order_timeout_secs() -> u64 {
    30
}

fn default_stranded_inventory_warn() -> bool {
    true
}

impl AgentConfig {
    pub fn new(
        instrument: InstrumentId,
        max_inventory: Size,
        spread_threshold: Price,
        price_improvement: Price,
    ) -> Self {
        Self {
            instrument,
            name: None,
            max_inventory,
            spread_threshold,
            price_improvement,
            order_timeout_secs: default_order_timeout_secs(),
            stranded_inventory_warn: default_stranded_inventory_warn(),
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.instrument.as_str())
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }

    /// Reject negative limits and a zero order timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_inventory.inner().is_sign_negative() {
            return Err(CoreError::InvalidConfig(format!(
                "{}: max_inventory must be >= 0, got {}",
                self.instrument, self.max_inventory
            )));
        }
        if self.spread_threshold.inner().is_sign_negative() {
            return Err(CoreError::InvalidConfig(format!(
                "{}: spread_threshold must be >= 0, got {}",
                self.instrument, self.spread_threshold
            )));
        }
        if self.price_improvement.inner().is_sign_negative() {
            return Err(CoreError::InvalidConfig(format!(
                "{}: price_improvement must be >= 0, got {}",
                self.instrument, self.price_improvement
            )));
        }
        if self.order_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{}: order_timeout_secs must be > 0",
                self.instrument
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> AgentConfig {
        AgentConfig::new(
            InstrumentId::new("m1").unwrap(),
            Size::new(dec!(100)),
            Price::new(dec!(0.01)),
            Price::new(dec!(0.01)),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.order_timeout(), Duration::from_secs(30));
        assert!(cfg.stranded_inventory_warn);
        assert_eq!(cfg.label(), "m1");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_values() {
        let mut cfg = config();
        cfg.price_improvement = Price::new(dec!(-0.01));
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.max_inventory = Size::new(dec!(-1));
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.order_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let toml_str = r#"
            instrument = "will-it-rain"
            max_inventory = "50"
            spread_threshold = "0.02"
            price_improvement = "0.01"
        "#;
        let cfg: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_inventory.inner(), dec!(50));
        assert_eq!(cfg.order_timeout_secs, 30);
        assert!(cfg.name.is_none());
    }
}
