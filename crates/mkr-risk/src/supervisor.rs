//! Aggregate risk across agents.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mkr_core::InstrumentId;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RiskError, RiskResult};
use crate::latch::{HaltLatch, HaltReason};

// ============================================================================
// RiskLimits
// ============================================================================

/// Global caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Cap on `sum |inventory * mid|`. Default: 10000.
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: Decimal,
    /// Floor on total P&L (negative). Default: -1000.
    #[serde(default = "default_max_total_pnl_loss")]
    pub max_total_pnl_loss: Decimal,
    /// Pause every agent on breach. When false a breach is only logged.
    #[serde(default = "default_enable_emergency_pause")]
    pub enable_emergency_pause: bool,
    /// Cancel resting orders when trading halts.
    #[serde(default)]
    pub cancel_orders_on_halt: bool,
}

fn default_max_total_exposure() -> Decimal {
    dec!(10000)
}

fn default_max_total_pnl_loss() -> Decimal {
    dec!(-1000)
}

fn default_enable_emergency_pause() -> bool {
    true
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_total_exposure: default_max_total_exposure(),
            max_total_pnl_loss: default_max_total_pnl_loss(),
            enable_emergency_pause: default_enable_emergency_pause(),
            cancel_orders_on_halt: false,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_total_exposure.is_sign_negative() {
            return Err(RiskError::ConfigError(format!(
                "max_total_exposure must be >= 0, got {}",
                self.max_total_exposure
            )));
        }
        if self.max_total_pnl_loss.is_sign_positive() && !self.max_total_pnl_loss.is_zero() {
            return Err(RiskError::ConfigError(format!(
                "max_total_pnl_loss must be <= 0, got {}",
                self.max_total_pnl_loss
            )));
        }
        Ok(())
    }

    /// First violated cap, exposure before P&L.
    fn check(&self, total_exposure: Decimal, total_pnl: Decimal) -> Option<HaltReason> {
        if total_exposure > self.max_total_exposure {
            return Some(HaltReason::ExposureLimit {
                exposure: total_exposure,
                limit: self.max_total_exposure,
            });
        }
        if total_pnl < self.max_total_pnl_loss {
            return Some(HaltReason::PnlFloor {
                pnl: total_pnl,
                floor: self.max_total_pnl_loss,
            });
        }
        None
    }
}

// ============================================================================
// RiskState
// ============================================================================

/// One agent's contribution, taken from its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentExposure {
    pub instrument: InstrumentId,
    /// `|inventory * mid|`.
    pub exposure: Decimal,
    /// Realized plus unrealized.
    pub pnl: Decimal,
}

/// Last committed aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskState {
    pub contributions: HashMap<InstrumentId, AgentExposure>,
    pub total_exposure: Decimal,
    pub total_pnl: Decimal,
    pub evaluated_at: Option<DateTime<Utc>>,
    /// Incremented on every commit.
    pub version: u64,
}

impl RiskState {
    fn recompute_totals(&mut self) {
        self.total_exposure = self.contributions.values().map(|c| c.exposure).sum();
        self.total_pnl = self.contributions.values().map(|c| c.pnl).sum();
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    /// Within limits.
    Clear,
    /// Limits violated but emergency pause is disabled.
    Breached(HaltReason),
    /// This evaluation tripped the latch.
    Tripped(HaltReason),
    /// The latch was already tripped.
    Halted(HaltReason),
}

impl RiskVerdict {
    /// Whether agents must be paused.
    pub fn requires_pause(&self) -> bool {
        matches!(self, Self::Tripped(_) | Self::Halted(_))
    }
}

// ============================================================================
// RiskSupervisor
// ============================================================================

/// Owns the [`RiskState`] and the halt latch.
///
/// The state lock is the only writer path: one evaluation commits at a
/// time, readers see the last committed state.
pub struct RiskSupervisor {
    limits: RiskLimits,
    latch: Arc<HaltLatch>,
    state: RwLock<RiskState>,
}

impl RiskSupervisor {
    pub fn new(limits: RiskLimits) -> RiskResult<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            latch: Arc::new(HaltLatch::new()),
            state: RwLock::new(RiskState::default()),
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn latch(&self) -> Arc<HaltLatch> {
        Arc::clone(&self.latch)
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.latch.is_tripped()
    }

    #[must_use]
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.latch.reason()
    }

    /// Copy of the last committed state.
    pub fn state(&self) -> RiskState {
        self.state.read().clone()
    }

    /// Merge fresh contributions, recompute totals and check the caps.
    ///
    /// Agents missing from `updates` keep their previous contribution.
    pub fn evaluate(&self, updates: impl IntoIterator<Item = AgentExposure>) -> RiskVerdict {
        let (total_exposure, total_pnl, version) = {
            let mut state = self.state.write();
            for update in updates {
                state.contributions.insert(update.instrument.clone(), update);
            }
            state.recompute_totals();
            state.evaluated_at = Some(Utc::now());
            state.version += 1;
            (state.total_exposure, state.total_pnl, state.version)
        };

        debug!(
            total_exposure = %total_exposure,
            total_pnl = %total_pnl,
            version,
            "Risk state committed"
        );

        if let Some(reason) = self.latch.reason() {
            return RiskVerdict::Halted(reason);
        }

        match self.limits.check(total_exposure, total_pnl) {
            None => RiskVerdict::Clear,
            Some(reason) if !self.limits.enable_emergency_pause => {
                warn!(reason = %reason, "Risk limit breached, emergency pause disabled");
                RiskVerdict::Breached(reason)
            }
            Some(reason) => {
                if self.latch.trip(reason.clone()) {
                    RiskVerdict::Tripped(reason)
                } else {
                    RiskVerdict::Halted(self.latch.reason().unwrap_or(reason))
                }
            }
        }
    }

    /// Drop an agent's contribution (agent removed).
    pub fn forget(&self, instrument: &InstrumentId) {
        let mut state = self.state.write();
        if state.contributions.remove(instrument).is_some() {
            state.recompute_totals();
            state.version += 1;
        }
    }

    /// Operator halt.
    pub fn halt(&self, message: impl Into<String>) -> bool {
        self.latch.trip(HaltReason::Manual {
            message: message.into(),
        })
    }

    /// Operator reset of the halt latch.
    pub fn reset(&self) -> Option<HaltReason> {
        self.latch.reset()
    }
}
