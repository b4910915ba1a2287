//! Halt latch shared by the supervisor and the manager.
//!
//! Once tripped it stays tripped until [`HaltLatch::reset`] is called.
//! There is no automatic recovery.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

// ============================================================================
// HaltReason
// ============================================================================

/// Why trading was halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// Total exposure above the cap.
    ExposureLimit { exposure: Decimal, limit: Decimal },
    /// Total P&L below the floor.
    PnlFloor { pnl: Decimal, floor: Decimal },
    /// Operator request.
    Manual { message: String },
}

impl HaltReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExposureLimit { .. } => "exposure_limit",
            Self::PnlFloor { .. } => "pnl_floor",
            Self::Manual { .. } => "manual",
        }
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExposureLimit { exposure, limit } => {
                write!(f, "total exposure {exposure} above limit {limit}")
            }
            Self::PnlFloor { pnl, floor } => write!(f, "total pnl {pnl} below floor {floor}"),
            Self::Manual { message } => write!(f, "manual: {message}"),
        }
    }
}

// ============================================================================
// HaltLatch
// ============================================================================

/// One-way halt flag.
///
/// Thread-safe; share it via `Arc<HaltLatch>`. Trip and reset run under
/// the reason lock, and the flag is published only once the reason is in
/// place, so a tripped latch always reports its reason.
pub struct HaltLatch {
    tripped: AtomicBool,
    /// Unix ms of the trip, 0 while clear.
    tripped_at: AtomicI64,
    reason: RwLock<Option<HaltReason>>,
}

impl Default for HaltLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HaltLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
            tripped_at: AtomicI64::new(0),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Trip the latch.
    ///
    /// Returns `true` if this call tripped it. A latch that is already
    /// tripped keeps its first reason.
    pub fn trip(&self, reason: HaltReason) -> bool {
        let mut slot = self.reason.write();
        if slot.is_some() {
            drop(slot);
            warn!(new_reason = %reason, "Halt latch already tripped, ignoring");
            return false;
        }

        *slot = Some(reason.clone());
        self.tripped_at
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.tripped.store(true, Ordering::SeqCst);
        drop(slot);

        error!(reason = %reason, "TRADING HALTED");
        true
    }

    /// Unix ms at which the latch tripped.
    #[must_use]
    pub fn tripped_at(&self) -> Option<i64> {
        if !self.is_tripped() {
            return None;
        }
        match self.tripped_at.load(Ordering::SeqCst) {
            0 => None,
            ts => Some(ts),
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<HaltReason> {
        self.reason.read().clone()
    }

    /// Operator reset. Returns the reason that was cleared, if any.
    pub fn reset(&self) -> Option<HaltReason> {
        let mut slot = self.reason.write();
        let previous = slot.take()?;
        self.tripped.store(false, Ordering::SeqCst);
        self.tripped_at.store(0, Ordering::SeqCst);
        drop(slot);

        info!(previous_reason = %previous, "Halt latch reset by operator");
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_latch_initially_clear() {
        let latch = HaltLatch::new();
        assert!(!latch.is_tripped());
        assert!(latch.tripped_at().is_none());
        assert!(latch.reason().is_none());
    }

    #[test]
    fn test_trip_records_reason_and_time() {
        let latch = HaltLatch::new();
        let reason = HaltReason::ExposureLimit {
            exposure: dec!(12000),
            limit: dec!(10000),
        };
        assert!(latch.trip(reason.clone()));

        assert!(latch.is_tripped());
        assert!(latch.tripped_at().is_some());
        assert_eq!(latch.reason(), Some(reason));
    }

    #[test]
    fn test_second_trip_keeps_first_reason() {
        let latch = HaltLatch::new();
        latch.trip(HaltReason::Manual {
            message: "first".to_string(),
        });
        let tripped = latch.trip(HaltReason::PnlFloor {
            pnl: dec!(-2000),
            floor: dec!(-1000),
        });

        assert!(!tripped);
        assert_eq!(
            latch.reason(),
            Some(HaltReason::Manual {
                message: "first".to_string()
            })
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let latch = HaltLatch::new();
        latch.trip(HaltReason::Manual {
            message: "stop".to_string(),
        });

        let previous = latch.reset();
        assert!(matches!(previous, Some(HaltReason::Manual { .. })));
        assert!(!latch.is_tripped());
        assert!(latch.tripped_at().is_none());
        assert!(latch.reason().is_none());

        // Resetting a clear latch is a no-op.
        assert!(latch.reset().is_none());
    }

    #[test]
    fn test_latch_can_trip_again_after_reset() {
        let latch = HaltLatch::new();
        latch.trip(HaltReason::Manual {
            message: "one".to_string(),
        });
        latch.reset();
        assert!(latch.trip(HaltReason::Manual {
            message: "two".to_string(),
        }));
    }

    #[test]
    fn test_tripped_latch_always_has_reason() {
        use std::sync::Arc;

        let latch = Arc::new(HaltLatch::new());
        let reader = {
            let latch = Arc::clone(&latch);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    if latch.is_tripped() {
                        assert!(latch.reason().is_some());
                        return;
                    }
                    std::thread::yield_now();
                }
            })
        };

        let trippers: Vec<_> = (0..4)
            .map(|i| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || {
                    latch.trip(HaltReason::Manual {
                        message: format!("thread {i}"),
                    })
                })
            })
            .collect();

        let won = trippers
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|tripped| *tripped)
            .count();
        reader.join().unwrap();

        assert_eq!(won, 1);
        assert!(latch.reason().is_some());
    }

    #[test]
    fn test_reason_display() {
        let reason = HaltReason::PnlFloor {
            pnl: dec!(-1500),
            floor: dec!(-1000),
        };
        assert_eq!(reason.to_string(), "total pnl -1500 below floor -1000");
        assert_eq!(reason.label(), "pnl_floor");
    }
}
