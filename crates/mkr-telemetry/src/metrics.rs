//! Prometheus metrics for the agents, the risk supervisor and config sync.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error and should crash at
//! first use rather than drop metrics silently. Panics can only happen
//! during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntGauge,
    TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

// ============================================================================
// Agent steps
// ============================================================================

/// Labels: instrument, outcome (completed/fetch_failed/skipped_paused/...)
pub static STEPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mkr_steps_total",
        "Agent steps by outcome",
        &["instrument", "outcome"]
    )
    .unwrap()
});

pub static STEP_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mkr_step_duration_ms",
        "Agent step wall time in milliseconds",
        &["instrument"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Labels: instrument, side, kind (place/cancel/cancel_replace)
pub static ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mkr_reconcile_actions_total",
        "Reconcile actions submitted",
        &["instrument", "side", "kind"]
    )
    .unwrap()
});

/// Labels: instrument, side, error
pub static SUBMIT_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mkr_submit_failures_total",
        "Failed place/cancel submissions",
        &["instrument", "side", "error"]
    )
    .unwrap()
});

pub static FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mkr_fills_total",
        "Fills inferred from inventory changes",
        &["instrument", "side"]
    )
    .unwrap()
});

pub static INVENTORY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("mkr_inventory", "Inventory per instrument", &["instrument"]).unwrap()
});

/// 1 for the agent's current state, 0 for the others.
pub static AGENT_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mkr_agent_state",
        "Agent state machine current state (1=active, 0=inactive)",
        &["instrument", "state"]
    )
    .unwrap()
});

pub static AGENTS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("mkr_agents", "Agents owned by the manager").unwrap());

// ============================================================================
// Risk
// ============================================================================

pub static RISK_TOTAL_EXPOSURE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mkr_risk_total_exposure", "Sum of |inventory * mid|").unwrap()
});

pub static RISK_TOTAL_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mkr_risk_total_pnl", "Realized plus unrealized P&L").unwrap()
});

pub static RISK_HALTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("mkr_risk_halted", "Halt latch state (1=tripped)").unwrap()
});

/// Labels: reason (exposure_limit/pnl_floor/manual)
pub static RISK_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("mkr_risk_trips_total", "Halt latch trips", &["reason"]).unwrap()
});

// ============================================================================
// Config sync
// ============================================================================

/// Labels: result (fresh/last_known_good/unavailable)
pub static CONFIG_SYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mkr_config_sync_total",
        "Config store sync attempts",
        &["result"]
    )
    .unwrap()
});

const AGENT_STATES: [&str; 6] = [
    "idle",
    "fetching",
    "deciding",
    "submitting",
    "paused",
    "stopped",
];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn step(instrument: &str, outcome: &str) {
        STEPS_TOTAL.with_label_values(&[instrument, outcome]).inc();
    }

    pub fn step_duration(instrument: &str, duration_ms: f64) {
        STEP_DURATION_MS
            .with_label_values(&[instrument])
            .observe(duration_ms);
    }

    pub fn action_submitted(instrument: &str, side: &str, kind: &str) {
        ACTIONS_TOTAL
            .with_label_values(&[instrument, side, kind])
            .inc();
    }

    pub fn submit_failed(instrument: &str, side: &str, error: &str) {
        SUBMIT_FAILURES_TOTAL
            .with_label_values(&[instrument, side, error])
            .inc();
    }

    pub fn fill(instrument: &str, side: &str) {
        FILLS_TOTAL.with_label_values(&[instrument, side]).inc();
    }

    pub fn inventory(instrument: &str, inventory: f64) {
        INVENTORY.with_label_values(&[instrument]).set(inventory);
    }

    /// Only the active state is set to 1.
    pub fn agent_state(instrument: &str, state: &str) {
        for s in AGENT_STATES {
            AGENT_STATE.with_label_values(&[instrument, s]).set(0.0);
        }
        AGENT_STATE.with_label_values(&[instrument, state]).set(1.0);
    }

    /// Drop per-agent series when an agent is removed.
    pub fn agent_removed(instrument: &str) {
        for s in AGENT_STATES {
            let _ = AGENT_STATE.remove_label_values(&[instrument, s]);
        }
        let _ = INVENTORY.remove_label_values(&[instrument]);
    }

    pub fn agents(count: usize) {
        AGENTS.set(count as i64);
    }

    pub fn risk_totals(exposure: f64, pnl: f64) {
        RISK_TOTAL_EXPOSURE.set(exposure);
        RISK_TOTAL_PNL.set(pnl);
    }

    pub fn risk_halted(halted: bool) {
        RISK_HALTED.set(i64::from(halted));
    }

    pub fn risk_trip(reason: &str) {
        RISK_TRIPS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn config_sync(result: &str) {
        CONFIG_SYNC_TOTAL.with_label_values(&[result]).inc();
    }

    /// Render the default registry in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_state_is_one_hot() {
        Metrics::agent_state("test-one-hot", "fetching");
        Metrics::agent_state("test-one-hot", "idle");

        assert_eq!(
            AGENT_STATE.with_label_values(&["test-one-hot", "idle"]).get(),
            1.0
        );
        assert_eq!(
            AGENT_STATE
                .with_label_values(&["test-one-hot", "fetching"])
                .get(),
            0.0
        );
    }

    #[test]
    fn test_gather_text_contains_recorded_series() {
        Metrics::step("test-gather", "completed");
        Metrics::risk_halted(true);

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("mkr_steps_total"));
        assert!(text.contains("mkr_risk_halted 1"));
    }
}
