//! Manager integration tests.
//!
//! Covers the manager schedules end to end:
//! - step cycles against the paper exchange
//! - risk trip, halt and reset
//! - config sync, including store failures
//! - shutdown

mod integration;
use integration::common::{agent_config, inst, p, s, seed, Harness};

use std::time::Duration;

use mkr_agent::{AgentState, StepOutcome, SubmitOutcome};
use mkr_bot::{AppError, ManagerConfig};
use mkr_core::{BookLevel, OrderSide};
use mkr_gateway::PaperCall;
use mkr_risk::{HaltReason, RiskLimits, RiskVerdict};
use mkr_store::{AgentStatusFlag, StoredAgent};
use rust_decimal_macros::dec;

fn tight_limits() -> RiskLimits {
    RiskLimits {
        max_total_exposure: dec!(1000),
        ..RiskLimits::default()
    }
}

// ============================================================================
// Steps
// ============================================================================

#[tokio::test]
async fn test_initial_sync_creates_agents() {
    let mut h = Harness::new(&["rain", "snow"], RiskLimits::default());

    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.result, "fresh");
    assert_eq!(summary.added, 2);
    assert_eq!(h.manager.agent_count(), 2);
    assert_eq!(h.manager.instruments(), vec![inst("rain"), inst("snow")]);
}

#[tokio::test]
async fn test_cycle_places_bid_for_every_agent() {
    let mut h = Harness::new(&["rain", "snow"], RiskLimits::default());
    h.manager.sync_configs().await;

    let reports = h.manager.run_cycle().await;

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.outcome, StepOutcome::Completed);
        assert!(matches!(report.bid, SubmitOutcome::Succeeded { placed: Some(_) }));
        assert_eq!(report.ask, SubmitOutcome::NotAttempted);
    }

    let resting = h.exchange.resting_orders(&inst("rain"));
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].side, OrderSide::Buy);
    assert_eq!(resting[0].price, p(dec!(46)));
    assert_eq!(resting[0].size, s(dec!(50)));
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;
    h.manager.run_cycle().await;
    let places = h.places();

    let reports = h.manager.run_cycle().await;

    assert_eq!(reports[0].outcome, StepOutcome::Completed);
    assert_eq!(reports[0].bid, SubmitOutcome::NotAttempted);
    assert_eq!(h.places(), places);
}

#[tokio::test]
async fn test_fetch_failure_skips_only_that_step() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;
    h.exchange.fail_next_fetches(1);

    let reports = h.manager.run_cycle().await;
    assert!(matches!(reports[0].outcome, StepOutcome::FetchFailed(_)));
    assert_eq!(h.places(), 0);

    let reports = h.manager.run_cycle().await;
    assert_eq!(reports[0].outcome, StepOutcome::Completed);
    assert_eq!(h.places(), 1);
}

#[tokio::test]
async fn test_slow_step_is_never_overlapped() {
    let config = ManagerConfig {
        step_timeout_ms: 50,
        ..integration::common::fast_manager_config()
    };
    let mut h = Harness::with_config(&["rain"], RiskLimits::default(), config);
    h.manager.sync_configs().await;
    h.exchange.set_latency(Duration::from_millis(300));

    // Step outlives the cycle deadline and is not reported.
    let reports = h.manager.run_cycle().await;
    assert!(reports.is_empty());

    let reports = h.manager.run_cycle().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, StepOutcome::SkippedInFlight);

    // Fetch + place at 300ms each.
    tokio::time::sleep(Duration::from_millis(700)).await;
    h.exchange.set_latency(Duration::ZERO);

    let reports = h.manager.run_cycle().await;
    assert_eq!(reports[0].outcome, StepOutcome::Completed);
    // Only the first step placed; the fresh one sees its order.
    assert_eq!(h.places(), 1);
}

// ============================================================================
// Risk
// ============================================================================

#[tokio::test]
async fn test_risk_trip_pauses_all_agents() {
    let mut h = Harness::new(&["rain", "snow"], tight_limits());
    h.manager.sync_configs().await;
    // 100 * mid 47.5 = 4750 > 1000
    h.exchange.set_inventory(&inst("rain"), s(dec!(100)));

    let verdict = h.manager.evaluate_risk().await;

    assert!(matches!(
        verdict,
        RiskVerdict::Tripped(HaltReason::ExposureLimit { .. })
    ));
    assert!(h.manager.risk().is_halted());
    for id in ["rain", "snow"] {
        let agent = h.manager.agent(&inst(id)).unwrap();
        assert!(agent.is_paused());
        assert_eq!(agent.state(), AgentState::Paused);
    }
}

#[tokio::test]
async fn test_steps_are_noops_until_reset() {
    let mut h = Harness::new(&["rain"], tight_limits());
    h.manager.sync_configs().await;
    h.exchange.set_inventory(&inst("rain"), s(dec!(100)));
    h.manager.evaluate_risk().await;
    h.exchange.clear_calls();

    for _ in 0..3 {
        let reports = h.manager.run_cycle().await;
        assert_eq!(reports[0].outcome, StepOutcome::SkippedPaused);
    }
    assert!(h.exchange.calls().is_empty());

    // Still over the cap: stays halted, no automatic recovery.
    let verdict = h.manager.evaluate_risk().await;
    assert!(matches!(verdict, RiskVerdict::Halted(_)));
    assert!(matches!(
        h.manager.resume_all(),
        Err(AppError::Halted(_))
    ));

    h.exchange.set_inventory(&inst("rain"), s(dec!(10)));
    let previous = h.manager.reset_risk();
    assert!(matches!(previous, Some(HaltReason::ExposureLimit { .. })));
    assert!(!h.manager.agent(&inst("rain")).unwrap().is_paused());

    let reports = h.manager.run_cycle().await;
    assert_eq!(reports[0].outcome, StepOutcome::Completed);
}

#[tokio::test]
async fn test_breach_without_emergency_pause_keeps_quoting() {
    let limits = RiskLimits {
        enable_emergency_pause: false,
        ..tight_limits()
    };
    let mut h = Harness::new(&["rain"], limits);
    h.manager.sync_configs().await;
    h.exchange.set_inventory(&inst("rain"), s(dec!(100)));

    let verdict = h.manager.evaluate_risk().await;

    assert!(matches!(verdict, RiskVerdict::Breached(_)));
    assert!(!h.manager.risk().is_halted());
    assert!(!h.manager.agent(&inst("rain")).unwrap().is_paused());
}

#[tokio::test]
async fn test_halt_cancels_orders_when_configured() {
    let limits = RiskLimits {
        cancel_orders_on_halt: true,
        ..tight_limits()
    };
    let mut h = Harness::new(&["rain"], limits);
    h.manager.sync_configs().await;
    h.manager.run_cycle().await;
    assert_eq!(h.exchange.resting_orders(&inst("rain")).len(), 1);

    h.manager.halt("operator".to_string()).await;

    assert!(h.manager.agent(&inst("rain")).unwrap().is_paused());
    assert!(h.exchange.resting_orders(&inst("rain")).is_empty());
}

#[tokio::test]
async fn test_failed_status_keeps_previous_contribution() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;
    h.exchange.set_inventory(&inst("rain"), s(dec!(10)));
    h.manager.evaluate_risk().await;
    let before = h.manager.risk().state();
    assert_eq!(before.total_exposure, dec!(475));

    h.exchange.fail_next_fetches(1);
    let verdict = h.manager.evaluate_risk().await;

    assert_eq!(verdict, RiskVerdict::Clear);
    let after = h.manager.risk().state();
    assert_eq!(after.total_exposure, dec!(475));
    assert!(after.version > before.version);
}

#[tokio::test]
async fn test_agent_added_while_halted_starts_paused() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;
    h.manager.halt("maintenance".to_string()).await;

    h.store.upsert(StoredAgent::active(agent_config("snow")));
    seed(&h.exchange, "snow", dec!(0));
    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.added, 1);
    assert!(h.manager.agent(&inst("snow")).unwrap().is_paused());
    assert!(matches!(
        h.manager.resume_agent(&inst("snow")),
        Err(AppError::Halted(_))
    ));
}

// ============================================================================
// Config sync
// ============================================================================

#[tokio::test]
async fn test_store_failure_keeps_last_known_good() {
    let mut h = Harness::new(&["rain", "snow"], RiskLimits::default());
    h.manager.sync_configs().await;

    h.store.set_agents(Vec::new());
    h.store.fail_next_loads(1);
    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.result, "last_known_good");
    assert!(!summary.changed());
    assert_eq!(h.manager.agent_count(), 2);
}

#[tokio::test]
async fn test_store_unavailable_at_startup_runs_nothing() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.store.fail_next_loads(1);

    let summary = h.manager.sync_configs().await;
    assert_eq!(summary.result, "unavailable");
    assert_eq!(h.manager.agent_count(), 0);

    let summary = h.manager.sync_configs().await;
    assert_eq!(summary.result, "fresh");
    assert_eq!(h.manager.agent_count(), 1);
}

#[tokio::test]
async fn test_sync_adds_removes_and_pauses() {
    let mut h = Harness::new(&["rain", "snow"], RiskLimits::default());
    h.manager.sync_configs().await;

    h.store.remove(&inst("snow"));
    h.store.upsert(StoredAgent::paused(agent_config("wind")));
    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.removed, 1);
    assert_eq!(summary.added, 1);
    assert_eq!(summary.paused, 1);
    assert!(h.manager.agent(&inst("snow")).is_none());
    assert!(h.manager.agent(&inst("wind")).unwrap().is_paused());

    h.store.set_status(&inst("wind"), AgentStatusFlag::Active);
    let summary = h.manager.sync_configs().await;
    assert_eq!(summary.resumed, 1);
    assert!(!h.manager.agent(&inst("wind")).unwrap().is_paused());
}

#[tokio::test]
async fn test_store_paused_agent_stays_paused_on_resume_all() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.store.upsert(StoredAgent::paused(agent_config("wind")));
    h.manager.sync_configs().await;
    h.manager.pause_all();

    let resumed = h.manager.resume_all().unwrap();

    assert_eq!(resumed, 1);
    assert!(!h.manager.agent(&inst("rain")).unwrap().is_paused());
    assert!(h.manager.agent(&inst("wind")).unwrap().is_paused());
}

#[tokio::test]
async fn test_changed_config_replaces_agent() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;
    let old = h.manager.agent(&inst("rain")).unwrap();

    let mut changed = agent_config("rain");
    changed.max_inventory = s(dec!(20));
    h.store.upsert(StoredAgent::active(changed.clone()));
    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.replaced, 1);
    assert!(old.is_stopped());
    let new = h.manager.agent(&inst("rain")).unwrap();
    assert_eq!(new.config(), &changed);

    let reports = h.manager.run_cycle().await;
    assert_eq!(reports[0].outcome, StepOutcome::Completed);
    assert_eq!(h.exchange.resting_orders(&inst("rain"))[0].size, s(dec!(20)));
}

#[tokio::test]
async fn test_replacement_waits_for_old_step() {
    let config = ManagerConfig {
        step_timeout_ms: 120,
        ..integration::common::fast_manager_config()
    };
    let mut h = Harness::with_config(&["rain"], RiskLimits::default(), config);
    h.manager.sync_configs().await;
    h.manager.run_cycle().await;

    // Outbid at 47: the resting bid needs a cancel and a place.
    h.exchange.set_levels(
        &inst("rain"),
        vec![BookLevel::new(p(dec!(47)), s(dec!(10)))],
        vec![BookLevel::new(p(dec!(50)), s(dec!(100)))],
    );
    h.exchange.set_latency(Duration::from_millis(100));
    assert!(h.manager.run_cycle().await.is_empty());

    let mut changed = agent_config("rain");
    changed.max_inventory = s(dec!(20));
    h.store.upsert(StoredAgent::active(changed));
    let summary = h.manager.sync_configs().await;
    assert_eq!(summary.replaced, 1);

    // The old step is still placing; the new agent must not start.
    h.exchange.clear_calls();
    let reports = h.manager.run_cycle().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, StepOutcome::SkippedInFlight);
    assert!(!h
        .exchange
        .calls()
        .iter()
        .any(|c| matches!(c, PaperCall::Fetch(_))));

    tokio::time::sleep(Duration::from_millis(400)).await;
    h.exchange.set_latency(Duration::ZERO);
    let reports = h.manager.run_cycle().await;
    assert_eq!(reports[0].outcome, StepOutcome::Completed);
    // The old step's replacement bid is the only order; the new agent
    // adopted it instead of racing it.
    let resting = h.exchange.resting_orders(&inst("rain"));
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].price, p(dec!(48)));
}

#[tokio::test]
async fn test_unchanged_sync_is_quiet() {
    let mut h = Harness::new(&["rain"], RiskLimits::default());
    h.manager.sync_configs().await;

    let summary = h.manager.sync_configs().await;

    assert_eq!(summary.result, "fresh");
    assert!(!summary.changed());
}

#[tokio::test]
async fn test_unknown_agent_commands_fail() {
    let h = Harness::new(&["rain"], RiskLimits::default());
    assert!(matches!(
        h.manager.pause_agent(&inst("rain")),
        Err(AppError::UnknownAgent(_))
    ));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_cancels_resting_orders() {
    let mut h = Harness::new(&["rain", "snow"], RiskLimits::default());
    h.manager.sync_configs().await;
    h.manager.run_cycle().await;
    let rain = h.manager.agent(&inst("rain")).unwrap();

    h.manager.shutdown().await;

    assert!(rain.is_stopped());
    assert_eq!(h.manager.agent_count(), 0);
    assert!(h.exchange.resting_orders(&inst("rain")).is_empty());
    assert!(h.exchange.resting_orders(&inst("snow")).is_empty());
    assert!(h
        .exchange
        .calls()
        .iter()
        .any(|c| matches!(c, PaperCall::Cancel(_))));
}

#[tokio::test]
async fn test_shutdown_leaves_orders_unless_configured() {
    let config = ManagerConfig {
        cancel_on_shutdown: false,
        ..integration::common::fast_manager_config()
    };
    let mut h = Harness::with_config(&["rain"], RiskLimits::default(), config);
    h.manager.sync_configs().await;
    h.manager.run_cycle().await;
    let rain = h.manager.agent(&inst("rain")).unwrap();

    h.manager.shutdown().await;

    assert!(rain.is_stopped());
    assert_eq!(h.manager.agent_count(), 0);
    assert_eq!(h.exchange.resting_orders(&inst("rain")).len(), 1);
    assert!(!h
        .exchange
        .calls()
        .iter()
        .any(|c| matches!(c, PaperCall::Cancel(_))));
}

#[tokio::test]
async fn test_run_loop_obeys_handle() {
    let h = Harness::new(&["rain"], tight_limits());
    let exchange = h.exchange.clone();
    let mut manager = h.manager;
    let handle = manager.handle();
    let risk = manager.risk().clone();

    let task = tokio::spawn(async move {
        manager.run().await.unwrap();
        manager
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(exchange.resting_orders(&inst("rain")).len(), 1);

    handle.halt("drill").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(risk.is_halted());

    handle.reset_risk().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!risk.is_halted());

    handle.shutdown();
    let manager = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.agent_count(), 0);
    assert!(exchange.resting_orders(&inst("rain")).is_empty());
}
