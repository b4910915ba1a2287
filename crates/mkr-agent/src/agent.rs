//! Single-instrument trader agent.
//!
//! Each step fetches a fresh snapshot, computes the desired quotes, diffs
//! them against the resting orders and submits the difference. Nothing but
//! reporting statistics survives between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mkr_core::{AgentConfig, InstrumentId, MarketSnapshot, OrderId, OrderSide, OwnOrder, Price, Size};
use mkr_gateway::{with_timeout, DynGateway, GatewayError, GatewayResult};
use mkr_persistence::{FillJournal, FillRecord};
use mkr_quote::{compute_quotes, reconcile_pair, ActionPair, HoldReason, QuoteMetrics, QuotePair, ReconcileAction};
use mkr_telemetry::Metrics;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AgentResult;
use crate::state::AgentState;
use crate::stats::{InferredFill, TradeStats};
use crate::status::{AgentStatus, StatsView};

/// Shared journal handle; one journal serves every agent.
pub type SharedJournal = Arc<Mutex<FillJournal>>;

// ============================================================================
// Step report
// ============================================================================

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// Snapshot unavailable; nothing was submitted.
    FetchFailed(String),
    SkippedPaused,
    SkippedStopped,
    /// Previous step still running.
    SkippedInFlight,
    /// Paused between deciding and submitting.
    AbortedPaused,
}

impl StepOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::FetchFailed(_) => "fetch_failed",
            Self::SkippedPaused => "skipped_paused",
            Self::SkippedStopped => "skipped_stopped",
            Self::SkippedInFlight => "skipped_in_flight",
            Self::AbortedPaused => "aborted_paused",
        }
    }
}

/// Result of submitting one side's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Action was NO_OP.
    NotAttempted,
    Succeeded { placed: Option<OrderId> },
    Failed { error: String },
}

impl SubmitOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Everything one step decided and did.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub instrument: InstrumentId,
    pub outcome: StepOutcome,
    pub quotes: Option<QuotePair>,
    pub actions: Option<ActionPair>,
    pub bid: SubmitOutcome,
    pub ask: SubmitOutcome,
    pub strays_cancelled: usize,
    pub fill: Option<InferredFill>,
    pub duration_ms: u64,
}

impl StepReport {
    /// Report for a step that did not reach the deciding phase.
    pub fn skipped(instrument: InstrumentId, outcome: StepOutcome) -> Self {
        Self {
            instrument,
            outcome,
            quotes: None,
            actions: None,
            bid: SubmitOutcome::NotAttempted,
            ask: SubmitOutcome::NotAttempted,
            strays_cancelled: 0,
            fill: None,
            duration_ms: 0,
        }
    }
}

// ============================================================================
// TraderAgent
// ============================================================================

/// Runtime knobs that are not part of the quoting config.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Deadline for each gateway call.
    pub call_timeout: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Quotes one instrument through an [`ExchangeGateway`](mkr_gateway::ExchangeGateway).
pub struct TraderAgent {
    config: AgentConfig,
    gateway: DynGateway,
    options: AgentOptions,
    state: Mutex<AgentState>,
    paused: AtomicBool,
    stopped: AtomicBool,
    /// Held for the whole step; `try_lock` failure means a step is in flight.
    step_guard: tokio::sync::Mutex<()>,
    stats: Mutex<TradeStats>,
    journal: Option<SharedJournal>,
}

impl TraderAgent {
    pub fn new(config: AgentConfig, gateway: DynGateway, options: AgentOptions) -> AgentResult<Self> {
        config.validate()?;
        Metrics::agent_state(config.instrument.as_str(), AgentState::Idle.as_str());
        Ok(Self {
            config,
            gateway,
            options,
            state: Mutex::new(AgentState::Idle),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            step_guard: tokio::sync::Mutex::new(()),
            stats: Mutex::new(TradeStats::new()),
            journal: None,
        })
    }

    pub fn with_journal(mut self, journal: SharedJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.config.instrument
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TradeStats {
        self.stats.lock().clone()
    }

    // === Lifecycle ===

    pub fn pause(&self) {
        if self.is_stopped() {
            return;
        }
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(instrument = %self.instrument(), "Agent paused");
        }
        self.set_state(AgentState::Paused);
    }

    pub fn resume(&self) {
        if self.is_stopped() {
            return;
        }
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(instrument = %self.instrument(), "Agent resumed");
            self.set_state(AgentState::Idle);
        }
    }

    /// Terminal. Later steps are no-ops.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(instrument = %self.instrument(), "Agent stopped");
        }
        self.set_state(AgentState::Stopped);
    }

    /// Wait for an in-flight step to finish.
    pub async fn wait_idle(&self) {
        let _guard = self.step_guard.lock().await;
    }

    fn set_state(&self, state: AgentState) {
        *self.state.lock() = state;
        Metrics::agent_state(self.instrument().as_str(), state.as_str());
    }

    /// Move along the step cycle unless paused or stopped meanwhile.
    fn advance(&self, next: AgentState) {
        let state = if self.is_stopped() {
            AgentState::Stopped
        } else if self.is_paused() {
            AgentState::Paused
        } else {
            next
        };
        self.set_state(state);
    }

    // === Step ===

    /// One fetch → decide → submit cycle.
    ///
    /// Never fails: every error is logged and reflected in the report.
    pub async fn step(&self) -> StepReport {
        let instrument = self.instrument().clone();

        if self.is_stopped() {
            return self.finish(StepReport::skipped(instrument, StepOutcome::SkippedStopped));
        }
        if self.is_paused() {
            return self.finish(StepReport::skipped(instrument, StepOutcome::SkippedPaused));
        }
        let Ok(_guard) = self.step_guard.try_lock() else {
            debug!(instrument = %instrument, "Previous step still running, skipping");
            return self.finish(StepReport::skipped(instrument, StepOutcome::SkippedInFlight));
        };

        let started = Instant::now();
        let mut report = self.run_step(instrument).await;
        report.duration_ms = started.elapsed().as_millis() as u64;

        self.advance(AgentState::Idle);
        Metrics::step_duration(self.instrument().as_str(), report.duration_ms as f64);
        self.finish(report)
    }

    fn finish(&self, report: StepReport) -> StepReport {
        Metrics::step(self.instrument().as_str(), report.outcome.label());
        report
    }

    async fn run_step(&self, instrument: InstrumentId) -> StepReport {
        self.advance(AgentState::Fetching);
        let snapshot = match self.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(instrument = %instrument, error = %e, "Snapshot fetch failed, skipping step");
                return StepReport::skipped(instrument, StepOutcome::FetchFailed(e.to_string()));
            }
        };

        self.advance(AgentState::Deciding);
        let fill = self.observe_fills(&snapshot);
        let quotes = compute_quotes(&snapshot, &self.config);
        let actions = reconcile_pair(&quotes, &snapshot, self.config.order_timeout());

        if self.config.stranded_inventory_warn {
            if let Some(HoldReason::BelowMinimum {
                inventory,
                min_order_size,
            }) = quotes.ask.hold_reason()
            {
                warn!(
                    instrument = %instrument,
                    inventory = %inventory,
                    min_order_size = %min_order_size,
                    "Inventory below exchange minimum, cannot be offered"
                );
            }
        }

        debug!(
            instrument = %instrument,
            best_bid = %snapshot.best_bid,
            best_ask = %snapshot.best_ask,
            inventory = %snapshot.inventory,
            bid = %quotes.bid,
            ask = %quotes.ask,
            bid_action = %actions.bid,
            ask_action = %actions.ask,
            "Step decided"
        );

        let mut report = StepReport {
            instrument: instrument.clone(),
            outcome: StepOutcome::Completed,
            quotes: Some(quotes),
            actions: Some(actions.clone()),
            bid: SubmitOutcome::NotAttempted,
            ask: SubmitOutcome::NotAttempted,
            strays_cancelled: 0,
            fill,
            duration_ms: 0,
        };

        if self.is_paused() || self.is_stopped() {
            info!(instrument = %instrument, "Paused before submit, dropping decided actions");
            report.outcome = StepOutcome::AbortedPaused;
            return report;
        }

        self.advance(AgentState::Submitting);
        let ((bid, bid_resting), (ask, ask_resting)) = tokio::join!(
            self.execute(OrderSide::Buy, &actions.bid, snapshot.own_bid.as_ref()),
            self.execute(OrderSide::Sell, &actions.ask, snapshot.own_ask.as_ref()),
        );
        report.bid = bid;
        report.ask = ask;
        report.strays_cancelled = self.cancel_strays(&snapshot.stray_orders).await;

        self.stats.lock().set_resting(bid_resting, ask_resting);
        report
    }

    async fn fetch(&self) -> GatewayResult<MarketSnapshot> {
        with_timeout(
            "fetch_snapshot",
            self.options.call_timeout,
            self.gateway.fetch_snapshot(self.instrument()),
        )
        .await
    }

    fn observe_fills(&self, snapshot: &MarketSnapshot) -> Option<InferredFill> {
        let instrument = self.instrument().as_str();
        if let Some(inventory) = snapshot.inventory.inner().to_f64() {
            Metrics::inventory(instrument, inventory);
        }

        let fill = self
            .stats
            .lock()
            .observe(snapshot.inventory, snapshot.mid_price())?;

        Metrics::fill(instrument, &fill.side.to_string());
        info!(
            instrument = %instrument,
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            realized_pnl = %fill.realized_pnl,
            "Fill inferred from inventory change"
        );

        if let Some(journal) = &self.journal {
            let record = FillRecord {
                timestamp_ms: snapshot.fetched_at.timestamp_millis(),
                agent: self.config.label().to_string(),
                instrument: self.instrument().clone(),
                side: fill.side,
                price: fill.price,
                size: fill.size,
                realized_pnl: fill.realized_pnl,
            };
            if let Err(e) = journal.lock().record(record) {
                warn!(instrument = %instrument, ?e, "Failed to journal fill");
            }
        }
        Some(fill)
    }

    /// Submit one side. Returns the outcome and the price left resting.
    async fn execute(
        &self,
        side: OrderSide,
        action: &ReconcileAction,
        own: Option<&OwnOrder>,
    ) -> (SubmitOutcome, Option<Price>) {
        let own_price = own.map(|o| o.price);
        let instrument = self.instrument().as_str();
        let side_label = side.to_string();

        let result = match action {
            ReconcileAction::NoOp => return (SubmitOutcome::NotAttempted, own_price),
            _ => {
                Metrics::action_submitted(instrument, &side_label, action.kind());
                self.submit(side, action, own_price).await
            }
        };

        match result {
            Ok((placed, resting)) => {
                info!(
                    instrument = %instrument,
                    side = %side,
                    action = %action,
                    placed = ?placed,
                    "Action submitted"
                );
                (SubmitOutcome::Succeeded { placed }, resting)
            }
            Err((e, resting)) => {
                warn!(
                    instrument = %instrument,
                    side = %side,
                    action = %action,
                    error = %e,
                    "Submission failed, next step will reconcile"
                );
                Metrics::submit_failed(instrument, &side_label, e.label());
                (
                    SubmitOutcome::Failed {
                        error: e.to_string(),
                    },
                    resting,
                )
            }
        }
    }

    async fn submit(
        &self,
        side: OrderSide,
        action: &ReconcileAction,
        own_price: Option<Price>,
    ) -> Result<(Option<OrderId>, Option<Price>), (GatewayError, Option<Price>)> {
        match action {
            ReconcileAction::NoOp => Ok((None, own_price)),
            ReconcileAction::Cancel { order_id } => match self.cancel(order_id).await {
                Ok(()) => Ok((None, None)),
                Err(e) => Err((e, own_price)),
            },
            ReconcileAction::Place { price, size } => match self.place(side, *price, *size).await {
                Ok(id) => Ok((Some(id), Some(*price))),
                Err(e) => Err((e, None)),
            },
            ReconcileAction::CancelAndReplace {
                order_id,
                price,
                size,
            } => self.cancel_and_replace(side, order_id, *price, *size, own_price).await,
        }
    }

    /// Cancel, wait for a sell to unlock, then place. A failed cancel skips
    /// the place.
    async fn cancel_and_replace(
        &self,
        side: OrderSide,
        order_id: &OrderId,
        price: Price,
        size: Size,
        own_price: Option<Price>,
    ) -> Result<(Option<OrderId>, Option<Price>), (GatewayError, Option<Price>)> {
        self.cancel(order_id).await.map_err(|e| (e, own_price))?;

        if side == OrderSide::Sell {
            let delay = self.gateway.sell_unlock_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match self.place(side, price, size).await {
            Ok(id) => Ok((Some(id), Some(price))),
            Err(e) => Err((e, None)),
        }
    }

    async fn place(&self, side: OrderSide, price: Price, size: Size) -> GatewayResult<OrderId> {
        with_timeout(
            "place",
            self.options.call_timeout,
            self.gateway.place(self.instrument(), side, price, size),
        )
        .await
    }

    async fn cancel(&self, order_id: &OrderId) -> GatewayResult<()> {
        with_timeout(
            "cancel",
            self.options.call_timeout,
            self.gateway.cancel(order_id),
        )
        .await
    }

    /// Cancel extra orders beyond one per side.
    async fn cancel_strays(&self, strays: &[OwnOrder]) -> usize {
        let mut cancelled = 0;
        for order in strays {
            match self.cancel(&order.order_id).await {
                Ok(()) => {
                    cancelled += 1;
                    debug!(instrument = %self.instrument(), order_id = %order.order_id, "Stray order cancelled");
                }
                Err(e) => {
                    warn!(instrument = %self.instrument(), order_id = %order.order_id, error = %e, "Failed to cancel stray order");
                    Metrics::submit_failed(self.instrument().as_str(), &order.side.to_string(), e.label());
                }
            }
        }
        cancelled
    }

    // === Status ===

    /// Fresh read-only view, computed like a step would.
    pub async fn status(&self) -> AgentResult<AgentStatus> {
        let snapshot = self.fetch().await?;
        let metrics = QuoteMetrics::compute(&snapshot, &self.config);
        let quotes = compute_quotes(&snapshot, &self.config);
        let stats = self.stats();
        let mid = snapshot.mid_price();
        let unrealized_pnl = stats.unrealized_pnl(mid);

        Ok(AgentStatus {
            instrument: self.instrument().clone(),
            name: self.config.label().to_string(),
            state: self.state(),
            paused: self.is_paused(),
            inventory: snapshot.inventory,
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            mid,
            spread: metrics.spread,
            effective_spread: metrics.effective_spread,
            balance: metrics.balance,
            exposure: snapshot.exposure(),
            bid_plan: quotes.bid,
            ask_plan: quotes.ask,
            open_orders: snapshot.open_orders().cloned().collect(),
            stats: StatsView::from(&stats),
            unrealized_pnl,
            total_pnl: stats.realized_pnl + unrealized_pnl,
            fetched_at: snapshot.fetched_at,
        })
    }

    /// Cancel every resting order of this agent. Returns how many were
    /// cancelled.
    pub async fn cancel_open_orders(&self) -> AgentResult<usize> {
        let snapshot = self.fetch().await?;
        let orders: Vec<OwnOrder> = snapshot.open_orders().cloned().collect();
        let cancelled = self.cancel_strays(&orders).await;
        info!(
            instrument = %self.instrument(),
            cancelled,
            total = orders.len(),
            "Open orders cancelled"
        );
        Ok(cancelled)
    }
}
