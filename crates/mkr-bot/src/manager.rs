//! Agent manager.
//!
//! Owns the agents and runs four schedules from one `tokio::select!` loop:
//! steps, risk evaluation, config sync and the status report. Operator
//! commands arrive through a [`ManagerHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use mkr_agent::{
    AgentOptions, AgentResult, AgentStatus, SharedJournal, StepOutcome, StepReport, TraderAgent,
};
use mkr_core::{AgentConfig, InstrumentId};
use mkr_gateway::DynGateway;
use mkr_risk::{AgentExposure, HaltReason, RiskSupervisor, RiskVerdict};
use mkr_store::{AgentStatusFlag, ConfigSync, DynConfigStore, SyncOutcome};
use mkr_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::{AppError, AppResult};

/// Operator command queue depth.
const COMMAND_BUFFER: usize = 16;

// ============================================================================
// Handle
// ============================================================================

/// Operator commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCommand {
    /// Clear the halt latch and resume agents not paused by the store.
    ResetRisk,
    PauseAll,
    ResumeAll,
    /// Trip the halt latch by hand.
    Halt(String),
}

/// Cloneable control surface of a running [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
    cancel: CancellationToken,
}

impl ManagerHandle {
    pub async fn send(&self, command: ManagerCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Shutdown)
    }

    pub async fn reset_risk(&self) -> AppResult<()> {
        self.send(ManagerCommand::ResetRisk).await
    }

    pub async fn pause_all(&self) -> AppResult<()> {
        self.send(ManagerCommand::PauseAll).await
    }

    pub async fn resume_all(&self) -> AppResult<()> {
        self.send(ManagerCommand::ResumeAll).await
    }

    pub async fn halt(&self, message: impl Into<String>) -> AppResult<()> {
        self.send(ManagerCommand::Halt(message.into())).await
    }

    /// Stop the run loop. The manager shuts its agents down before
    /// `run` returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Changes applied by one config sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// `fresh`, `last_known_good` or `unavailable`.
    pub result: &'static str,
    pub added: usize,
    pub removed: usize,
    pub replaced: usize,
    pub paused: usize,
    pub resumed: usize,
}

impl SyncSummary {
    pub fn changed(&self) -> bool {
        self.added + self.removed + self.replaced + self.paused + self.resumed > 0
    }
}

struct AgentSlot {
    agent: Arc<TraderAgent>,
    /// Step task still owned by the manager.
    inflight: Option<JoinHandle<StepReport>>,
    /// Paused by its store row rather than by an operator or the risk latch.
    store_paused: bool,
}

pub struct Manager {
    config: ManagerConfig,
    gateway: DynGateway,
    risk: Arc<RiskSupervisor>,
    sync: ConfigSync,
    journal: Option<SharedJournal>,
    report_metrics: bool,
    agents: BTreeMap<InstrumentId, AgentSlot>,
    handle: ManagerHandle,
    commands: Option<mpsc::Receiver<ManagerCommand>>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        gateway: DynGateway,
        store: DynConfigStore,
        risk: Arc<RiskSupervisor>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let sync = ConfigSync::new(store, config.store_timeout());
        Self {
            config,
            gateway,
            risk,
            sync,
            journal: None,
            report_metrics: false,
            agents: BTreeMap::new(),
            handle: ManagerHandle {
                commands: tx,
                cancel: CancellationToken::new(),
            },
            commands: Some(rx),
        }
    }

    /// Journal fills of every agent created from now on.
    pub fn with_journal(mut self, journal: SharedJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_metrics_report(mut self, enabled: bool) -> Self {
        self.report_metrics = enabled;
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    pub fn risk(&self) -> &Arc<RiskSupervisor> {
        &self.risk
    }

    pub fn agent(&self, instrument: &InstrumentId) -> Option<Arc<TraderAgent>> {
        self.agents.get(instrument).map(|slot| Arc::clone(&slot.agent))
    }

    pub fn instruments(&self) -> Vec<InstrumentId> {
        self.agents.keys().cloned().collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // === Agents ===

    /// Create and register an agent. It starts paused while trading is
    /// halted.
    pub fn add_agent(&mut self, config: AgentConfig) -> AppResult<()> {
        if self.agents.contains_key(&config.instrument) {
            return Err(AppError::Config(format!(
                "agent for {} already exists",
                config.instrument
            )));
        }

        let options = AgentOptions {
            call_timeout: self.config.call_timeout(),
        };
        let mut agent = TraderAgent::new(config, Arc::clone(&self.gateway), options)?;
        if let Some(journal) = &self.journal {
            agent = agent.with_journal(Arc::clone(journal));
        }
        if self.risk.is_halted() {
            agent.pause();
        }

        let instrument = agent.instrument().clone();
        info!(
            instrument = %instrument,
            name = %agent.config().label(),
            max_inventory = %agent.config().max_inventory,
            spread_threshold = %agent.config().spread_threshold,
            price_improvement = %agent.config().price_improvement,
            "Agent added"
        );
        self.agents.insert(
            instrument,
            AgentSlot {
                agent: Arc::new(agent),
                inflight: None,
                store_paused: false,
            },
        );
        Metrics::agents(self.agents.len());
        Ok(())
    }

    /// Stop and drop an agent. An in-flight step finishes on its own; its
    /// resting orders stay with the exchange.
    pub fn remove_agent(&mut self, instrument: &InstrumentId) -> bool {
        self.take_agent(instrument).is_some()
    }

    fn take_agent(&mut self, instrument: &InstrumentId) -> Option<AgentSlot> {
        let slot = self.agents.remove(instrument)?;
        slot.agent.stop();
        self.risk.forget(instrument);
        Metrics::agent_removed(instrument.as_str());
        Metrics::agents(self.agents.len());
        info!(instrument = %instrument, "Agent removed");
        Some(slot)
    }

    /// Stop the old agent, let its step drain, then start one with the new
    /// config. Two agents never step the same instrument at once: if the old
    /// step outlives the step timeout, the new agent is skipped as in flight
    /// until it ends.
    async fn replace_agent(&mut self, config: AgentConfig) -> AppResult<()> {
        let Some(old) = self.take_agent(&config.instrument) else {
            return self.add_agent(config);
        };

        let drained =
            tokio::time::timeout(self.config.step_timeout(), old.agent.wait_idle()).await;
        let instrument = config.instrument.clone();
        self.add_agent(config)?;

        if drained.is_err() {
            warn!(
                instrument = %instrument,
                "Old agent still stepping after step timeout, new agent waits for it"
            );
            let old_agent = old.agent;
            let pending = instrument.clone();
            let predecessor = tokio::spawn(async move {
                old_agent.wait_idle().await;
                StepReport::skipped(pending, StepOutcome::SkippedStopped)
            });
            if let Some(slot) = self.agents.get_mut(&instrument) {
                slot.inflight = Some(predecessor);
            }
        }
        Ok(())
    }

    pub fn pause_agent(&self, instrument: &InstrumentId) -> AppResult<()> {
        let slot = self
            .agents
            .get(instrument)
            .ok_or_else(|| AppError::UnknownAgent(instrument.to_string()))?;
        slot.agent.pause();
        Ok(())
    }

    /// Refused while trading is halted.
    pub fn resume_agent(&self, instrument: &InstrumentId) -> AppResult<()> {
        self.ensure_not_halted()?;
        let slot = self
            .agents
            .get(instrument)
            .ok_or_else(|| AppError::UnknownAgent(instrument.to_string()))?;
        slot.agent.resume();
        Ok(())
    }

    /// Returns the number of agents paused.
    pub fn pause_all(&self) -> usize {
        for slot in self.agents.values() {
            slot.agent.pause();
        }
        info!(agents = self.agents.len(), "All agents paused");
        self.agents.len()
    }

    /// Resume every agent not paused by its store row. Refused while
    /// trading is halted.
    pub fn resume_all(&self) -> AppResult<usize> {
        self.ensure_not_halted()?;
        Ok(self.resume_unheld())
    }

    fn resume_unheld(&self) -> usize {
        let mut resumed = 0;
        for slot in self.agents.values().filter(|slot| !slot.store_paused) {
            slot.agent.resume();
            resumed += 1;
        }
        info!(resumed, "Agents resumed");
        resumed
    }

    fn ensure_not_halted(&self) -> AppResult<()> {
        match self.risk.halt_reason() {
            Some(reason) => Err(AppError::Halted(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Fresh status of every agent, in instrument order.
    pub async fn statuses(&self) -> Vec<(InstrumentId, AgentResult<AgentStatus>)> {
        let agents: Vec<Arc<TraderAgent>> = self
            .agents
            .values()
            .map(|slot| Arc::clone(&slot.agent))
            .collect();

        join_all(agents.iter().map(|agent| async move {
            (agent.instrument().clone(), agent.status().await)
        }))
        .await
    }

    // === Steps ===

    /// Step every agent concurrently and wait up to the step timeout.
    ///
    /// An agent whose previous step is still running is skipped. A step
    /// that outlives the timeout keeps running and is not reported.
    pub async fn run_cycle(&mut self) -> Vec<StepReport> {
        let deadline = Instant::now() + self.config.step_timeout();
        let mut reports = Vec::with_capacity(self.agents.len());
        let mut launched = Vec::with_capacity(self.agents.len());

        for (instrument, slot) in self.agents.iter_mut() {
            if let Some(previous) = slot.inflight.take() {
                if !previous.is_finished() {
                    debug!(instrument = %instrument, "Previous step still running, skipping");
                    slot.inflight = Some(previous);
                    Metrics::step(instrument.as_str(), StepOutcome::SkippedInFlight.label());
                    reports.push(StepReport::skipped(
                        instrument.clone(),
                        StepOutcome::SkippedInFlight,
                    ));
                    continue;
                }
                debug!(instrument = %instrument, "Late step finished after timeout");
            }

            let agent = Arc::clone(&slot.agent);
            slot.inflight = Some(tokio::spawn(async move { agent.step().await }));
            launched.push(instrument.clone());
        }

        for instrument in launched {
            let Some(slot) = self.agents.get_mut(&instrument) else {
                continue;
            };
            let Some(task) = slot.inflight.as_mut() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(report)) => {
                    slot.inflight = None;
                    reports.push(report);
                }
                Ok(Err(e)) => {
                    slot.inflight = None;
                    error!(instrument = %instrument, ?e, "Agent step task failed");
                }
                Err(_) => {
                    warn!(
                        instrument = %instrument,
                        step_timeout_ms = self.config.step_timeout_ms,
                        "Agent step exceeded step timeout, still in flight"
                    );
                }
            }
        }

        reports
    }

    // === Risk ===

    /// Fold fresh statuses into the risk state and act on the verdict.
    ///
    /// An agent whose status cannot be fetched keeps its previous
    /// contribution.
    pub async fn evaluate_risk(&mut self) -> RiskVerdict {
        let updates: Vec<AgentExposure> = self
            .statuses()
            .await
            .into_iter()
            .filter_map(|(instrument, result)| match result {
                Ok(status) => Some(AgentExposure {
                    instrument,
                    exposure: status.exposure,
                    pnl: status.total_pnl,
                }),
                Err(e) => {
                    warn!(
                        instrument = %instrument,
                        error = %e,
                        "Status unavailable, keeping previous risk contribution"
                    );
                    None
                }
            })
            .collect();

        let verdict = self.risk.evaluate(updates);
        let state = self.risk.state();
        Metrics::risk_totals(
            state.total_exposure.to_f64().unwrap_or_default(),
            state.total_pnl.to_f64().unwrap_or_default(),
        );

        match &verdict {
            RiskVerdict::Clear => {}
            RiskVerdict::Breached(reason) => {
                warn!(reason = %reason, "Risk limit breached, emergency pause disabled");
            }
            RiskVerdict::Tripped(reason) => {
                Metrics::risk_trip(reason.label());
                self.enforce_halt(reason).await;
            }
            RiskVerdict::Halted(_) => {
                // Agents added since the trip must stay quiet too.
                for slot in self.agents.values() {
                    slot.agent.pause();
                }
            }
        }
        Metrics::risk_halted(self.risk.is_halted());
        verdict
    }

    /// Operator halt.
    pub async fn halt(&mut self, message: String) {
        if self.risk.halt(message) {
            if let Some(reason) = self.risk.halt_reason() {
                Metrics::risk_trip(reason.label());
                self.enforce_halt(&reason).await;
            }
            Metrics::risk_halted(true);
        }
    }

    async fn enforce_halt(&mut self, reason: &HaltReason) {
        error!(
            reason = %reason,
            agents = self.agents.len(),
            "Risk halt: pausing all agents until operator reset"
        );
        self.pause_all();

        if self.risk.limits().cancel_orders_on_halt {
            let cancelled = self.cancel_all_orders().await;
            warn!(cancelled, "Resting orders cancelled on halt");
        }
    }

    /// Clear the halt latch and resume agents not paused by the store.
    pub fn reset_risk(&mut self) -> Option<HaltReason> {
        let previous = self.risk.reset()?;
        Metrics::risk_halted(false);
        let resumed = self.resume_unheld();
        info!(previous = %previous, resumed, "Risk halt reset");
        Some(previous)
    }

    /// Wait for in-flight steps, then cancel every agent's resting orders.
    async fn cancel_all_orders(&mut self) -> usize {
        self.drain_inflight().await;

        let agents: Vec<Arc<TraderAgent>> = self
            .agents
            .values()
            .map(|slot| Arc::clone(&slot.agent))
            .collect();
        let results = join_all(agents.iter().map(|agent| agent.cancel_open_orders())).await;

        let mut cancelled = 0;
        for (agent, result) in agents.iter().zip(results) {
            match result {
                Ok(n) => cancelled += n,
                Err(e) => warn!(instrument = %agent.instrument(), error = %e, "Failed to cancel open orders"),
            }
        }
        cancelled
    }

    async fn drain_inflight(&mut self) {
        let deadline = Instant::now() + self.config.step_timeout();
        for (instrument, slot) in self.agents.iter_mut() {
            if let Some(task) = slot.inflight.take() {
                if tokio::time::timeout_at(deadline, task).await.is_err() {
                    warn!(instrument = %instrument, "Step still running after step timeout");
                }
            }
        }
    }

    // === Config sync ===

    /// Reload agent configs and reconcile the running agents with them.
    ///
    /// Only a fresh load changes anything; when the store fails the agents
    /// in force are the last-known-good set and are left as they are.
    pub async fn sync_configs(&mut self) -> SyncSummary {
        let outcome = self.sync.refresh().await;
        let mut summary = SyncSummary {
            result: sync_result(&outcome),
            ..SyncSummary::default()
        };
        Metrics::config_sync(summary.result);

        let SyncOutcome::Fresh(rows) = outcome else {
            return summary;
        };

        let desired: BTreeMap<InstrumentId, _> = rows
            .into_iter()
            .map(|row| (row.config.instrument.clone(), row))
            .collect();

        let gone: Vec<InstrumentId> = self
            .agents
            .keys()
            .filter(|instrument| !desired.contains_key(*instrument))
            .cloned()
            .collect();
        for instrument in gone {
            if self.remove_agent(&instrument) {
                summary.removed += 1;
            }
        }

        for (instrument, row) in desired {
            let changed = self
                .agents
                .get(&instrument)
                .map(|slot| slot.agent.config() != &row.config);

            let applied = match changed {
                None => self.add_agent(row.config).map(|()| summary.added += 1),
                Some(true) => {
                    info!(instrument = %instrument, "Agent config changed, replacing agent");
                    self.replace_agent(row.config)
                        .await
                        .map(|()| summary.replaced += 1)
                }
                Some(false) => Ok(()),
            };
            if let Err(e) = applied {
                warn!(instrument = %instrument, error = %e, "Failed to apply agent config");
                continue;
            }

            self.apply_status(&instrument, row.status, &mut summary);
        }

        if summary.changed() {
            info!(
                added = summary.added,
                removed = summary.removed,
                replaced = summary.replaced,
                paused = summary.paused,
                resumed = summary.resumed,
                agents = self.agents.len(),
                "Agent configs synced"
            );
        }
        summary
    }

    fn apply_status(
        &mut self,
        instrument: &InstrumentId,
        status: AgentStatusFlag,
        summary: &mut SyncSummary,
    ) {
        let halted = self.risk.is_halted();
        let Some(slot) = self.agents.get_mut(instrument) else {
            return;
        };

        match status {
            AgentStatusFlag::Paused if !slot.store_paused => {
                slot.store_paused = true;
                slot.agent.pause();
                summary.paused += 1;
            }
            AgentStatusFlag::Active if slot.store_paused => {
                slot.store_paused = false;
                if halted {
                    debug!(instrument = %instrument, "Store resumed agent, held paused by risk halt");
                } else {
                    slot.agent.resume();
                    summary.resumed += 1;
                }
            }
            _ => {}
        }
    }

    // === Reporting ===

    /// One log line per agent plus a totals line.
    pub async fn report_status(&self) {
        for (instrument, result) in self.statuses().await {
            match result {
                Ok(status) => info!(
                    instrument = %instrument,
                    name = %status.name,
                    state = %status.state,
                    inventory = %status.inventory,
                    exposure = %status.exposure,
                    spread = %status.spread,
                    balance = %status.balance,
                    bid = %status.bid_plan,
                    ask = %status.ask_plan,
                    orders = %status.orders_summary(),
                    trades = status.stats.total_trades,
                    realized_pnl = %status.stats.realized_pnl,
                    total_pnl = %status.total_pnl,
                    "Agent status"
                ),
                Err(e) => warn!(instrument = %instrument, error = %e, "Agent status unavailable"),
            }
        }

        let state = self.risk.state();
        info!(
            agents = self.agents.len(),
            total_exposure = %state.total_exposure,
            total_pnl = %state.total_pnl,
            halted = self.risk.is_halted(),
            halted_at_ms = ?self.risk.latch().tripped_at(),
            "Portfolio status"
        );

        if self.report_metrics {
            match Metrics::gather_text() {
                Ok(text) => debug!(metrics = %text, "Metrics snapshot"),
                Err(e) => warn!(?e, "Failed to render metrics"),
            }
        }
    }

    // === Run loop ===

    /// Drive the schedules until [`ManagerHandle::shutdown`] is called.
    pub async fn run(&mut self) -> AppResult<()> {
        let mut commands = self
            .commands
            .take()
            .ok_or_else(|| AppError::Config("manager is already running".to_string()))?;
        let cancel = self.handle.cancel.clone();

        let initial = self.sync_configs().await;
        info!(
            store = self.sync.store_name(),
            result = initial.result,
            agents = self.agents.len(),
            "Manager started"
        );

        let mut steps = interval(self.config.poll_interval());
        steps.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut risk_checks = interval(self.config.risk_check_interval());
        risk_checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let sync_every = self.config.config_sync_interval();
        let mut syncs = interval_at(Instant::now() + sync_every, sync_every);
        syncs.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reports = interval(self.config.status_interval());
        reports.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }

                _ = steps.tick() => {
                    self.run_cycle().await;
                }

                _ = risk_checks.tick() => {
                    self.evaluate_risk().await;
                }

                _ = syncs.tick() => {
                    self.sync_configs().await;
                }

                _ = reports.tick() => {
                    self.report_status().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        info!(?command, "Operator command");
        match command {
            ManagerCommand::ResetRisk => {
                if self.reset_risk().is_none() {
                    info!("Risk reset requested but trading is not halted");
                }
            }
            ManagerCommand::PauseAll => {
                self.pause_all();
            }
            ManagerCommand::ResumeAll => {
                if let Err(e) = self.resume_all() {
                    warn!(error = %e, "Resume refused");
                }
            }
            ManagerCommand::Halt(message) => self.halt(message).await,
        }
    }

    /// Stop every agent, wait for in-flight steps and, when configured,
    /// cancel resting orders. Flushes the fill journal.
    pub async fn shutdown(&mut self) {
        info!(agents = self.agents.len(), "Shutting down agents");
        for slot in self.agents.values() {
            slot.agent.stop();
        }

        if self.config.cancel_on_shutdown {
            let cancelled = self.cancel_all_orders().await;
            info!(cancelled, "Resting orders cancelled on shutdown");
        } else {
            self.drain_inflight().await;
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.lock().close() {
                warn!(?e, "Failed to close fill journal");
            }
        }

        for instrument in self.agents.keys() {
            Metrics::agent_removed(instrument.as_str());
        }
        self.agents.clear();
        Metrics::agents(0);
        info!("Manager stopped");
    }
}

fn sync_result(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Fresh(_) => "fresh",
        SyncOutcome::LastKnownGood { .. } => "last_known_good",
        SyncOutcome::Unavailable(_) => "unavailable",
    }
}
