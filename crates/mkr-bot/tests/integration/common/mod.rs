//! Shared fixtures: paper exchange, in-memory store and a manager wired to
//! both.

use std::sync::Arc;

use mkr_bot::{Manager, ManagerConfig};
use mkr_core::{AgentConfig, BookLevel, InstrumentId, Price, Size};
use mkr_gateway::{DynGateway, PaperCall, PaperExchange};
use mkr_risk::{RiskLimits, RiskSupervisor};
use mkr_store::{DynConfigStore, MemoryConfigStore, StoredAgent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub fn inst(id: &str) -> InstrumentId {
    InstrumentId::new(id).unwrap()
}

pub fn p(v: Decimal) -> Price {
    Price::new(v)
}

pub fn s(v: Decimal) -> Size {
    Size::new(v)
}

/// Spread threshold 1, improvement 1, inventory cap 50.
pub fn agent_config(id: &str) -> AgentConfig {
    AgentConfig::new(inst(id), s(dec!(50)), p(dec!(1)), p(dec!(1)))
}

/// Book with bid 45x100 and ask 50x100: the agent bids 46 for its balance.
pub fn seed(exchange: &PaperExchange, id: &str, inventory: Decimal) {
    exchange.seed_book(
        inst(id),
        vec![BookLevel::new(p(dec!(45)), s(dec!(100)))],
        vec![BookLevel::new(p(dec!(50)), s(dec!(100)))],
        s(dec!(5)),
        s(inventory),
    );
}

pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        poll_interval_ms: 20,
        step_timeout_ms: 2_000,
        call_timeout_ms: 1_000,
        store_timeout_ms: 1_000,
        risk_check_interval_secs: 1,
        config_sync_interval_secs: 1,
        status_interval_secs: 1,
        cancel_on_shutdown: true,
    }
}

pub struct Harness {
    pub exchange: Arc<PaperExchange>,
    pub store: Arc<MemoryConfigStore>,
    pub manager: Manager,
}

impl Harness {
    /// One active store row and a seeded flat book per instrument.
    pub fn new(instruments: &[&str], limits: RiskLimits) -> Self {
        Self::with_config(instruments, limits, fast_manager_config())
    }

    pub fn with_config(instruments: &[&str], limits: RiskLimits, config: ManagerConfig) -> Self {
        let exchange = Arc::new(PaperExchange::new());
        for id in instruments {
            seed(&exchange, id, Decimal::ZERO);
        }
        let store = Arc::new(MemoryConfigStore::new(
            instruments
                .iter()
                .map(|id| StoredAgent::active(agent_config(id)))
                .collect(),
        ));

        let gateway: DynGateway = exchange.clone();
        let config_store: DynConfigStore = store.clone();
        let risk = Arc::new(RiskSupervisor::new(limits).unwrap());
        let manager = Manager::new(config, gateway, config_store, risk);

        Self {
            exchange,
            store,
            manager,
        }
    }

    pub fn places(&self) -> usize {
        self.exchange
            .calls()
            .iter()
            .filter(|c| matches!(c, PaperCall::Place { .. }))
            .count()
    }
}
