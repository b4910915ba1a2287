//! Application wiring.
//!
//! Builds the gateway, config store, risk supervisor and fill journal from
//! [`AppConfig`] and hands them to the [`Manager`].

use std::sync::Arc;

use mkr_persistence::FillJournal;
use mkr_risk::RiskSupervisor;
use parking_lot::Mutex;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::manager::{Manager, ManagerHandle};

/// Main application.
pub struct Application {
    manager: Manager,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let gateway = config.gateway.build()?;
        let store = config.store.build()?;
        let risk = Arc::new(RiskSupervisor::new(config.risk.clone())?);

        info!(
            gateway = gateway.name(),
            store = store.name(),
            max_total_exposure = %config.risk.max_total_exposure,
            max_total_pnl_loss = %config.risk.max_total_pnl_loss,
            emergency_pause = config.risk.enable_emergency_pause,
            "Components initialised"
        );

        let mut manager = Manager::new(config.manager.clone(), gateway, store, risk)
            .with_metrics_report(config.telemetry.report_metrics);

        if let Some(journal_config) = &config.journal {
            let journal = FillJournal::open(journal_config)?;
            info!(dir = %journal_config.dir.display(), "Fill journal enabled");
            manager = manager.with_journal(Arc::new(Mutex::new(journal)));
        }

        Ok(Self { manager })
    }

    pub fn handle(&self) -> ManagerHandle {
        self.manager.handle()
    }

    /// Run until shutdown is requested through the handle.
    pub async fn run(mut self) -> AppResult<()> {
        self.manager.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn memory_config() -> AppConfig {
        AppConfig::from_toml(
            r#"
[manager]
poll_interval_ms = 20
cancel_on_shutdown = true

[store]
kind = "memory"

[[store.agents]]
instrument = "rain"
max_inventory = "50"
spread_threshold = "0.001"
price_improvement = "0.001"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_new_with_defaults_builds() {
        assert!(Application::new(memory_config()).is_ok());
    }

    #[test]
    fn test_new_opens_journal_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = memory_config();
        config.journal = Some(mkr_persistence::JournalConfig {
            dir: dir.path().join("fills"),
            buffer_size: 1,
        });

        assert!(Application::new(config).is_ok());
        assert!(dir.path().join("fills").is_dir());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let app = Application::new(memory_config()).unwrap();
        let handle = app.handle();

        let task = tokio::spawn(app.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(handle.is_shutdown());
    }
}
