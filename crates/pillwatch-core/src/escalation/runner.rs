//! Periodic driver for the escalation tick.

use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use super::{EscalationTick, TickOutcome};
use crate::storage::{Database, TickConfig};

/// Runs [`EscalationTick::run_once`] every `interval_secs` against the
/// database file at `db_path`.
///
/// Each run opens its own connection on tokio's blocking pool, so the
/// async side never touches SQLite or the blocking HTTP gateways.
pub struct TickRunner {
    db_path: PathBuf,
    tick: Arc<EscalationTick>,
    config: TickConfig,
    owner: String,
}

impl TickRunner {
    pub fn new(db_path: PathBuf, tick: EscalationTick, config: TickConfig) -> Self {
        Self {
            db_path,
            tick: Arc::new(tick),
            config,
            owner: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Lease owner token of this runner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Tick until `shutdown` resolves. A run already in progress when the
    /// signal arrives is completed before returning.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            owner = %self.owner,
            interval_secs = self.config.interval_secs,
            db = %self.db_path.display(),
            "tick runner started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => self.run_one().await,
            }
        }

        tracing::info!(owner = %self.owner, "tick runner stopped");
    }

    async fn run_one(&self) {
        let db_path = self.db_path.clone();
        let tick = Arc::clone(&self.tick);
        let config = self.config.clone();
        let owner = self.owner.clone();

        let joined = tokio::task::spawn_blocking(move || -> crate::error::Result<TickOutcome> {
            let db = Database::open_path(&db_path)?;
            tick.run_once(&db, &owner, Utc::now(), &config)
        })
        .await;

        match joined {
            Ok(Ok(TickOutcome::Ran(_))) => {}
            Ok(Ok(TickOutcome::Skipped)) => tracing::debug!("tick skipped"),
            Ok(Err(e)) => tracing::error!(error = %e, "tick failed; retrying next cycle"),
            Err(e) => tracing::error!(error = %e, "tick task panicked"),
        }
    }
}
