use pillwatch_core::{Config, Database, EscalationTick, Gateways, TickRunner};

use super::CliResult;

/// Tick on the configured interval until Ctrl-C.
pub fn run() -> CliResult {
    let config = Config::load()?;
    let db_path = Database::default_path()?;
    // Create and migrate the schema before the first tick.
    Database::open_path(&db_path)?;

    let tick = EscalationTick::new(config.reminders.clone(), Gateways::from_config(&config.gateways));
    let runner = TickRunner::new(db_path, tick, config.tick.clone());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(runner.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }));
    Ok(())
}
