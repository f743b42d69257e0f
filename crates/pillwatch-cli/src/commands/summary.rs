use chrono::{DateTime, Utc};
use clap::Args;
use pillwatch_core::{daily_summary, send_daily_summary, Config, Database, Dispatcher, Gateways};

use super::{now_or, print_json, CliResult};

#[derive(Args)]
pub struct SummaryArgs {
    /// Patient ID
    patient_id: i64,
    /// Push the summary to the patient's device
    #[arg(long)]
    send: bool,
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

pub fn run(args: SummaryArgs) -> CliResult {
    let db = Database::open()?;
    let now = now_or(args.now);
    let summary = daily_summary(&db, args.patient_id, now)?;

    if !args.send {
        return print_json(&summary);
    }

    let config = Config::load_or_default();
    let runtime = tokio::runtime::Runtime::new()?;
    let queued = runtime.block_on(async {
        let (dispatcher, worker) = Dispatcher::spawn(
            Gateways::from_config(&config.gateways),
            config.dispatch.queue_capacity,
        );
        let queued = send_daily_summary(&db, &dispatcher, args.patient_id, now);
        // Dropping the last sender lets the worker drain and exit.
        drop(dispatcher);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "dispatch worker failed");
        }
        queued
    })?;

    print_json(&serde_json::json!({ "summary": summary, "queued": queued }))
}
