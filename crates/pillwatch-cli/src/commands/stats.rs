use chrono::{DateTime, Utc};
use clap::Args;
use pillwatch_core::{patient_stats, Database};

use super::{now_or, print_json, CliResult};

#[derive(Args)]
pub struct StatsArgs {
    /// Patient ID
    patient_id: i64,
    /// End of the window (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

pub fn run(args: StatsArgs) -> CliResult {
    let db = Database::open()?;
    let stats = patient_stats(&db, args.patient_id, now_or(args.now))?;
    print_json(&stats)
}
