use chrono::{DateTime, Utc};
use clap::Args;
use pillwatch_core::{Config, Database, EscalationTick, Gateways};

use super::{now_or, print_json, CliResult};

#[derive(Args)]
pub struct TickArgs {
    /// Evaluation instant (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

pub fn run(args: TickArgs) -> CliResult {
    let db = Database::open()?;
    let config = Config::load_or_default();
    let tick = EscalationTick::new(config.reminders.clone(), Gateways::from_config(&config.gateways));

    let owner = uuid::Uuid::new_v4().to_string();
    let outcome = tick.run_once(&db, &owner, now_or(args.now), &config.tick)?;
    print_json(&outcome)
}
