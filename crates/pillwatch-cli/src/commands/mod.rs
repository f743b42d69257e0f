pub mod config;
pub mod contact;
pub mod intake;
pub mod patient;
pub mod prescription;
pub mod serve;
pub mod stats;
pub mod summary;
pub mod tick;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `--now` override, defaulting to the wall clock.
pub fn now_or(now: Option<DateTime<Utc>>) -> DateTime<Utc> {
    now.unwrap_or_else(Utc::now)
}
