use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use pillwatch_core::{
    confirm_intake, generate_events, generate_for_patient, list_history, list_upcoming, Config,
    Database, Page,
};

use super::{now_or, print_json, CliResult};

#[derive(Subcommand)]
pub enum IntakeAction {
    /// Generate events inside the horizon
    Generate {
        /// Patient ID; every active prescription of the patient is covered
        #[arg(long, conflicts_with = "prescription", required_unless_present = "prescription")]
        patient: Option<i64>,
        /// A single prescription
        #[arg(long)]
        prescription: Option<i64>,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Confirm an intake event
    Confirm {
        /// Intake event ID
        id: i64,
        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// PENDING events of a patient due within the next window
    Upcoming {
        /// Patient ID
        patient_id: i64,
        /// Window length in hours
        #[arg(long, default_value = "24")]
        hours: i64,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Events of a patient since an instant, oldest first
    History {
        /// Patient ID
        patient_id: i64,
        /// Lower bound (RFC 3339); defaults to seven days ago
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long, default_value = "100")]
        limit: u32,
    },
}

pub fn run(action: IntakeAction) -> CliResult {
    let db = Database::open()?;
    let config = Config::load_or_default();

    match action {
        IntakeAction::Generate {
            patient,
            prescription,
            now,
        } => {
            let now = now_or(now);
            let horizon = config.reminders.horizon();
            let created = match (patient, prescription) {
                (_, Some(id)) => generate_events(&db, id, now, horizon)?,
                (Some(id), None) => generate_for_patient(&db, id, now, horizon)?,
                (None, None) => 0,
            };
            print_json(&serde_json::json!({ "created": created }))?;
        }
        IntakeAction::Confirm { id, notes, now } => {
            let status = confirm_intake(
                &db,
                id,
                notes.as_deref(),
                now_or(now),
                config.reminders.late_confirmation,
            )?;
            print_json(&serde_json::json!({ "id": id, "status": status }))?;
        }
        IntakeAction::Upcoming {
            patient_id,
            hours,
            now,
        } => {
            let now = now_or(now);
            let events = list_upcoming(
                &db,
                patient_id,
                now,
                Duration::hours(hours),
                config.reminders.horizon(),
            )?;
            print_json(&events)?;
        }
        IntakeAction::History {
            patient_id,
            since,
            offset,
            limit,
        } => {
            let since = since.unwrap_or_else(|| Utc::now() - Duration::days(7));
            let events = list_history(&db, patient_id, since, Page { offset, limit })?;
            print_json(&events)?;
        }
    }
    Ok(())
}
