use chrono::{DateTime, NaiveDate, Utc};
use clap::Subcommand;
use pillwatch_core::prescription::{create_prescription, delete_prescription, replace_schedule};
use pillwatch_core::{Config, CoreError, Database, DoseSchedule, DoseTime, NewPrescription};

use super::{now_or, print_json, CliResult};

#[derive(Subcommand)]
pub enum PrescriptionAction {
    /// Create a prescription and generate its upcoming events
    Create {
        /// Patient ID
        patient_id: i64,
        /// Medication name
        medication: String,
        /// Dosage (e.g. "500mg")
        #[arg(long)]
        dosage: Option<String>,
        /// Prescriber identifier
        #[arg(long, default_value = "cli")]
        prescriber: String,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Dose time HH:MM; repeat for several
        #[arg(long = "time", required = true)]
        times: Vec<DoseTime>,
        /// Evaluation instant (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Replace the date range and dose times
    Update {
        /// Prescription ID
        id: i64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Dose time HH:MM; repeat for several
        #[arg(long = "time", required = true)]
        times: Vec<DoseTime>,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Delete a prescription and all of its events
    Delete {
        /// Prescription ID
        id: i64,
    },
    /// Show a prescription and its events
    Show {
        /// Prescription ID
        id: i64,
    },
}

pub fn run(action: PrescriptionAction) -> CliResult {
    let db = Database::open()?;
    let horizon = Config::load_or_default().reminders.horizon();

    match action {
        PrescriptionAction::Create {
            patient_id,
            medication,
            dosage,
            prescriber,
            start,
            end,
            times,
            now,
        } => {
            let prescription = create_prescription(
                &db,
                &NewPrescription {
                    patient_id,
                    prescriber,
                    medication_name: medication,
                    dosage,
                    schedule: DoseSchedule::new(start, end, times),
                },
                now_or(now),
                horizon,
            )?;
            print_json(&prescription)?;
        }
        PrescriptionAction::Update {
            id,
            start,
            end,
            times,
            now,
        } => {
            let change = replace_schedule(&db, id, DoseSchedule::new(start, end, times), now_or(now), horizon)?;
            print_json(&change)?;
        }
        PrescriptionAction::Delete { id } => {
            delete_prescription(&db, id)?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        PrescriptionAction::Show { id } => {
            let prescription = db
                .get_prescription(id)?
                .ok_or(CoreError::NotFound { entity: "prescription", id })?;
            let events = db.events_for_prescription(id)?;
            print_json(&serde_json::json!({
                "prescription": prescription,
                "events": events,
            }))?;
        }
    }
    Ok(())
}
