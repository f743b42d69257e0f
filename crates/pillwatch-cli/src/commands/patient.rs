use clap::Subcommand;
use pillwatch_core::{CoreError, Database, NewPatient};

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum PatientAction {
    /// Register a patient
    Add {
        /// Full name
        name: String,
        /// IANA timezone (e.g. "Africa/Casablanca")
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Push device token
        #[arg(long)]
        device_token: Option<String>,
    },
    /// Show a patient with contacts and prescriptions
    Show {
        /// Patient ID
        id: i64,
    },
    /// Set or clear the push device token
    Device {
        /// Patient ID
        id: i64,
        /// New token; omit to clear
        token: Option<String>,
    },
}

pub fn run(action: PatientAction) -> CliResult {
    let db = Database::open()?;

    match action {
        PatientAction::Add {
            name,
            timezone,
            device_token,
        } => {
            let patient = db.insert_patient(&NewPatient {
                full_name: name,
                timezone,
                device_token,
            })?;
            print_json(&patient)?;
        }
        PatientAction::Show { id } => {
            let patient = db
                .get_patient(id)?
                .ok_or(CoreError::NotFound { entity: "patient", id })?;
            let contacts = db.contacts_for_patient(id)?;
            let prescriptions = db.prescriptions_for_patient(id)?;
            print_json(&serde_json::json!({
                "patient": patient,
                "contacts": contacts,
                "prescriptions": prescriptions,
            }))?;
        }
        PatientAction::Device { id, token } => {
            if !db.set_device_token(id, token.as_deref())? {
                return Err(CoreError::NotFound { entity: "patient", id }.into());
            }
            print_json(&serde_json::json!({ "id": id, "device_token": token }))?;
        }
    }
    Ok(())
}
