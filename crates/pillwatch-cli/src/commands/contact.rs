use clap::Subcommand;
use pillwatch_core::{CoreError, Database, NewContact};

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum ContactAction {
    /// Add an emergency contact to a patient
    Add {
        /// Patient ID
        patient_id: i64,
        /// Contact name
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// List a patient's contacts
    List {
        /// Patient ID
        patient_id: i64,
    },
}

pub fn run(action: ContactAction) -> CliResult {
    let db = Database::open()?;

    match action {
        ContactAction::Add {
            patient_id,
            name,
            email,
            phone,
        } => {
            if db.get_patient(patient_id)?.is_none() {
                return Err(CoreError::NotFound {
                    entity: "patient",
                    id: patient_id,
                }
                .into());
            }
            let contact = db.insert_contact(patient_id, &NewContact { name, email, phone })?;
            print_json(&contact)?;
        }
        ContactAction::List { patient_id } => {
            print_json(&db.contacts_for_patient(patient_id)?)?;
        }
    }
    Ok(())
}
