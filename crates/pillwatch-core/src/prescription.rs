//! Prescriptions as seen by the intake engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, ValidationError};
use crate::intake::generator::{generate_events, plan_occurrences};
use crate::schedule::DoseSchedule;
use crate::storage::Database;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: i64,
    pub patient_id: i64,
    /// Opaque prescriber reference from the doctor directory.
    pub prescriber: String,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub schedule: DoseSchedule,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrescription {
    pub patient_id: i64,
    pub prescriber: String,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub schedule: DoseSchedule,
}

impl NewPrescription {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.medication_name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "medication_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        self.schedule.validate()
    }
}

/// Outcome of [`replace_schedule`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleChange {
    /// Future PENDING events dropped because the new schedule no longer has them.
    pub removed: usize,
    /// Events created for the new schedule inside the horizon.
    pub created: usize,
}

/// Validate and store a prescription, then generate its upcoming events.
pub fn create_prescription(
    db: &Database,
    new: &NewPrescription,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Result<Prescription> {
    if db.get_patient(new.patient_id)?.is_none() {
        return Err(CoreError::NotFound {
            entity: "patient",
            id: new.patient_id,
        });
    }
    let prescription = db.insert_prescription(new)?;
    let created = generate_events(db, prescription.id, now, horizon)?;
    tracing::info!(
        prescription_id = prescription.id,
        patient_id = prescription.patient_id,
        created,
        "prescription created"
    );
    Ok(prescription)
}

/// Replace the date range and dose times of a prescription.
///
/// PENDING events after `now` that the new schedule no longer produces
/// inside the horizon are deleted along with their attempts; events that
/// still match keep their ids. Past and resolved events are untouched.
pub fn replace_schedule(
    db: &Database,
    prescription_id: i64,
    schedule: DoseSchedule,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Result<ScheduleChange> {
    schedule.validate()?;
    let schedule = DoseSchedule::new(schedule.start_date, schedule.end_date, schedule.dose_times);
    let prescription = db
        .get_prescription(prescription_id)?
        .ok_or(CoreError::NotFound {
            entity: "prescription",
            id: prescription_id,
        })?;
    let patient = db
        .get_patient(prescription.patient_id)?
        .ok_or(CoreError::NotFound {
            entity: "patient",
            id: prescription.patient_id,
        })?;
    let keep: Vec<DateTime<Utc>> = plan_occurrences(prescription_id, &schedule, patient.tz()?, now, horizon)
        .into_iter()
        .map(|o| o.scheduled_at)
        .collect();

    let tx = db.conn().unchecked_transaction()?;
    db.update_prescription(
        prescription_id,
        &prescription.medication_name,
        prescription.dosage.as_deref(),
        &schedule,
    )?;
    let removed = db.delete_future_pending(prescription_id, now, &keep)?;
    let created = generate_events(db, prescription_id, now, horizon)?;
    tx.commit()?;

    tracing::info!(prescription_id, removed, created, "prescription schedule replaced");
    Ok(ScheduleChange { removed, created })
}

/// Delete a prescription together with its events and their attempts.
pub fn delete_prescription(db: &Database, prescription_id: i64) -> Result<()> {
    if !db.delete_prescription(prescription_id)? {
        return Err(CoreError::NotFound {
            entity: "prescription",
            id: prescription_id,
        });
    }
    tracing::info!(prescription_id, "prescription deleted");
    Ok(())
}
