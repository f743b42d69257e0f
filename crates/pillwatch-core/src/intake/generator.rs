//! Intake event generation.
//!
//! Expands a prescription's [`DoseSchedule`] into concrete PENDING events
//! for every occurrence inside `(now, now + horizon]`. Generation is safe to
//! call repeatedly from any call site: each `(prescription, instant)` key
//! is inserted at most once, enforced by the store's uniqueness constraint.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CoreError, Result};
use crate::schedule::{DoseSchedule, DoseTime};
use crate::storage::Database;

pub const DEFAULT_HORIZON_HOURS: i64 = 24;

/// A single planned occurrence of a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub local_date: NaiveDate,
    pub dose_time: DoseTime,
    pub scheduled_at: DateTime<Utc>,
}

/// Compute every occurrence of `schedule` within `(now, now + horizon]`.
///
/// Dose times that are out of range are skipped with a warning; the rest of
/// the schedule is still planned.
pub fn plan_occurrences(
    prescription_id: i64,
    schedule: &DoseSchedule,
    tz: Tz,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Vec<Occurrence> {
    let until = now + horizon;
    let today = now.with_timezone(&tz).date_naive();
    let last_local_date = until.with_timezone(&tz).date_naive();

    let first = today.max(schedule.start_date);
    let last = last_local_date.min(schedule.end_date);

    let mut planned = Vec::new();
    for date in first.iter_days().take_while(|d| *d <= last) {
        for dose_time in &schedule.dose_times {
            let Ok(time) = dose_time.to_naive_time() else {
                let err = CoreError::InvalidSchedule {
                    prescription_id,
                    hour: dose_time.hour,
                    minute: dose_time.minute,
                };
                tracing::warn!(error = %err, "skipping dose time");
                continue;
            };
            let scheduled_at = resolve_local(tz, date.and_time(time));
            if scheduled_at > now && scheduled_at <= until {
                planned.push(Occurrence {
                    local_date: date,
                    dose_time: *dose_time,
                    scheduled_at,
                });
            }
        }
    }
    planned.sort_by_key(|o| o.scheduled_at);
    planned
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (clocks falling back) take the earlier offset; times that
/// do not exist (clocks springing forward) are pushed one hour later.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            match tz.from_local_datetime(&shifted).earliest() {
                Some(dt) => dt.with_timezone(&Utc),
                // No zone has back-to-back gaps; fall back to reading the wall clock as UTC.
                None => Utc.from_utc_datetime(&shifted),
            }
        }
    }
}

/// Ensure every occurrence of one prescription inside the horizon has an event.
///
/// Returns the number of events created by this call.
///
/// # Errors
/// `NotFound` for an unknown prescription or patient, a validation error if
/// the patient's timezone does not resolve, or a database error.
pub fn generate_events(
    db: &Database,
    prescription_id: i64,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Result<usize> {
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
    let tz = patient.tz()?;

    let mut created = 0;
    for occurrence in plan_occurrences(prescription.id, &prescription.schedule, tz, now, horizon) {
        if db.insert_event_if_absent(prescription.id, occurrence.scheduled_at)? {
            created += 1;
        }
    }

    if created > 0 {
        tracing::debug!(prescription_id, created, "generated intake events");
    }
    Ok(created)
}

/// Generate for every still-active prescription of one patient.
///
/// This is the dashboard call site.
pub fn generate_for_patient(
    db: &Database,
    patient_id: i64,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Result<usize> {
    let patient = db.get_patient(patient_id)?.ok_or(CoreError::NotFound {
        entity: "patient",
        id: patient_id,
    })?;
    let today = now.with_timezone(&patient.tz()?).date_naive();

    let mut created = 0;
    for prescription in db.prescriptions_for_patient(patient_id)? {
        if prescription.schedule.end_date < today {
            continue;
        }
        created += generate_events(db, prescription.id, now, horizon)?;
    }
    Ok(created)
}

/// Generate for every prescription that may still have occurrences ahead.
///
/// Used by the periodic tick. A prescription whose patient cannot be
/// resolved is logged and skipped so one bad row does not stall the rest;
/// storage failures still abort.
pub fn generate_all_active(db: &Database, now: DateTime<Utc>, horizon: Duration) -> Result<usize> {
    // One day of slack covers every UTC offset.
    let earliest_end = now.date_naive() - Duration::days(1);

    let mut created = 0;
    for prescription_id in db.active_prescription_ids(earliest_end)? {
        match generate_events(db, prescription_id, now, horizon) {
            Ok(n) => created += n,
            Err(CoreError::Database(e)) => return Err(CoreError::Database(e)),
            Err(e) => {
                tracing::warn!(prescription_id, error = %e, "skipping prescription during generation");
            }
        }
    }
    Ok(created)
}
