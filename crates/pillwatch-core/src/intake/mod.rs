//! Intake events and their lifecycle.
//!
//! ## State Transitions
//!
//! ```text
//! PENDING --(now > scheduled + window)--> MISSED      [terminal]
//! PENDING --(explicit confirm action)--> CONFIRMED   [terminal]
//! ```
//!
//! Only the escalation tick performs the automatic PENDING -> MISSED
//! transition. Confirmation is the one explicit action; whether it may
//! overwrite a MISSED event is governed by [`LateConfirmation`].

pub mod generator;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::storage::Database;

use generator::generate_for_patient;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntakeStatus {
    Pending,
    Confirmed,
    Missed,
}

impl IntakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeStatus::Pending => "PENDING",
            IntakeStatus::Confirmed => "CONFIRMED",
            IntakeStatus::Missed => "MISSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(IntakeStatus::Pending),
            "CONFIRMED" => Some(IntakeStatus::Confirmed),
            "MISSED" => Some(IntakeStatus::Missed),
            _ => None,
        }
    }

    /// CONFIRMED and MISSED absorb every automatic transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntakeStatus::Pending)
    }
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete, timezoned occurrence of a dose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub id: i64,
    pub prescription_id: i64,
    /// Resolved once at generation from date + dose time + patient zone.
    pub scheduled_at: DateTime<Utc>,
    pub status: IntakeStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl IntakeEvent {
    /// Whole minutes elapsed since the scheduled instant (negative if ahead).
    pub fn minutes_since(&self, now: DateTime<Utc>) -> i64 {
        (now - self.scheduled_at).num_minutes()
    }
}

/// Read projection joining an event with its prescription, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeView {
    #[serde(flatten)]
    pub event: IntakeEvent,
    pub patient_id: i64,
    pub medication_name: String,
    pub dosage: Option<String>,
}

/// What confirming an already-MISSED event does.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LateConfirmation {
    /// MISSED events may still be confirmed and flip to CONFIRMED.
    #[default]
    Allow,
    /// MISSED events stay MISSED; confirming them is an error.
    Reject,
}

/// Offset/limit window over a listing ordered by `(scheduled_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// Record the patient's confirmation of an intake.
///
/// Confirming a CONFIRMED event again overwrites `confirmed_at` and the
/// notes (last write wins).
///
/// # Errors
/// `NotFound` if `event_id` does not resolve, `AlreadyResolved` when the
/// event is MISSED and the policy is [`LateConfirmation::Reject`].
pub fn confirm_intake(
    db: &Database,
    event_id: i64,
    notes: Option<&str>,
    now: DateTime<Utc>,
    policy: LateConfirmation,
) -> Result<IntakeStatus> {
    let event = db.get_event(event_id)?.ok_or(CoreError::NotFound {
        entity: "intake event",
        id: event_id,
    })?;

    if event.status == IntakeStatus::Missed && policy == LateConfirmation::Reject {
        return Err(CoreError::AlreadyResolved {
            id: event_id,
            status: event.status,
        });
    }

    db.set_confirmed(event_id, now, notes)?;
    tracing::info!(
        event_id,
        previous = %event.status,
        "intake confirmed"
    );
    Ok(IntakeStatus::Confirmed)
}

/// PENDING events of a patient due in `[now, now + window]`.
///
/// Events inside the generation horizon are materialized first, so a
/// freshly created or extended prescription shows up without waiting for
/// the next tick.
pub fn list_upcoming(
    db: &Database,
    patient_id: i64,
    now: DateTime<Utc>,
    window: Duration,
    horizon: Duration,
) -> Result<Vec<IntakeView>> {
    let created = generate_for_patient(db, patient_id, now, horizon)?;
    if created > 0 {
        tracing::debug!(patient_id, created, "generated events before listing");
    }
    Ok(db.list_upcoming(patient_id, now, now + window)?)
}

/// Paged history of a patient, oldest first.
pub fn list_history(
    db: &Database,
    patient_id: i64,
    since: DateTime<Utc>,
    page: Page,
) -> Result<Vec<IntakeView>> {
    if db.get_patient(patient_id)?.is_none() {
        return Err(CoreError::NotFound {
            entity: "patient",
            id: patient_id,
        });
    }
    Ok(db.list_history(patient_id, since, page)?)
}
