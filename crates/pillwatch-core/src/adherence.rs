//! Adherence statistics over a patient's recent intake events.
//!
//! The window covers events scheduled in the last
//! [`ADHERENCE_WINDOW_DAYS`] days up to `now`; events still ahead of `now`
//! are not counted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::intake::{IntakeEvent, IntakeStatus};
use crate::storage::Database;

pub const ADHERENCE_WINDOW_DAYS: i64 = 7;

/// Adherence of one patient over the trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdherenceStats {
    pub patient_id: i64,
    /// Events scheduled inside the window, any status
    pub total: u32,
    /// CONFIRMED events
    pub taken: u32,
    /// MISSED events
    pub missed: u32,
    /// Events still open
    pub pending: u32,
    /// Share of `total` that was taken, in percent (100 when there is nothing to take)
    pub adherence_rate: f64,
    /// Mean minutes between `scheduled_at` and `confirmed_at` over taken events
    pub average_delay_minutes: f64,
    pub total_prescriptions: u32,
}

impl AdherenceStats {
    /// Fold a set of events into counts and rates.
    pub fn from_events(patient_id: i64, events: &[IntakeEvent]) -> Self {
        let mut stats = Self {
            patient_id,
            ..Self::default()
        };
        let mut delay_sum = 0i64;

        for event in events {
            stats.total += 1;
            match event.status {
                IntakeStatus::Confirmed => {
                    stats.taken += 1;
                    if let Some(confirmed_at) = event.confirmed_at {
                        delay_sum += (confirmed_at - event.scheduled_at).num_minutes();
                    }
                }
                IntakeStatus::Missed => stats.missed += 1,
                IntakeStatus::Pending => stats.pending += 1,
            }
        }

        stats.adherence_rate = if stats.total == 0 {
            100.0
        } else {
            f64::from(stats.taken) / f64::from(stats.total) * 100.0
        };
        stats.average_delay_minutes = if stats.taken == 0 {
            0.0
        } else {
            delay_sum as f64 / f64::from(stats.taken)
        };
        stats
    }
}

/// Compute adherence for a patient over the window ending at `now`.
pub fn patient_stats(db: &Database, patient_id: i64, now: DateTime<Utc>) -> Result<AdherenceStats> {
    if db.get_patient(patient_id)?.is_none() {
        return Err(CoreError::NotFound {
            entity: "patient",
            id: patient_id,
        });
    }

    let since = now - Duration::days(ADHERENCE_WINDOW_DAYS);
    // Half-open range; include an event scheduled exactly at `now`.
    let events = db.events_for_patient_between(patient_id, since, now + Duration::milliseconds(1))?;

    let mut stats = AdherenceStats::from_events(patient_id, &events);
    stats.total_prescriptions = db.prescriptions_for_patient(patient_id)?.len() as u32;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{seed_prescription, ts};

    #[test]
    fn no_events_is_full_adherence() {
        let stats = AdherenceStats::from_events(1, &[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.adherence_rate, 100.0);
        assert_eq!(stats.average_delay_minutes, 0.0);
    }

    #[test]
    fn counts_window_and_averages_delay() {
        let db = Database::open_memory().unwrap();
        let (patient, rx) = seed_prescription(&db, "UTC", &[(8, 0)]);
        for at in [
            "2023-12-20T08:00:00Z", // outside the window
            "2024-01-05T08:00:00Z",
            "2024-01-06T08:00:00Z",
            "2024-01-07T08:00:00Z",
            "2024-01-08T08:00:00Z",
            "2024-01-09T08:00:00Z", // after now
        ] {
            db.insert_event_if_absent(rx.id, ts(at)).unwrap();
        }
        let events = db.events_for_prescription(rx.id).unwrap();
        db.set_confirmed(events[1].id, ts("2024-01-05T08:10:00Z"), None).unwrap();
        db.set_confirmed(events[2].id, ts("2024-01-06T08:21:30Z"), None).unwrap();
        db.expire_pending_before(ts("2024-01-07T09:00:01Z")).unwrap();

        let stats = patient_stats(&db, patient.id, ts("2024-01-08T12:00:00Z")).unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.taken, 2);
        assert_eq!(stats.missed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.adherence_rate, 50.0);
        // 10 and 21 whole minutes.
        assert_eq!(stats.average_delay_minutes, 15.5);
        assert_eq!(stats.total_prescriptions, 1);
    }

    #[test]
    fn unknown_patient_is_not_found() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            patient_stats(&db, 7, ts("2024-01-01T00:00:00Z")),
            Err(CoreError::NotFound { entity: "patient", id: 7 })
        ));
    }
}
