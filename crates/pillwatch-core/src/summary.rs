//! End-of-day digest pushed to the patient.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::intake::generator::resolve_local;
use crate::intake::IntakeStatus;
use crate::notify::{Dispatcher, Outbound};
use crate::storage::Database;

pub const SUMMARY_TITLE: &str = "Daily summary";
pub const SUMMARY_CORRELATION_ID: &str = "daily_summary";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub patient_id: i64,
    /// Local calendar day in the patient's timezone
    pub date: NaiveDate,
    pub taken: u32,
    pub missed: u32,
    pub pending: u32,
    /// taken / (taken + missed), in percent
    pub rate: f64,
    pub text: String,
}

/// Summarize the patient's local day containing `now`.
pub fn daily_summary(db: &Database, patient_id: i64, now: DateTime<Utc>) -> Result<DailySummary> {
    let patient = db.get_patient(patient_id)?.ok_or(CoreError::NotFound {
        entity: "patient",
        id: patient_id,
    })?;
    let tz = patient.tz()?;

    let date = now.with_timezone(&tz).date_naive();
    let start = resolve_local(tz, date.and_time(chrono::NaiveTime::MIN));
    let end = resolve_local(tz, (date + Duration::days(1)).and_time(chrono::NaiveTime::MIN));

    let (mut taken, mut missed, mut pending) = (0u32, 0u32, 0u32);
    for event in db.events_for_patient_between(patient_id, start, end)? {
        match event.status {
            IntakeStatus::Confirmed => taken += 1,
            IntakeStatus::Missed => missed += 1,
            IntakeStatus::Pending => pending += 1,
        }
    }

    let resolved = taken + missed;
    let rate = if resolved == 0 {
        100.0
    } else {
        f64::from(taken) / f64::from(resolved) * 100.0
    };

    Ok(DailySummary {
        patient_id,
        date,
        taken,
        missed,
        pending,
        rate,
        text: format!("Daily summary: {taken} taken, {missed} missed. Adherence: {rate:.1}%"),
    })
}

/// Queue the day's summary as a push. Returns `false` when the patient has
/// no device or the dispatcher dropped the message.
pub fn send_daily_summary(
    db: &Database,
    dispatcher: &Dispatcher,
    patient_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let summary = daily_summary(db, patient_id, now)?;
    let patient = db.get_patient(patient_id)?.ok_or(CoreError::NotFound {
        entity: "patient",
        id: patient_id,
    })?;

    let Some(device_token) = patient.push_destination() else {
        tracing::info!(patient_id, "no device token; daily summary not sent");
        return Ok(false);
    };

    Ok(dispatcher.dispatch(Outbound::Push {
        device_token: device_token.to_string(),
        title: SUMMARY_TITLE.to_string(),
        body: summary.text,
        correlation_id: SUMMARY_CORRELATION_ID.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{seed_prescription, ts};

    #[test]
    fn counts_local_day_only() {
        let db = Database::open_memory().unwrap();
        // UTC+1 in winter: the local day 2024-01-02 is 01-01T23:00Z..01-02T23:00Z.
        let (patient, rx) = seed_prescription(&db, "Europe/Paris", &[(8, 0)]);
        for at in [
            "2024-01-01T22:30:00Z", // previous local day
            "2024-01-01T23:30:00Z",
            "2024-01-02T07:00:00Z",
            "2024-01-02T12:00:00Z",
            "2024-01-02T23:00:00Z", // next local day
        ] {
            db.insert_event_if_absent(rx.id, ts(at)).unwrap();
        }
        let events = db.events_for_prescription(rx.id).unwrap();
        db.set_confirmed(events[1].id, ts("2024-01-01T23:35:00Z"), None).unwrap();
        db.set_confirmed(events[2].id, ts("2024-01-02T07:05:00Z"), None).unwrap();
        db.expire_pending_before(ts("2024-01-02T11:00:00Z")).unwrap();

        let summary = daily_summary(&db, patient.id, ts("2024-01-02T15:00:00Z")).unwrap();

        assert_eq!(summary.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!((summary.taken, summary.missed, summary.pending), (2, 0, 1));
        assert_eq!(summary.text, "Daily summary: 2 taken, 0 missed. Adherence: 100.0%");
    }

    #[test]
    fn rate_over_resolved_events() {
        let db = Database::open_memory().unwrap();
        let (patient, rx) = seed_prescription(&db, "UTC", &[(8, 0)]);
        for at in ["2024-01-02T06:00:00Z", "2024-01-02T07:00:00Z", "2024-01-02T08:00:00Z"] {
            db.insert_event_if_absent(rx.id, ts(at)).unwrap();
        }
        let events = db.events_for_prescription(rx.id).unwrap();
        db.set_confirmed(events[0].id, ts("2024-01-02T06:10:00Z"), None).unwrap();
        db.expire_pending_before(ts("2024-01-02T09:00:00Z")).unwrap();

        let summary = daily_summary(&db, patient.id, ts("2024-01-02T20:00:00Z")).unwrap();

        assert_eq!((summary.taken, summary.missed), (1, 2));
        assert_eq!(summary.text, "Daily summary: 1 taken, 2 missed. Adherence: 33.3%");
    }

    #[tokio::test]
    async fn sends_push_with_summary_correlation() {
        let db = Database::open_memory().unwrap();
        let (patient, _) = seed_prescription(&db, "UTC", &[(8, 0)]);
        let (dispatcher, mut rx) = Dispatcher::new(4);

        assert!(send_daily_summary(&db, &dispatcher, patient.id, ts("2024-01-02T20:00:00Z")).unwrap());

        match rx.recv().await.unwrap() {
            Outbound::Push {
                device_token,
                title,
                body,
                correlation_id,
            } => {
                assert_eq!(device_token, "device-token");
                assert_eq!(title, SUMMARY_TITLE);
                assert_eq!(body, "Daily summary: 0 taken, 0 missed. Adherence: 100.0%");
                assert_eq!(correlation_id, SUMMARY_CORRELATION_ID);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn skipped_without_device_token() {
        let db = Database::open_memory().unwrap();
        let (patient, _) = seed_prescription(&db, "UTC", &[(8, 0)]);
        db.set_device_token(patient.id, None).unwrap();
        let (dispatcher, _rx) = Dispatcher::new(4);

        assert!(!send_daily_summary(&db, &dispatcher, patient.id, ts("2024-01-02T20:00:00Z")).unwrap());
    }
}
