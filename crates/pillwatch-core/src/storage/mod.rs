mod attempts;
mod config;
pub mod database;
mod intake_store;
pub mod lease;
pub mod migrations;

pub use attempts::{Channel, NewAttempt, NotificationAttempt};
pub use config::{
    Config, DispatchConfig, EmailGatewayConfig, GatewaysConfig, PushGatewayConfig, RemindersConfig,
    SmsGatewayConfig, TickConfig,
};
pub use database::Database;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `PILLWATCH_DATA_DIR` wins when set. Otherwise `~/.config/pillwatch[-dev]/`
/// based on `PILLWATCH_ENV`; set `PILLWATCH_ENV=dev` to use the development
/// directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("PILLWATCH_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("PILLWATCH_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("pillwatch-dev")
            } else {
                base_dir.join("pillwatch")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

// Timestamps are stored as fixed-width RFC3339 UTC strings so that SQL
// string comparison orders them chronologically and equality is exact.
pub(crate) fn to_sql_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_sql_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn to_sql_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn from_sql_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDate, Utc};

    use super::Database;
    use crate::patient::{NewPatient, Patient};
    use crate::prescription::{NewPrescription, Prescription};
    use crate::schedule::{DoseSchedule, DoseTime};

    pub fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    /// A patient plus a 2024-01-01..=2024-01-03 prescription.
    pub fn seed_prescription(db: &Database, timezone: &str, times: &[(u32, u32)]) -> (Patient, Prescription) {
        let patient = db
            .insert_patient(&NewPatient {
                full_name: "Test Patient".to_string(),
                timezone: timezone.to_string(),
                device_token: Some("device-token".to_string()),
            })
            .unwrap();
        let prescription = db
            .insert_prescription(&NewPrescription {
                patient_id: patient.id,
                prescriber: "dr-test".to_string(),
                medication_name: "Metformin".to_string(),
                dosage: Some("500mg".to_string()),
                schedule: DoseSchedule::new(
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    times.iter().map(|(h, m)| DoseTime::new(*h, *m)).collect(),
                ),
            })
            .unwrap();
        (patient, prescription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_compare_chronologically_as_text() {
        let early = test_support::ts("2024-01-01T08:00:00Z");
        let late = test_support::ts("2024-01-01T08:00:00.5Z");
        assert!(to_sql_ts(early) < to_sql_ts(late));
        assert_eq!(from_sql_ts(0, &to_sql_ts(late)).unwrap(), late);
    }

    #[test]
    fn dates_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(from_sql_date(0, &to_sql_date(date)).unwrap(), date);
        assert!(from_sql_date(0, "29/02/2024").is_err());
    }
}
