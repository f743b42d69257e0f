//! SQLite-backed store for patients, contacts and prescriptions.
//!
//! Intake events, notification attempts and scheduler leases are stored in
//! the same database; their queries live in sibling modules as further
//! `impl Database` blocks.

use chrono::{NaiveDate, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, CoreError, DatabaseError, Result};
use crate::patient::{Contact, NewContact, NewPatient, Patient};
use crate::prescription::{NewPrescription, Prescription};
use crate::schedule::{DoseSchedule, DoseTime};

use super::{data_dir, from_sql_date, from_sql_ts, migrations, to_sql_date, to_sql_ts};

/// How long a statement waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database shared by the CLI, the tick and the dashboard queries.
pub struct Database {
    pub(super) conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data_dir>/pillwatch.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the
    /// database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Ok(Self::open_path(&Self::default_path()?)?)
    }

    /// `<data_dir>/pillwatch.db`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("pillwatch.db"))
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_path(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    // ── Patients ────────────────────────────────────────────────────────

    pub fn insert_patient(&self, new: &NewPatient) -> Result<Patient> {
        new.validate()?;
        self.conn.execute(
            "INSERT INTO patients (full_name, timezone, device_token) VALUES (?1, ?2, ?3)",
            params![new.full_name, new.timezone, new.device_token],
        )?;
        Ok(Patient {
            id: self.conn.last_insert_rowid(),
            full_name: new.full_name.clone(),
            timezone: new.timezone.clone(),
            device_token: new.device_token.clone(),
        })
    }

    pub fn get_patient(&self, id: i64) -> Result<Option<Patient>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT id, full_name, timezone, device_token FROM patients WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        full_name: row.get(1)?,
                        timezone: row.get(2)?,
                        device_token: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    /// Register or clear the patient's push destination.
    ///
    /// Returns `false` if the patient does not exist.
    pub fn set_device_token(&self, patient_id: i64, token: Option<&str>) -> Result<bool, rusqlite::Error> {
        let changed = self.conn.execute(
            "UPDATE patients SET device_token = ?2 WHERE id = ?1",
            params![patient_id, token],
        )?;
        Ok(changed == 1)
    }

    // ── Contacts ────────────────────────────────────────────────────────

    pub fn insert_contact(&self, patient_id: i64, new: &NewContact) -> Result<Contact> {
        if new.name.trim().is_empty() {
            return Err(crate::error::ValidationError::InvalidValue {
                field: "name".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }
        if self.get_patient(patient_id)?.is_none() {
            return Err(CoreError::NotFound {
                entity: "patient",
                id: patient_id,
            });
        }
        self.conn.execute(
            "INSERT INTO contacts (patient_id, name, email, phone) VALUES (?1, ?2, ?3, ?4)",
            params![patient_id, new.name, new.email, new.phone],
        )?;
        Ok(Contact {
            id: self.conn.last_insert_rowid(),
            patient_id,
            name: new.name.clone(),
            email: new.email.clone(),
            phone: new.phone.clone(),
        })
    }

    pub fn contacts_for_patient(&self, patient_id: i64) -> Result<Vec<Contact>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, name, email, phone FROM contacts
             WHERE patient_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![patient_id], |row| {
            Ok(Contact {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                phone: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    // ── Prescriptions ───────────────────────────────────────────────────

    /// Insert a prescription together with its dose times.
    pub fn insert_prescription(&self, new: &NewPrescription) -> Result<Prescription> {
        new.validate()?;
        let created_at = Utc::now().trunc_subsecs(3);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO prescriptions
                (patient_id, prescriber, medication_name, dosage, start_date, end_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.patient_id,
                new.prescriber,
                new.medication_name,
                new.dosage,
                to_sql_date(new.schedule.start_date),
                to_sql_date(new.schedule.end_date),
                to_sql_ts(created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        self.write_dose_times(id, &new.schedule.dose_times)?;
        tx.commit()?;

        Ok(Prescription {
            id,
            patient_id: new.patient_id,
            prescriber: new.prescriber.clone(),
            medication_name: new.medication_name.clone(),
            dosage: new.dosage.clone(),
            schedule: new.schedule.clone(),
            created_at,
        })
    }

    pub fn get_prescription(&self, id: i64) -> Result<Option<Prescription>, rusqlite::Error> {
        let row = self
            .conn
            .query_row(
                "SELECT id, patient_id, prescriber, medication_name, dosage,
                        start_date, end_date, created_at
                 FROM prescriptions WHERE id = ?1",
                params![id],
                row_to_prescription,
            )
            .optional()?;
        match row {
            Some(mut prescription) => {
                prescription.schedule.dose_times = self.load_dose_times(id)?;
                Ok(Some(prescription))
            }
            None => Ok(None),
        }
    }

    pub fn prescriptions_for_patient(&self, patient_id: i64) -> Result<Vec<Prescription>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, prescriber, medication_name, dosage,
                    start_date, end_date, created_at
             FROM prescriptions WHERE patient_id = ?1 ORDER BY id",
        )?;
        let mut prescriptions = stmt
            .query_map(params![patient_id], row_to_prescription)?
            .collect::<Result<Vec<_>, _>>()?;
        for prescription in &mut prescriptions {
            prescription.schedule.dose_times = self.load_dose_times(prescription.id)?;
        }
        Ok(prescriptions)
    }

    /// Ids of prescriptions whose range ends on or after `earliest_end`.
    pub fn active_prescription_ids(&self, earliest_end: NaiveDate) -> Result<Vec<i64>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM prescriptions WHERE end_date >= ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![to_sql_date(earliest_end)], |row| row.get(0))?;
        rows.collect()
    }

    /// Overwrite the editable fields and dose times of a prescription.
    ///
    /// Runs on the caller's transaction, if any. Returns `false` if the
    /// prescription does not exist.
    pub fn update_prescription(
        &self,
        id: i64,
        medication_name: &str,
        dosage: Option<&str>,
        schedule: &DoseSchedule,
    ) -> Result<bool, rusqlite::Error> {
        let changed = self.conn.execute(
            "UPDATE prescriptions
             SET medication_name = ?2, dosage = ?3, start_date = ?4, end_date = ?5
             WHERE id = ?1",
            params![
                id,
                medication_name,
                dosage,
                to_sql_date(schedule.start_date),
                to_sql_date(schedule.end_date),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        self.conn
            .execute("DELETE FROM dose_times WHERE prescription_id = ?1", params![id])?;
        self.write_dose_times(id, &schedule.dose_times)?;
        Ok(true)
    }

    /// Delete a prescription; its dose times, events and attempts cascade.
    pub fn delete_prescription(&self, id: i64) -> Result<bool, rusqlite::Error> {
        let changed = self
            .conn
            .execute("DELETE FROM prescriptions WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }

    fn write_dose_times(&self, prescription_id: i64, dose_times: &[DoseTime]) -> Result<(), rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO dose_times (prescription_id, hour, minute) VALUES (?1, ?2, ?3)",
        )?;
        for dose_time in dose_times {
            stmt.execute(params![prescription_id, dose_time.hour, dose_time.minute])?;
        }
        Ok(())
    }

    fn load_dose_times(&self, prescription_id: i64) -> Result<Vec<DoseTime>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT hour, minute FROM dose_times WHERE prescription_id = ?1 ORDER BY hour, minute",
        )?;
        let rows = stmt.query_map(params![prescription_id], |row| {
            Ok(DoseTime::new(row.get(0)?, row.get(1)?))
        })?;
        rows.collect()
    }
}

fn row_to_prescription(row: &rusqlite::Row) -> Result<Prescription, rusqlite::Error> {
    let start: String = row.get(5)?;
    let end: String = row.get(6)?;
    let created: String = row.get(7)?;
    Ok(Prescription {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        prescriber: row.get(2)?,
        medication_name: row.get(3)?,
        dosage: row.get(4)?,
        schedule: DoseSchedule {
            start_date: from_sql_date(5, &start)?,
            end_date: from_sql_date(6, &end)?,
            dose_times: Vec::new(),
        },
        created_at: from_sql_ts(7, &created)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::storage::test_support::seed_prescription;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn patient_round_trip() {
        let db = Database::open_memory().unwrap();
        let patient = db
            .insert_patient(&NewPatient {
                full_name: "Nadia".to_string(),
                timezone: "Africa/Casablanca".to_string(),
                device_token: None,
            })
            .unwrap();
        assert_eq!(db.get_patient(patient.id).unwrap(), Some(patient.clone()));

        assert!(db.set_device_token(patient.id, Some("tok-1")).unwrap());
        let stored = db.get_patient(patient.id).unwrap().unwrap();
        assert_eq!(stored.push_destination(), Some("tok-1"));
        assert!(!db.set_device_token(999, Some("x")).unwrap());
    }

    #[test]
    fn insert_patient_validates_timezone() {
        let db = Database::open_memory().unwrap();
        let err = db
            .insert_patient(&NewPatient {
                full_name: "Nadia".to_string(),
                timezone: "Atlantis/Capital".to_string(),
                device_token: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn contacts_are_listed_in_insertion_order() {
        let db = Database::open_memory().unwrap();
        let (patient, _) = seed_prescription(&db, "UTC", &[(8, 0)]);
        db.insert_contact(
            patient.id,
            &NewContact {
                name: "First".to_string(),
                email: Some("first@example.com".to_string()),
                phone: None,
            },
        )
        .unwrap();
        db.insert_contact(
            patient.id,
            &NewContact {
                name: "Second".to_string(),
                email: None,
                phone: Some("+100".to_string()),
            },
        )
        .unwrap();

        let names: Vec<_> = db
            .contacts_for_patient(patient.id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
    }

    #[test]
    fn contact_for_unknown_patient_is_not_found() {
        let db = Database::open_memory().unwrap();
        let err = db
            .insert_contact(
                42,
                &NewContact {
                    name: "Orphan".to_string(),
                    email: Some("orphan@example.com".to_string()),
                    phone: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "patient", id: 42 }));
        assert!(db.contacts_for_patient(42).unwrap().is_empty());
    }

    #[test]
    fn prescription_round_trip_with_dose_times() {
        let db = Database::open_memory().unwrap();
        let (patient, rx) = seed_prescription(&db, "UTC", &[(20, 0), (8, 0)]);

        let loaded = db.get_prescription(rx.id).unwrap().unwrap();
        assert_eq!(loaded.schedule.dose_times, vec![DoseTime::new(8, 0), DoseTime::new(20, 0)]);
        assert_eq!(loaded.schedule.start_date, date(2024, 1, 1));
        assert_eq!(loaded.medication_name, "Metformin");
        assert_eq!(db.prescriptions_for_patient(patient.id).unwrap(), vec![loaded]);
        assert!(db.get_prescription(rx.id + 1).unwrap().is_none());
    }

    #[test]
    fn active_prescription_ids_filters_on_end_date() {
        let db = Database::open_memory().unwrap();
        let (_, rx) = seed_prescription(&db, "UTC", &[(8, 0)]);
        assert_eq!(db.active_prescription_ids(date(2024, 1, 3)).unwrap(), vec![rx.id]);
        assert!(db.active_prescription_ids(date(2024, 1, 4)).unwrap().is_empty());
    }

    #[test]
    fn update_replaces_dose_times() {
        let db = Database::open_memory().unwrap();
        let (_, rx) = seed_prescription(&db, "UTC", &[(8, 0), (20, 0)]);
        let schedule = DoseSchedule::new(date(2024, 1, 1), date(2024, 1, 10), vec![DoseTime::new(9, 30)]);

        assert!(db.update_prescription(rx.id, "Metformin XR", None, &schedule).unwrap());
        let loaded = db.get_prescription(rx.id).unwrap().unwrap();
        assert_eq!(loaded.schedule, schedule);
        assert_eq!(loaded.medication_name, "Metformin XR");
        assert_eq!(loaded.dosage, None);
        assert!(!db.update_prescription(rx.id + 1, "x", None, &schedule).unwrap());
    }

    #[test]
    fn delete_cascades_to_dose_times() {
        let db = Database::open_memory().unwrap();
        let (_, rx) = seed_prescription(&db, "UTC", &[(8, 0)]);
        assert!(db.delete_prescription(rx.id).unwrap());
        assert!(!db.delete_prescription(rx.id).unwrap());
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM dose_times", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
