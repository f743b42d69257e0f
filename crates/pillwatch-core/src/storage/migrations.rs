//! Database schema migrations for pillwatch.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(tx: &Connection, version: i32) -> SqliteResult<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: patients, contacts, prescriptions and their dose times.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS patients (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            full_name    TEXT NOT NULL,
            timezone     TEXT NOT NULL,
            device_token TEXT
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
            name       TEXT NOT NULL,
            email      TEXT,
            phone      TEXT
        );

        CREATE TABLE IF NOT EXISTS prescriptions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id      INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
            prescriber      TEXT NOT NULL,
            medication_name TEXT NOT NULL,
            dosage          TEXT,
            start_date      TEXT NOT NULL,
            end_date        TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dose_times (
            prescription_id INTEGER NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
            hour            INTEGER NOT NULL,
            minute          INTEGER NOT NULL,
            PRIMARY KEY (prescription_id, hour, minute)
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_patient ON contacts(patient_id);
        CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(patient_id);
        CREATE INDEX IF NOT EXISTS idx_prescriptions_end_date ON prescriptions(end_date);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: intake events and the notification attempt ledger.
///
/// The `(prescription_id, scheduled_at)` uniqueness constraint is what makes
/// event generation idempotent across concurrent callers.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS intake_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            prescription_id INTEGER NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
            scheduled_at    TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'PENDING',
            confirmed_at    TEXT,
            notes           TEXT,
            UNIQUE (prescription_id, scheduled_at)
        );

        CREATE TABLE IF NOT EXISTS notification_attempts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            intake_event_id INTEGER NOT NULL REFERENCES intake_events(id) ON DELETE CASCADE,
            channel         TEXT NOT NULL,
            attempt_at      TEXT NOT NULL,
            success         INTEGER NOT NULL,
            details         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_intake_events_status_scheduled
            ON intake_events(status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_attempts_event_channel
            ON notification_attempts(intake_event_id, channel);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: lease rows guarding the escalation tick across processes.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS scheduler_locks (
            name         TEXT PRIMARY KEY,
            owner        TEXT NOT NULL,
            locked_at    TEXT NOT NULL,
            locked_until TEXT NOT NULL
        );",
    )?;

    set_schema_version(&tx, 3)?;
    tx.commit()
}
