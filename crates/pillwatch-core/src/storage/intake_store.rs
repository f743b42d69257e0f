//! Intake event queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::intake::{IntakeEvent, IntakeStatus, IntakeView, Page};

use super::{from_sql_ts, to_sql_ts, Database};

const EVENT_COLUMNS: &str = "e.id, e.prescription_id, e.scheduled_at, e.status, e.confirmed_at, e.notes";

const VIEW_SELECT: &str = "SELECT e.id, e.prescription_id, e.scheduled_at, e.status, e.confirmed_at, e.notes,
        p.patient_id, p.medication_name, p.dosage
 FROM intake_events e
 JOIN prescriptions p ON p.id = e.prescription_id";

fn row_to_event(row: &Row) -> Result<IntakeEvent, rusqlite::Error> {
    let scheduled_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    let confirmed_at: Option<String> = row.get(4)?;
    Ok(IntakeEvent {
        id: row.get(0)?,
        prescription_id: row.get(1)?,
        scheduled_at: from_sql_ts(2, &scheduled_at)?,
        status: IntakeStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown intake status '{status}'").into(),
            )
        })?,
        confirmed_at: confirmed_at.map(|s| from_sql_ts(4, &s)).transpose()?,
        notes: row.get(5)?,
    })
}

fn row_to_view(row: &Row) -> Result<IntakeView, rusqlite::Error> {
    Ok(IntakeView {
        event: row_to_event(row)?,
        patient_id: row.get(6)?,
        medication_name: row.get(7)?,
        dosage: row.get(8)?,
    })
}

impl Database {
    /// Insert a PENDING event unless the `(prescription, instant)` key exists.
    ///
    /// Returns whether a row was created.
    pub fn insert_event_if_absent(
        &self,
        prescription_id: i64,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let inserted = self.conn.execute(
            "INSERT INTO intake_events (prescription_id, scheduled_at, status)
             VALUES (?1, ?2, 'PENDING')
             ON CONFLICT (prescription_id, scheduled_at) DO NOTHING",
            params![prescription_id, to_sql_ts(scheduled_at)],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_event(&self, id: i64) -> Result<Option<IntakeEvent>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM intake_events e WHERE e.id = ?1"),
                params![id],
                row_to_event,
            )
            .optional()
    }

    pub fn get_event_view(&self, id: i64) -> Result<Option<IntakeView>, rusqlite::Error> {
        self.conn
            .query_row(&format!("{VIEW_SELECT} WHERE e.id = ?1"), params![id], row_to_view)
            .optional()
    }

    pub fn events_for_prescription(&self, prescription_id: i64) -> Result<Vec<IntakeEvent>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM intake_events e
             WHERE e.prescription_id = ?1
             ORDER BY e.scheduled_at, e.id"
        ))?;
        let rows = stmt.query_map(params![prescription_id], row_to_event)?;
        rows.collect()
    }

    /// Flip every PENDING event scheduled strictly before `cutoff` to MISSED.
    ///
    /// Returns the ids that changed, in schedule order.
    pub fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "UPDATE intake_events SET status = 'MISSED'
             WHERE status = 'PENDING' AND scheduled_at < ?1
             RETURNING id, scheduled_at",
        )?;
        let mut expired = stmt
            .query_map(params![to_sql_ts(cutoff)], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        expired.sort();
        Ok(expired.into_iter().map(|(_, id)| id).collect())
    }

    /// PENDING events scheduled strictly before `cutoff`, oldest first.
    ///
    /// Read-only twin of [`Database::expire_pending_before`].
    pub fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<IntakeView>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE e.status = 'PENDING' AND e.scheduled_at < ?1
             ORDER BY e.scheduled_at, e.id"
        ))?;
        let rows = stmt.query_map(params![to_sql_ts(cutoff)], row_to_view)?;
        rows.collect()
    }

    /// PENDING events with `from <= scheduled_at <= to`, oldest first.
    pub fn pending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IntakeView>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE e.status = 'PENDING' AND e.scheduled_at >= ?1 AND e.scheduled_at <= ?2
             ORDER BY e.scheduled_at, e.id"
        ))?;
        let rows = stmt.query_map(params![to_sql_ts(from), to_sql_ts(to)], row_to_view)?;
        rows.collect()
    }

    /// Mark an event CONFIRMED regardless of its current status.
    pub fn set_confirmed(
        &self,
        id: i64,
        confirmed_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, rusqlite::Error> {
        let changed = self.conn.execute(
            "UPDATE intake_events SET status = 'CONFIRMED', confirmed_at = ?2, notes = ?3
             WHERE id = ?1",
            params![id, to_sql_ts(confirmed_at), notes],
        )?;
        Ok(changed == 1)
    }

    /// PENDING events of a patient in `[now, until]`, ascending.
    pub fn list_upcoming(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<IntakeView>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE p.patient_id = ?1 AND e.status = 'PENDING'
               AND e.scheduled_at >= ?2 AND e.scheduled_at <= ?3
             ORDER BY e.scheduled_at, e.id"
        ))?;
        let rows = stmt.query_map(
            params![patient_id, to_sql_ts(now), to_sql_ts(until)],
            row_to_view,
        )?;
        rows.collect()
    }

    /// Events of a patient scheduled at or after `since`, any status.
    ///
    /// Ordered by `(scheduled_at, id)` so that offset paging is stable.
    pub fn list_history(
        &self,
        patient_id: i64,
        since: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<IntakeView>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE p.patient_id = ?1 AND e.scheduled_at >= ?2
             ORDER BY e.scheduled_at, e.id
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![patient_id, to_sql_ts(since), page.limit, page.offset],
            row_to_view,
        )?;
        rows.collect()
    }

    /// Every event of a patient with `from <= scheduled_at < to`.
    pub fn events_for_patient_between(
        &self,
        patient_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IntakeEvent>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM intake_events e
             JOIN prescriptions p ON p.id = e.prescription_id
             WHERE p.patient_id = ?1 AND e.scheduled_at >= ?2 AND e.scheduled_at < ?3
             ORDER BY e.scheduled_at, e.id"
        ))?;
        let rows = stmt.query_map(
            params![patient_id, to_sql_ts(from), to_sql_ts(to)],
            row_to_event,
        )?;
        rows.collect()
    }

    /// Delete PENDING events of a prescription scheduled after `after`,
    /// except those whose instant is in `keep`. Attempts cascade.
    ///
    /// Returns the number of events removed.
    pub fn delete_future_pending(
        &self,
        prescription_id: i64,
        after: DateTime<Utc>,
        keep: &[DateTime<Utc>],
    ) -> Result<usize, rusqlite::Error> {
        let candidates = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM intake_events e
                 WHERE e.prescription_id = ?1 AND e.status = 'PENDING' AND e.scheduled_at > ?2"
            ))?;
            let rows = stmt.query_map(params![prescription_id, to_sql_ts(after)], row_to_event)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut removed = 0;
        for event in candidates {
            if keep.contains(&event.scheduled_at) {
                continue;
            }
            removed += self
                .conn
                .execute("DELETE FROM intake_events WHERE id = ?1", params![event.id])?;
        }
        Ok(removed)
    }
}
