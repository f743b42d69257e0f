//! Expiring lease rows in `scheduler_locks`.
//!
//! A lease is held by whoever last wrote the row while it was free. Holders
//! never block: acquisition either wins immediately or reports `false`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_sql_ts, to_sql_ts, Database};

impl Database {
    /// Take the named lease until `now + max_hold` if it is free or expired.
    ///
    /// The conditional upsert is a single statement, so two connections
    /// racing for the same name cannot both succeed.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        max_hold: Duration,
    ) -> Result<bool, rusqlite::Error> {
        let changed = self.conn.execute(
            "INSERT INTO scheduler_locks (name, owner, locked_at, locked_until)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO UPDATE
                 SET owner = excluded.owner,
                     locked_at = excluded.locked_at,
                     locked_until = excluded.locked_until
                 WHERE scheduler_locks.locked_until <= excluded.locked_at",
            params![name, owner, to_sql_ts(now), to_sql_ts(now + max_hold)],
        )?;
        Ok(changed == 1)
    }

    /// Release a lease held by `owner`.
    ///
    /// The row stays locked until `locked_at + min_hold` if that is later
    /// than `now`, which keeps a fast tick from running again on another
    /// node straight away. Returns `false` when `owner` no longer holds it.
    pub fn release_lease(
        &self,
        name: &str,
        owner: &str,
        now: DateTime<Utc>,
        min_hold: Duration,
    ) -> Result<bool, rusqlite::Error> {
        let locked_at: Option<String> = self
            .conn
            .query_row(
                "SELECT locked_at FROM scheduler_locks WHERE name = ?1 AND owner = ?2",
                params![name, owner],
                |row| row.get(0),
            )
            .optional()?;
        let Some(locked_at) = locked_at else {
            return Ok(false);
        };

        let until = (from_sql_ts(0, &locked_at)? + min_hold).max(now);
        let changed = self.conn.execute(
            "UPDATE scheduler_locks SET locked_until = ?3 WHERE name = ?1 AND owner = ?2",
            params![name, owner, to_sql_ts(until)],
        )?;
        Ok(changed == 1)
    }

    /// Current `(owner, locked_until)` of a lease, if the row exists.
    pub fn lease_holder(&self, name: &str) -> Result<Option<(String, DateTime<Utc>)>, rusqlite::Error> {
        let row = self
            .conn
            .query_row(
                "SELECT owner, locked_until FROM scheduler_locks WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(owner, until)| Ok((owner, from_sql_ts(1, &until)?)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::ts;

    const NAME: &str = "escalation_tick";

    #[test]
    fn second_owner_is_refused_while_held() {
        let db = Database::open_memory().unwrap();
        let now = ts("2024-01-01T08:00:00Z");
        assert!(db.try_acquire_lease(NAME, "a", now, Duration::seconds(30)).unwrap());
        assert!(!db
            .try_acquire_lease(NAME, "b", now + Duration::seconds(29), Duration::seconds(30))
            .unwrap());
        assert_eq!(db.lease_holder(NAME).unwrap().unwrap().0, "a");
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let db = Database::open_memory().unwrap();
        let now = ts("2024-01-01T08:00:00Z");
        assert!(db.try_acquire_lease(NAME, "a", now, Duration::seconds(30)).unwrap());
        assert!(db
            .try_acquire_lease(NAME, "b", now + Duration::seconds(30), Duration::seconds(30))
            .unwrap());
        assert_eq!(db.lease_holder(NAME).unwrap().unwrap().0, "b");
    }

    #[test]
    fn release_honours_min_hold() {
        let db = Database::open_memory().unwrap();
        let now = ts("2024-01-01T08:00:00Z");
        db.try_acquire_lease(NAME, "a", now, Duration::seconds(30)).unwrap();

        // Released after 2s: still locked until locked_at + 10s.
        assert!(db
            .release_lease(NAME, "a", now + Duration::seconds(2), Duration::seconds(10))
            .unwrap());
        assert_eq!(
            db.lease_holder(NAME).unwrap().unwrap().1,
            now + Duration::seconds(10)
        );
        assert!(!db
            .try_acquire_lease(NAME, "b", now + Duration::seconds(9), Duration::seconds(30))
            .unwrap());
        assert!(db
            .try_acquire_lease(NAME, "b", now + Duration::seconds(10), Duration::seconds(30))
            .unwrap());
    }

    #[test]
    fn slow_release_unlocks_at_release_time() {
        let db = Database::open_memory().unwrap();
        let now = ts("2024-01-01T08:00:00Z");
        db.try_acquire_lease(NAME, "a", now, Duration::seconds(30)).unwrap();
        db.release_lease(NAME, "a", now + Duration::seconds(25), Duration::seconds(10))
            .unwrap();
        assert_eq!(
            db.lease_holder(NAME).unwrap().unwrap().1,
            now + Duration::seconds(25)
        );
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let db = Database::open_memory().unwrap();
        let now = ts("2024-01-01T08:00:00Z");
        db.try_acquire_lease(NAME, "a", now, Duration::seconds(30)).unwrap();
        assert!(!db.release_lease(NAME, "b", now, Duration::seconds(10)).unwrap());
        assert_eq!(
            db.lease_holder(NAME).unwrap().unwrap().1,
            now + Duration::seconds(30)
        );
    }
}
