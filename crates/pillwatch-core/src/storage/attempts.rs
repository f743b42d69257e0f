//! Append-only notification attempt ledger.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{from_sql_ts, to_sql_ts, Database};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Patient-facing push; the primary channel.
    Push,
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "PUSH",
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PUSH" => Some(Channel::Push),
            "EMAIL" => Some(Channel::Email),
            "SMS" => Some(Channel::Sms),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: i64,
    pub intake_event_id: i64,
    pub channel: Channel,
    pub attempt_at: DateTime<Utc>,
    pub success: bool,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt<'a> {
    pub intake_event_id: i64,
    pub channel: Channel,
    pub attempt_at: DateTime<Utc>,
    pub success: bool,
    pub details: &'a str,
}

impl Database {
    pub fn record_attempt(&self, attempt: &NewAttempt<'_>) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO notification_attempts (intake_event_id, channel, attempt_at, success, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.intake_event_id,
                attempt.channel.as_str(),
                to_sql_ts(attempt.attempt_at),
                attempt.success,
                attempt.details,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All attempts for an event in the order they were made.
    pub fn attempts_for_event(&self, intake_event_id: i64) -> Result<Vec<NotificationAttempt>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, intake_event_id, channel, attempt_at, success, details
             FROM notification_attempts
             WHERE intake_event_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![intake_event_id], |row| {
            let channel: String = row.get(2)?;
            let attempt_at: String = row.get(3)?;
            Ok(NotificationAttempt {
                id: row.get(0)?,
                intake_event_id: row.get(1)?,
                channel: Channel::parse(&channel).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown channel '{channel}'").into(),
                    )
                })?,
                attempt_at: from_sql_ts(3, &attempt_at)?,
                success: row.get(4)?,
                details: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    /// Number of attempts on one channel for an event, successful or not.
    pub fn count_attempts(&self, intake_event_id: i64, channel: Channel) -> Result<u32, rusqlite::Error> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM notification_attempts WHERE intake_event_id = ?1 AND channel = ?2",
            params![intake_event_id, channel.as_str()],
            |row| row.get(0),
        )
    }

    /// Whether any contact alert (EMAIL or SMS) was already recorded.
    pub fn has_escalated(&self, intake_event_id: i64) -> Result<bool, rusqlite::Error> {
        self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM notification_attempts
                WHERE intake_event_id = ?1 AND channel IN ('EMAIL', 'SMS'))",
            params![intake_event_id],
            |row| row.get(0),
        )
    }
}
