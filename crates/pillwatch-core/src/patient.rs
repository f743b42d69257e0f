//! Patients and their emergency contacts.
//!
//! Both are owned by the user-management side of the system; the engine
//! reads them to resolve timezones, push destinations and escalation
//! recipients.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub full_name: String,
    /// IANA identifier, e.g. `Africa/Casablanca`.
    pub timezone: String,
    /// Push destination; `None` when the patient has no registered device.
    pub device_token: Option<String>,
}

impl Patient {
    /// Resolve the patient's timezone.
    pub fn tz(&self) -> Result<Tz, ValidationError> {
        parse_timezone(&self.timezone)
    }

    /// Device token, treating blank strings as absent.
    pub fn push_destination(&self) -> Option<&str> {
        self.device_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub full_name: String,
    pub timezone: String,
    pub device_token: Option<String>,
}

impl NewPatient {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.full_name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "full_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        parse_timezone(&self.timezone)?;
        Ok(())
    }
}

/// Someone to alert when a patient does not confirm an intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub patient_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn email_address(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn phone_number(&self) -> Option<&str> {
        non_blank(self.phone.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub fn parse_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.parse::<Tz>()
        .map_err(|_| ValidationError::InvalidTimezone(name.to_string()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
