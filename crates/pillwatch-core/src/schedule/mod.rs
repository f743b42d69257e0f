//! Dose schedule types.
//!
//! A [`DoseSchedule`] is the recurrence rule embedded in a prescription:
//! an inclusive calendar date range plus a set of wall-clock dose times.
//! It carries no behavior beyond validation; expansion into concrete
//! instants lives in [`crate::intake::generator`].

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single time of day at which a dose is due, in the patient's timezone.
///
/// Stored unvalidated so that rows written by older clients can still be
/// loaded; [`DoseTime::to_naive_time`] is the checked accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DoseTime {
    pub hour: u32,
    pub minute: u32,
}

impl DoseTime {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn is_valid(&self) -> bool {
        self.hour <= 23 && self.minute <= 59
    }

    /// Convert to a wall-clock time, rejecting out-of-range values.
    pub fn to_naive_time(&self) -> Result<NaiveTime, ValidationError> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).ok_or(ValidationError::InvalidDoseTime {
            hour: self.hour,
            minute: self.minute,
        })
    }
}

impl std::fmt::Display for DoseTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for DoseTime {
    type Err = ValidationError;

    /// Parse `HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidValue {
            field: "dose_time".to_string(),
            message: format!("expected HH:MM, got '{s}'"),
        };
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = h.parse::<u32>().map_err(|_| invalid())?;
        let minute = m.parse::<u32>().map_err(|_| invalid())?;
        let dose_time = Self { hour, minute };
        dose_time.to_naive_time()?;
        Ok(dose_time)
    }
}

/// Recurrence rule for a prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseSchedule {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Kept sorted and free of duplicates by [`DoseSchedule::new`].
    pub dose_times: Vec<DoseTime>,
}

impl DoseSchedule {
    /// Build a schedule, sorting and de-duplicating the dose times.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, mut dose_times: Vec<DoseTime>) -> Self {
        dose_times.sort();
        dose_times.dedup();
        Self {
            start_date,
            end_date,
            dose_times,
        }
    }

    /// Check the date range and every dose time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end_date < self.start_date {
            return Err(ValidationError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        for dose_time in &self.dose_times {
            dose_time.to_naive_time()?;
        }
        Ok(())
    }

    /// Whether `date` lies inside the inclusive active range.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}
