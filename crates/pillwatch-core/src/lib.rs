//! # Pillwatch Core Library
//!
//! Medication-intake scheduling and escalation engine. It turns
//! prescriptions into concrete intake events, reminds patients on their
//! device while an event is open, marks unanswered events as missed and
//! alerts the patient's contacts.
//!
//! All operations are available through the standalone `pillwatch` CLI; the
//! daemon mode of that binary is a thin loop over the same library.
//!
//! ## Architecture
//!
//! - **Intake**: event generation over a rolling horizon and the
//!   confirmation action
//! - **Escalation**: the periodic tick (expiry, staged reminders, contact
//!   alerts) guarded by a database lease
//! - **Notify**: push, email and SMS gateways plus a bounded dispatcher
//! - **Storage**: SQLite persistence and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`EscalationTick`]: one evaluation pass over open events
//! - [`Database`]: patients, prescriptions, events and the attempt ledger
//! - [`Config`]: application configuration management
//! - [`Gateways`]: the notification sinks

pub mod adherence;
pub mod error;
pub mod escalation;
pub mod intake;
pub mod notify;
pub mod patient;
pub mod prescription;
pub mod schedule;
pub mod storage;
pub mod summary;

pub use adherence::{patient_stats, AdherenceStats};
pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use escalation::runner::TickRunner;
pub use escalation::{EscalationTick, TickOutcome, TickReport};
pub use intake::generator::{generate_all_active, generate_events, generate_for_patient};
pub use intake::{
    confirm_intake, list_history, list_upcoming, IntakeEvent, IntakeStatus, IntakeView,
    LateConfirmation, Page,
};
pub use notify::{Dispatcher, Gateways, Outbound};
pub use patient::{Contact, NewContact, NewPatient, Patient};
pub use prescription::{
    create_prescription, delete_prescription, replace_schedule, NewPrescription, Prescription,
    ScheduleChange,
};
pub use schedule::{DoseSchedule, DoseTime};
pub use storage::{Channel, Config, Database, NotificationAttempt};
pub use summary::{daily_summary, send_daily_summary, DailySummary};
