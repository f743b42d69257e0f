//! The escalation tick.
//!
//! One run decides, sends, then writes:
//!
//! 1. **Plan.** Plain reads pick the next primary reminder stage for
//!    recent PENDING events and the contacts to alert for events that have
//!    gone the whole window unconfirmed after every stage.
//! 2. **Send.** Gateways are called with no transaction open, so a slow
//!    provider never blocks a confirmation on another connection. Each
//!    event is re-read just before its sends and skipped once resolved.
//! 3. **Write.** One short `BEGIN IMMEDIATE` transaction tops up intake
//!    events, flips PENDING events older than the window to MISSED and
//!    appends an attempt row for every send.
//!
//! Gateway failures are not errors: they are recorded as failed attempts.
//! Events about to expire are still offered one escalation, and escalation
//! fires at most once per event.

pub mod runner;

use chrono::{DateTime, Utc};
use rusqlite::{Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::Result;
use crate::intake::generator::generate_all_active;
use crate::intake::{IntakeStatus, IntakeView};
use crate::notify::{alert_text, reminder_body, Gateways, ALERT_SUBJECT, REMINDER_TITLE};
use crate::storage::{Channel, Database, NewAttempt, RemindersConfig, TickConfig};

/// Name of the lease row guarding the tick.
pub const TICK_LEASE: &str = "escalation_tick";

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub generated: usize,
    pub expired: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    /// Events that had their contacts alerted this run.
    pub escalated_events: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Another holder had the lease.
    Skipped,
    Ran(TickReport),
}

/// Which reminder stage, if any, is due for an event.
///
/// Stage `k` (zero-based) is due once `k` reminders have been attempted and
/// at least `spacing * k` whole minutes have elapsed.
pub fn reminder_stage_due(
    minutes_since: i64,
    prior_reminders: u32,
    spacing_minutes: u32,
    stage_count: u32,
) -> Option<u32> {
    if minutes_since < 0 || prior_reminders >= stage_count {
        return None;
    }
    let due_at = i64::from(spacing_minutes) * i64::from(prior_reminders);
    (minutes_since >= due_at).then_some(prior_reminders)
}

/// A send decided on during planning.
#[derive(Debug)]
enum Planned {
    Reminder {
        event_id: i64,
        stage: u32,
        device_token: Option<String>,
        medication: String,
    },
    Escalation {
        event_id: i64,
        medication: String,
        targets: Vec<Target>,
    },
}

/// One contact address to alert.
#[derive(Debug)]
enum Target {
    Email(String),
    Sms(String),
}

impl Planned {
    fn event_id(&self) -> i64 {
        match self {
            Planned::Reminder { event_id, .. } | Planned::Escalation { event_id, .. } => *event_id,
        }
    }
}

/// One gateway call waiting to be written down.
#[derive(Debug)]
struct Sent {
    event_id: i64,
    channel: Channel,
    success: bool,
    details: &'static str,
}

pub struct EscalationTick {
    reminders: RemindersConfig,
    gateways: Gateways,
}

impl EscalationTick {
    pub fn new(reminders: RemindersConfig, gateways: Gateways) -> Self {
        Self { reminders, gateways }
    }

    /// Run once under the tick lease.
    ///
    /// Returns [`TickOutcome::Skipped`] without touching anything if another
    /// owner holds the lease. The lease is released (subject to its minimum
    /// hold) whether or not the run succeeds.
    pub fn run_once(
        &self,
        db: &Database,
        owner: &str,
        now: DateTime<Utc>,
        tick: &TickConfig,
    ) -> Result<TickOutcome> {
        if !db.try_acquire_lease(TICK_LEASE, owner, now, tick.lock_max_hold())? {
            tracing::debug!(owner, "tick lease held elsewhere; skipping");
            return Ok(TickOutcome::Skipped);
        }

        let started = Instant::now();
        let result = self.run(db, now);

        let elapsed =
            chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        if let Err(e) = db.release_lease(TICK_LEASE, owner, now + elapsed, tick.lock_min_hold()) {
            tracing::warn!(owner, error = %e, "failed to release tick lease");
        }

        result.map(TickOutcome::Ran)
    }

    /// Run once without taking the lease.
    ///
    /// # Errors
    /// Any database failure aborts the run. A failure in the write phase
    /// rolls back every write of the run; notifications already handed to
    /// gateways are not recalled.
    pub fn run(&self, db: &Database, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        let plan = self.plan(db, now)?;
        let sent = self.send(db, plan, &mut report)?;

        let tx = Transaction::new_unchecked(db.conn(), TransactionBehavior::Immediate)?;
        report.generated = generate_all_active(db, now, self.reminders.horizon())?;
        report.expired = db.expire_pending_before(now - self.reminders.intake_window())?.len();
        for s in &sent {
            // The prescription may have been deleted while we were sending.
            if db.get_event(s.event_id)?.is_none() {
                tracing::debug!(event_id = s.event_id, "event gone; attempt not recorded");
                continue;
            }
            db.record_attempt(&NewAttempt {
                intake_event_id: s.event_id,
                channel: s.channel,
                attempt_at: now,
                success: s.success,
                details: s.details,
            })?;
        }
        tx.commit()?;

        tracing::info!(
            generated = report.generated,
            expired = report.expired,
            reminders_sent = report.reminders_sent,
            reminders_failed = report.reminders_failed,
            escalated = report.escalated_events,
            "tick complete"
        );
        Ok(report)
    }

    fn plan(&self, db: &Database, now: DateTime<Utc>) -> Result<Vec<Planned>> {
        let cutoff = now - self.reminders.intake_window();
        let sweep_from = (now - self.reminders.lookback()).max(cutoff);
        let mut plan = Vec::new();

        for view in db.pending_between(sweep_from, now)? {
            let minutes_since = view.event.minutes_since(now);
            // Counted before this run sends anything, so the last stage and
            // the escalation never share a tick.
            let prior = db.count_attempts(view.event.id, Channel::Push)?;

            if let Some(stage) = reminder_stage_due(
                minutes_since,
                prior,
                self.reminders.stage_spacing_minutes,
                self.reminders.stage_count,
            ) {
                let device_token = db
                    .get_patient(view.patient_id)?
                    .and_then(|p| p.push_destination().map(str::to_string));
                plan.push(Planned::Reminder {
                    event_id: view.event.id,
                    stage,
                    device_token,
                    medication: view.medication_name,
                });
                continue;
            }
            plan.extend(self.escalation_due(db, view, minutes_since, prior)?);
        }

        // Final escalation chance for events this run is about to expire.
        for view in db.pending_before(cutoff)? {
            let prior = db.count_attempts(view.event.id, Channel::Push)?;
            let minutes_since = view.event.minutes_since(now);
            plan.extend(self.escalation_due(db, view, minutes_since, prior)?);
        }

        Ok(plan)
    }

    fn escalation_due(
        &self,
        db: &Database,
        view: IntakeView,
        minutes_since: i64,
        prior_reminders: u32,
    ) -> Result<Option<Planned>> {
        let event_id = view.event.id;
        if minutes_since < i64::from(self.reminders.intake_window_minutes)
            || prior_reminders < self.reminders.stage_count
            || db.has_escalated(event_id)?
        {
            return Ok(None);
        }

        let contacts = db.contacts_for_patient(view.patient_id)?;
        let mut targets = Vec::new();
        for contact in &contacts {
            if let Some(email) = contact.email_address() {
                targets.push(Target::Email(email.to_string()));
            }
            if let Some(phone) = contact.phone_number() {
                targets.push(Target::Sms(phone.to_string()));
            }
        }
        if targets.is_empty() {
            tracing::info!(event_id, patient_id = view.patient_id, "no contacts to escalate to");
            return Ok(None);
        }

        Ok(Some(Planned::Escalation {
            event_id,
            medication: view.medication_name,
            targets,
        }))
    }

    fn send(&self, db: &Database, plan: Vec<Planned>, report: &mut TickReport) -> Result<Vec<Sent>> {
        let mut sent = Vec::new();

        for planned in plan {
            let event_id = planned.event_id();
            let still_pending = db
                .get_event(event_id)?
                .is_some_and(|e| e.status == IntakeStatus::Pending);
            if !still_pending {
                tracing::debug!(event_id, "resolved since planning; not sending");
                continue;
            }

            match planned {
                Planned::Reminder {
                    stage,
                    device_token,
                    medication,
                    ..
                } => {
                    let (success, details) = match device_token {
                        Some(token) => {
                            let ok = self.gateways.push.send(
                                &token,
                                REMINDER_TITLE,
                                &reminder_body(&medication),
                                &event_id.to_string(),
                            );
                            (ok, if ok { "sent" } else { "fail" })
                        }
                        None => (false, "no device token"),
                    };
                    if success {
                        report.reminders_sent += 1;
                    } else {
                        report.reminders_failed += 1;
                    }
                    tracing::debug!(event_id, stage, success, details, "primary reminder");
                    sent.push(Sent {
                        event_id,
                        channel: Channel::Push,
                        success,
                        details,
                    });
                }
                Planned::Escalation {
                    medication, targets, ..
                } => {
                    let text = alert_text(self.reminders.intake_window_minutes, &medication);
                    for target in &targets {
                        let (channel, ok) = match target {
                            Target::Email(to) => {
                                (Channel::Email, self.gateways.email.send(to, ALERT_SUBJECT, &text))
                            }
                            Target::Sms(to) => (Channel::Sms, self.gateways.sms.send(to, &text)),
                        };
                        if ok {
                            report.alerts_sent += 1;
                        } else {
                            report.alerts_failed += 1;
                        }
                        sent.push(Sent {
                            event_id,
                            channel,
                            success: ok,
                            details: if ok { "sent" } else { "fail" },
                        });
                    }
                    report.escalated_events += 1;
                    tracing::info!(event_id, targets = targets.len(), "escalated to contacts");
                }
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::IntakeStatus;
    use crate::notify::{EmailGateway, PushGateway, SmsGateway};
    use crate::patient::NewContact;
    use crate::storage::test_support::{seed_prescription, ts};
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    struct Fake {
        ok: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Fake {
        fn new(ok: bool) -> Arc<Self> {
            Arc::new(Self {
                ok,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PushGateway for Fake {
        fn send(&self, device_token: &str, title: &str, body: &str, correlation_id: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{device_token}|{title}|{body}|{correlation_id}"));
            self.ok
        }
    }

    impl EmailGateway for Fake {
        fn send(&self, to: &str, subject: &str, text: &str) -> bool {
            self.calls.lock().unwrap().push(format!("{to}|{subject}|{text}"));
            self.ok
        }
    }

    impl SmsGateway for Fake {
        fn send(&self, to: &str, text: &str) -> bool {
            self.calls.lock().unwrap().push(format!("{to}|{text}"));
            self.ok
        }
    }

    struct Harness {
        db: Database,
        tick: EscalationTick,
        push: Arc<Fake>,
        email: Arc<Fake>,
        sms: Arc<Fake>,
        patient_id: i64,
        prescription_id: i64,
    }

    fn harness(push_ok: bool) -> Harness {
        let db = Database::open_memory().unwrap();
        let (patient, rx) = seed_prescription(&db, "UTC", &[(8, 0)]);
        let (push, email, sms) = (Fake::new(push_ok), Fake::new(true), Fake::new(true));
        let tick = EscalationTick::new(
            RemindersConfig::default(),
            Gateways {
                push: push.clone(),
                email: email.clone(),
                sms: sms.clone(),
            },
        );
        Harness {
            db,
            tick,
            push,
            email,
            sms,
            patient_id: patient.id,
            prescription_id: rx.id,
        }
    }

    fn add_contact(h: &Harness, name: &str, email: Option<&str>, phone: Option<&str>) {
        h.db.insert_contact(
            h.patient_id,
            &NewContact {
                name: name.to_string(),
                email: email.map(str::to_string),
                phone: phone.map(str::to_string),
            },
        )
        .unwrap();
    }

    fn event_at(h: &Harness, at: &str) -> i64 {
        h.db.insert_event_if_absent(h.prescription_id, ts(at)).unwrap();
        h.db.events_for_prescription(h.prescription_id)
            .unwrap()
            .into_iter()
            .find(|e| e.scheduled_at == ts(at))
            .unwrap()
            .id
    }

    fn push_minutes(h: &Harness, event_id: i64, scheduled: DateTime<Utc>) -> Vec<i64> {
        h.db.attempts_for_event(event_id)
            .unwrap()
            .into_iter()
            .filter(|a| a.channel == Channel::Push)
            .map(|a| (a.attempt_at - scheduled).num_minutes())
            .collect()
    }

    #[test]
    fn stage_schedule() {
        assert_eq!(reminder_stage_due(0, 0, 15, 4), Some(0));
        assert_eq!(reminder_stage_due(14, 1, 15, 4), None);
        assert_eq!(reminder_stage_due(15, 1, 15, 4), Some(1));
        assert_eq!(reminder_stage_due(45, 3, 15, 4), Some(3));
        assert_eq!(reminder_stage_due(60, 4, 15, 4), None);
        assert_eq!(reminder_stage_due(-1, 0, 15, 4), None);
    }

    #[test]
    fn expiry_happens_strictly_after_the_window() {
        let h = harness(true);
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        h.tick.run(&h.db, ts("2024-01-01T08:59:00Z")).unwrap();
        assert_eq!(h.db.get_event(id).unwrap().unwrap().status, IntakeStatus::Pending);

        // scheduled_at == now - window is not yet before the cutoff.
        h.tick.run(&h.db, ts("2024-01-01T09:00:00Z")).unwrap();
        assert_eq!(h.db.get_event(id).unwrap().unwrap().status, IntakeStatus::Pending);

        let report = h.tick.run(&h.db, ts("2024-01-01T09:01:00Z")).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(h.db.get_event(id).unwrap().unwrap().status, IntakeStatus::Missed);
    }

    #[test]
    fn reminders_follow_the_stage_cadence() {
        let h = harness(true);
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        for minute in -5..=75 {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }

        assert_eq!(push_minutes(&h, id, scheduled), vec![0, 15, 30, 45]);
        let body = &h.push.calls()[0];
        assert_eq!(body, &format!("device-token|Intake reminder|Time to take: Metformin|{id}"));
    }

    #[test]
    fn late_first_tick_catches_up_one_stage_per_run() {
        let h = harness(true);
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        h.tick.run(&h.db, scheduled + Duration::minutes(40)).unwrap();
        h.tick.run(&h.db, scheduled + Duration::minutes(41)).unwrap();
        h.tick.run(&h.db, scheduled + Duration::minutes(42)).unwrap();
        // Stage 3 needs 45 minutes.
        h.tick.run(&h.db, scheduled + Duration::minutes(43)).unwrap();

        assert_eq!(push_minutes(&h, id, scheduled), vec![40, 41, 42]);
    }

    #[test]
    fn escalation_alerts_every_channel_of_every_contact_once() {
        let h = harness(true);
        add_contact(&h, "Full", Some("full@example.com"), Some("+111"));
        add_contact(&h, "Email only", Some("mail@example.com"), None);
        add_contact(&h, "Nothing", None, Some("  "));
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        for minute in 0..=90 {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }

        let attempts = h.db.attempts_for_event(id).unwrap();
        let channels: Vec<_> = attempts.iter().map(|a| a.channel).collect();
        assert_eq!(
            channels,
            vec![
                Channel::Push,
                Channel::Push,
                Channel::Push,
                Channel::Push,
                Channel::Email,
                Channel::Sms,
                Channel::Email,
            ]
        );
        let alert_minute = (attempts[4].attempt_at - scheduled).num_minutes();
        assert_eq!(alert_minute, 60);
        assert_eq!(
            h.email.calls(),
            vec![
                "full@example.com|Patient alert|No confirmation after 60 minutes for: Metformin",
                "mail@example.com|Patient alert|No confirmation after 60 minutes for: Metformin",
            ]
        );
        assert_eq!(h.sms.calls().len(), 1);
    }

    #[test]
    fn last_stage_and_escalation_never_share_a_tick() {
        let h = harness(true);
        add_contact(&h, "Full", Some("full@example.com"), None);
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        for minute in [40, 41, 42] {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }
        let report = h.tick.run(&h.db, scheduled + Duration::minutes(60)).unwrap();
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(report.escalated_events, 0);
        assert!(h.email.calls().is_empty());

        let report = h.tick.run(&h.db, scheduled + Duration::minutes(61)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.escalated_events, 1);
        assert_eq!(push_minutes(&h, id, scheduled), vec![40, 41, 42, 60]);
        let email = h
            .db
            .attempts_for_event(id)
            .unwrap()
            .into_iter()
            .find(|a| a.channel == Channel::Email)
            .unwrap();
        assert_eq!((email.attempt_at - scheduled).num_minutes(), 61);
    }

    #[test]
    fn escalation_does_not_depend_on_push_success() {
        let h = harness(false);
        add_contact(&h, "Full", Some("full@example.com"), Some("+111"));
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        for minute in 0..=61 {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }

        let attempts = h.db.attempts_for_event(id).unwrap();
        assert_eq!(attempts.iter().filter(|a| a.channel == Channel::Push && !a.success).count(), 4);
        assert_eq!(h.db.count_attempts(id, Channel::Email).unwrap(), 1);
        assert_eq!(h.db.count_attempts(id, Channel::Sms).unwrap(), 1);
    }

    #[test]
    fn expired_event_gets_its_final_escalation() {
        let h = harness(true);
        add_contact(&h, "Full", Some("full@example.com"), None);
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        // Reminders run, then the tick stalls across the escalation minute.
        for minute in [0, 15, 30, 45] {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }
        let report = h.tick.run(&h.db, scheduled + Duration::minutes(70)).unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.escalated_events, 1);
        assert_eq!(h.db.get_event(id).unwrap().unwrap().status, IntakeStatus::Missed);
        assert_eq!(h.db.count_attempts(id, Channel::Email).unwrap(), 1);
        assert_eq!(h.db.count_attempts(id, Channel::Push).unwrap(), 4);
    }

    #[test]
    fn missing_device_token_records_failure_without_calling_gateway() {
        let h = harness(true);
        h.db.set_device_token(h.patient_id, None).unwrap();
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        let report = h.tick.run(&h.db, ts("2024-01-01T08:00:00Z")).unwrap();

        assert_eq!(report.reminders_failed, 1);
        assert!(h.push.calls().is_empty());
        let attempts = h.db.attempts_for_event(id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].details.as_deref(), Some("no device token"));
    }

    #[test]
    fn confirmed_events_are_left_alone() {
        let h = harness(true);
        add_contact(&h, "Full", Some("full@example.com"), Some("+111"));
        let scheduled = ts("2024-01-01T08:00:00Z");
        let id = event_at(&h, "2024-01-01T08:00:00Z");

        h.tick.run(&h.db, scheduled).unwrap();
        h.db.set_confirmed(id, scheduled + Duration::minutes(5), None).unwrap();
        for minute in 6..=120 {
            h.tick.run(&h.db, scheduled + Duration::minutes(minute)).unwrap();
        }

        let event = h.db.get_event(id).unwrap().unwrap();
        assert_eq!(event.status, IntakeStatus::Confirmed);
        assert_eq!(h.db.attempts_for_event(id).unwrap().len(), 1);
    }

    #[test]
    fn tick_generates_upcoming_events() {
        let h = harness(true);
        let report = h.tick.run(&h.db, ts("2024-01-01T07:00:00Z")).unwrap();
        assert_eq!(report.generated, 1);
        let events = h.db.events_for_prescription(h.prescription_id).unwrap();
        assert_eq!(events[0].scheduled_at, ts("2024-01-01T08:00:00Z"));
    }

    #[test]
    fn run_once_skips_while_lease_is_held() {
        let h = harness(true);
        let cfg = TickConfig::default();
        let now = ts("2024-01-01T08:00:00Z");
        h.db.try_acquire_lease(TICK_LEASE, "other-node", now, Duration::seconds(30))
            .unwrap();

        let outcome = h.tick.run_once(&h.db, "me", now, &cfg).unwrap();
        assert_eq!(outcome, TickOutcome::Skipped);
        assert!(h.db.events_for_prescription(h.prescription_id).unwrap().is_empty());

        let outcome = h
            .tick
            .run_once(&h.db, "me", now + Duration::seconds(30), &cfg)
            .unwrap();
        assert!(matches!(outcome, TickOutcome::Ran(_)));
    }

    #[test]
    fn run_once_holds_lease_for_min_hold() {
        let h = harness(true);
        let cfg = TickConfig::default();
        let now = ts("2024-01-01T08:00:00Z");

        assert!(matches!(h.tick.run_once(&h.db, "a", now, &cfg).unwrap(), TickOutcome::Ran(_)));
        assert_eq!(
            h.tick
                .run_once(&h.db, "b", now + Duration::seconds(5), &cfg)
                .unwrap(),
            TickOutcome::Skipped
        );
        let (_, until) = h.db.lease_holder(TICK_LEASE).unwrap().unwrap();
        assert!(until >= now + Duration::seconds(10));
    }
}
