//! Notification gateways and the fire-and-forget dispatcher.
//!
//! The escalation tick calls gateways synchronously and records each
//! outcome in the attempt ledger. Request paths that must not wait on the
//! network go through [`dispatch::Dispatcher`] instead.

pub mod dispatch;
pub mod email;
pub mod push;
pub mod sms;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use crate::storage::GatewaysConfig;

pub use dispatch::{Dispatcher, Outbound};
pub use email::SendGridEmailGateway;
pub use push::FcmPushGateway;
pub use sms::TwilioSmsGateway;
pub use traits::{EmailGateway, PushGateway, SmsGateway, Unconfigured};

/// Title of every primary reminder.
pub const REMINDER_TITLE: &str = "Intake reminder";
/// Subject of every contact alert email.
pub const ALERT_SUBJECT: &str = "Patient alert";

pub fn reminder_body(medication_name: &str) -> String {
    format!("Time to take: {medication_name}")
}

pub fn alert_text(intake_window_minutes: u32, medication_name: &str) -> String {
    format!("No confirmation after {intake_window_minutes} minutes for: {medication_name}")
}

/// The three sinks the engine talks to.
#[derive(Clone)]
pub struct Gateways {
    pub push: Arc<dyn PushGateway>,
    pub email: Arc<dyn EmailGateway>,
    pub sms: Arc<dyn SmsGateway>,
}

impl Gateways {
    /// Build HTTP gateways for every configured section; the rest report
    /// failure without sending.
    pub fn from_config(config: &GatewaysConfig) -> Self {
        let timeout = config.timeout();
        let push: Arc<dyn PushGateway> = match &config.push {
            Some(c) => Arc::new(FcmPushGateway::new(c.clone(), timeout)),
            None => Arc::new(Unconfigured { channel: "push" }),
        };
        let email: Arc<dyn EmailGateway> = match &config.email {
            Some(c) => Arc::new(SendGridEmailGateway::new(c.clone(), timeout)),
            None => Arc::new(Unconfigured { channel: "email" }),
        };
        let sms: Arc<dyn SmsGateway> = match &config.sms {
            Some(c) => Arc::new(TwilioSmsGateway::new(c.clone(), timeout)),
            None => Arc::new(Unconfigured { channel: "sms" }),
        };
        Self { push, email, sms }
    }
}

/// Blocking client for one send. Built per call so that it is created and
/// dropped on the thread doing the blocking I/O.
fn http_client(timeout: Duration) -> Option<reqwest::blocking::Client> {
    match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build http client");
            None
        }
    }
}

/// Collapse an HTTP outcome into the gateway success flag.
fn report(
    channel: &'static str,
    result: reqwest::Result<reqwest::blocking::Response>,
) -> bool {
    match result {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(channel, status = resp.status().as_u16(), "notification sent");
            true
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            tracing::warn!(channel, status = status.as_u16(), body = %body, "gateway rejected notification");
            false
        }
        Err(e) => {
            tracing::warn!(channel, error = %e, timeout = e.is_timeout(), "gateway request failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PushGatewayConfig;

    #[test]
    fn message_texts() {
        assert_eq!(reminder_body("Metformin"), "Time to take: Metformin");
        assert_eq!(
            alert_text(60, "Metformin"),
            "No confirmation after 60 minutes for: Metformin"
        );
    }

    #[test]
    fn unconfigured_channels_report_failure() {
        let gateways = Gateways::from_config(&GatewaysConfig::default());
        assert!(!gateways.push.send("tok", "t", "b", "1"));
        assert!(!gateways.email.send("a@b.c", "s", "t"));
        assert!(!gateways.sms.send("+1", "t"));
    }

    #[test]
    fn configured_push_reaches_endpoint() {
        let mut server = mockito::Server::new();
        let mock = server.mock("POST", "/push").with_status(200).create();
        let config = GatewaysConfig {
            push: Some(PushGatewayConfig {
                endpoint: format!("{}/push", server.url()),
                server_key: "k".to_string(),
            }),
            ..GatewaysConfig::default()
        };
        let gateways = Gateways::from_config(&config);
        assert!(gateways.push.send("tok", "t", "b", "1"));
        mock.assert();
    }
}
