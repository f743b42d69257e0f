//! SendGrid-style transactional email.

use serde_json::json;
use std::time::Duration;

use super::traits::EmailGateway;
use super::{http_client, report};
use crate::storage::EmailGatewayConfig;

pub struct SendGridEmailGateway {
    config: EmailGatewayConfig,
    timeout: Duration,
}

impl SendGridEmailGateway {
    pub fn new(config: EmailGatewayConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

impl EmailGateway for SendGridEmailGateway {
    fn send(&self, to: &str, subject: &str, text: &str) -> bool {
        if self.config.api_key.is_empty() || self.config.from.is_empty() {
            tracing::warn!(channel = "email", "api key or sender missing; not sending");
            return false;
        }
        let Some(client) = http_client(self.timeout) else {
            return false;
        };

        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.config.from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": text }],
        });
        let result = client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send();
        report("email", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn gateway(endpoint: String) -> SendGridEmailGateway {
        SendGridEmailGateway::new(
            EmailGatewayConfig {
                endpoint,
                api_key: "sg-key".to_string(),
                from: "alerts@pillwatch.test".to_string(),
            },
            Duration::from_secs(2),
        )
    }

    #[test]
    fn posts_mail_with_bearer_key() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v3/mail/send")
            .match_header("authorization", "Bearer sg-key")
            .match_body(Matcher::PartialJson(json!({
                "personalizations": [{ "to": [{ "email": "son@example.com" }] }],
                "from": { "email": "alerts@pillwatch.test" },
                "subject": "Patient alert",
            })))
            .with_status(202)
            .create();

        let email = gateway(format!("{}/v3/mail/send", server.url()));
        assert!(email.send("son@example.com", "Patient alert", "No confirmation"));
        mock.assert();
    }

    #[test]
    fn server_error_is_false() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("POST", "/v3/mail/send").with_status(500).create();
        let email = gateway(format!("{}/v3/mail/send", server.url()));
        assert!(!email.send("son@example.com", "s", "t"));
    }
}
