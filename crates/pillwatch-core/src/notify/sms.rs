//! Twilio-style SMS.

use std::time::Duration;

use super::traits::SmsGateway;
use super::{http_client, report};
use crate::storage::SmsGatewayConfig;

pub struct TwilioSmsGateway {
    config: SmsGatewayConfig,
    timeout: Duration,
}

impl TwilioSmsGateway {
    pub fn new(config: SmsGatewayConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

impl SmsGateway for TwilioSmsGateway {
    fn send(&self, to: &str, text: &str) -> bool {
        let c = &self.config;
        if c.account_sid.is_empty() || c.auth_token.is_empty() || c.from.is_empty() {
            tracing::warn!(channel = "sms", "account, token or sender missing; not sending");
            return false;
        }
        let Some(client) = http_client(self.timeout) else {
            return false;
        };

        let result = client
            .post(self.messages_url())
            .basic_auth(&c.account_sid, Some(&c.auth_token))
            .form(&[("To", to), ("From", c.from.as_str()), ("Body", text)])
            .send();
        report("sms", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn gateway(base_url: String) -> TwilioSmsGateway {
        TwilioSmsGateway::new(
            SmsGatewayConfig {
                base_url,
                account_sid: "AC123".to_string(),
                auth_token: "token".to_string(),
                from: "+15550000".to_string(),
            },
            Duration::from_secs(2),
        )
    }

    #[test]
    fn posts_form_to_account_messages() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            // base64("AC123:token")
            .match_header("authorization", "Basic QUMxMjM6dG9rZW4=")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("To".into(), "+212600000000".into()),
                Matcher::UrlEncoded("From".into(), "+15550000".into()),
                Matcher::UrlEncoded("Body".into(), "hello".into()),
            ]))
            .with_status(201)
            .create();

        let sms = gateway(format!("{}/", server.url()));
        assert!(sms.send("+212600000000", "hello"));
        mock.assert();
    }

    #[test]
    fn rejected_number_is_false() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            .with_status(400)
            .create();
        let sms = gateway(server.url());
        assert!(!sms.send("not-a-number", "hello"));
    }
}
