//! FCM-style push over HTTP.

use serde_json::json;
use std::time::Duration;

use super::traits::PushGateway;
use super::{http_client, report};
use crate::storage::PushGatewayConfig;

pub struct FcmPushGateway {
    config: PushGatewayConfig,
    timeout: Duration,
}

impl FcmPushGateway {
    pub fn new(config: PushGatewayConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

impl PushGateway for FcmPushGateway {
    fn send(&self, device_token: &str, title: &str, body: &str, correlation_id: &str) -> bool {
        if self.config.server_key.is_empty() {
            tracing::warn!(channel = "push", "server key missing; not sending");
            return false;
        }
        let Some(client) = http_client(self.timeout) else {
            return false;
        };

        let payload = json!({
            "to": device_token,
            "notification": { "title": title, "body": body },
            "data": { "intakeId": correlation_id },
        });
        let result = client
            .post(&self.config.endpoint)
            .header("Authorization", format!("key={}", self.config.server_key))
            .json(&payload)
            .send();
        report("push", result)
    }
}
