//! Notification sink traits.
//!
//! Every sink reports a plain success flag. Transport failures, non-2xx
//! responses and missing configuration all come back as `false` after a
//! `warn` log; callers record the flag in the attempt ledger and move on.
//! Implementations are synchronous and must only be called from a thread
//! that may block.

/// Patient-facing push notifications; the primary reminder channel.
pub trait PushGateway: Send + Sync {
    /// `correlation_id` travels in the data payload so that the client app
    /// can tie the notification back to an intake event.
    fn send(&self, device_token: &str, title: &str, body: &str, correlation_id: &str) -> bool;
}

/// Contact alerts by email.
pub trait EmailGateway: Send + Sync {
    fn send(&self, to: &str, subject: &str, text: &str) -> bool;
}

/// Contact alerts by SMS.
pub trait SmsGateway: Send + Sync {
    fn send(&self, to: &str, text: &str) -> bool;
}

/// Stand-in for a channel that has no configuration section.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured {
    pub channel: &'static str,
}

impl Unconfigured {
    fn refuse(&self) -> bool {
        tracing::warn!(channel = self.channel, "gateway not configured; dropping message");
        false
    }
}

impl PushGateway for Unconfigured {
    fn send(&self, _device_token: &str, _title: &str, _body: &str, _correlation_id: &str) -> bool {
        self.refuse()
    }
}

impl EmailGateway for Unconfigured {
    fn send(&self, _to: &str, _subject: &str, _text: &str) -> bool {
        self.refuse()
    }
}

impl SmsGateway for Unconfigured {
    fn send(&self, _to: &str, _text: &str) -> bool {
        self.refuse()
    }
}
