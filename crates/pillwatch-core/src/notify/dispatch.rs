//! Bounded fire-and-forget delivery.
//!
//! Producers enqueue with [`Dispatcher::dispatch`], which never waits: when
//! the queue is full or the worker is gone, the message is dropped and
//! logged. A single worker drains the queue and performs each send on
//! tokio's blocking pool.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Gateways;

/// A message waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Push {
        device_token: String,
        title: String,
        body: String,
        correlation_id: String,
    },
    Email {
        to: String,
        subject: String,
        text: String,
    },
    Sms {
        to: String,
        text: String,
    },
}

impl Outbound {
    fn channel(&self) -> &'static str {
        match self {
            Outbound::Push { .. } => "push",
            Outbound::Email { .. } => "email",
            Outbound::Sms { .. } => "sms",
        }
    }

    /// Deliver synchronously through the matching gateway.
    pub fn deliver(&self, gateways: &Gateways) -> bool {
        match self {
            Outbound::Push {
                device_token,
                title,
                body,
                correlation_id,
            } => gateways.push.send(device_token, title, body, correlation_id),
            Outbound::Email { to, subject, text } => gateways.email.send(to, subject, text),
            Outbound::Sms { to, text } => gateways.sms.send(to, text),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Outbound>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end its worker must drain.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create a dispatcher with its worker running on the current runtime.
    ///
    /// The worker exits once every `Dispatcher` clone is dropped and the
    /// queue is empty; await the handle to flush on shutdown.
    pub fn spawn(gateways: Gateways, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::new(capacity);
        let worker = tokio::spawn(run_worker(rx, gateways));
        (dispatcher, worker)
    }

    /// Enqueue without waiting. Returns `false` if the message was dropped.
    pub fn dispatch(&self, message: Outbound) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(channel = msg.channel(), "dispatch queue full; dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                tracing::warn!(channel = msg.channel(), "dispatch worker stopped; dropping message");
                false
            }
        }
    }
}

/// Drain `rx`, delivering each message on the blocking pool.
pub async fn run_worker(mut rx: mpsc::Receiver<Outbound>, gateways: Gateways) {
    while let Some(message) = rx.recv().await {
        let channel = message.channel();
        let gateways = gateways.clone();
        match tokio::task::spawn_blocking(move || message.deliver(&gateways)).await {
            Ok(sent) => tracing::debug!(channel, sent, "dispatched notification"),
            Err(e) => tracing::warn!(channel, error = %e, "dispatch task failed"),
        }
    }
    tracing::debug!("dispatch worker stopped");
}
