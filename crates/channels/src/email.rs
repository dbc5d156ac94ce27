//! Mail transports.
//!
//! `MailTransport` is the seam dispatch submits through. `ConsoleTransport`
//! writes messages to the log, which is what a development install wants;
//! `MemoryTransport` keeps an outbox and can be told to fail, for tests and
//! dry runs.

use std::collections::HashSet;

use drip_core::{DripError, DripResult};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::message::EmailMessage;

pub trait MailTransport: Send + Sync {
    /// Submit one message. Any error means the message was not accepted.
    fn send(&self, message: &EmailMessage) -> DripResult<()>;
}

#[derive(Debug, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        info!("Console mail transport initialized");
        Self
    }
}

impl MailTransport for ConsoleTransport {
    fn send(&self, message: &EmailMessage) -> DripResult<()> {
        if message.to.is_empty() {
            return Err(DripError::Transport("message has no recipients".to_string()));
        }
        info!(
            from = %message.from_header(),
            to = %message.to.join(", "),
            subject = %message.subject,
            html = message.html_body.is_some(),
            "Email"
        );
        debug!(body = %message.text_body, "Email text body");
        metrics::counter!("transport.console_messages").increment(1);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    outbox: Vec<EmailMessage>,
    failing: HashSet<String>,
    fail_all: bool,
}

/// Collects messages instead of delivering them.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message addressed to `recipient` until cleared.
    pub fn fail_for(&self, recipient: impl Into<String>) {
        self.state.lock().failing.insert(recipient.into());
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing.clear();
        state.fail_all = false;
    }

    pub fn outbox(&self) -> Vec<EmailMessage> {
        self.state.lock().outbox.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().outbox.len()
    }
}

impl MailTransport for MemoryTransport {
    fn send(&self, message: &EmailMessage) -> DripResult<()> {
        let mut state = self.state.lock();
        if state.fail_all || message.to.iter().any(|r| state.failing.contains(r)) {
            return Err(DripError::Transport(format!(
                "delivery to {} refused",
                message.to.join(", ")
            )));
        }
        state.outbox.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage::new("Hello", "news@example.com", to, "body")
    }

    #[test]
    fn test_memory_transport_records_messages() {
        let transport = MemoryTransport::new();
        transport.send(&message("a@example.com")).unwrap();
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.outbox()[0].to, vec!["a@example.com".to_string()]);
    }

    #[test]
    fn test_memory_transport_failure_injection() {
        let transport = MemoryTransport::new();
        transport.fail_for("bad@example.com");
        assert!(matches!(
            transport.send(&message("bad@example.com")),
            Err(DripError::Transport(_))
        ));
        transport.send(&message("good@example.com")).unwrap();
        transport.fail_all(true);
        assert!(transport.send(&message("good@example.com")).is_err());
        transport.clear_failures();
        transport.send(&message("bad@example.com")).unwrap();
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_console_transport_requires_recipients() {
        let mut msg = message("a@example.com");
        ConsoleTransport::new().send(&msg).unwrap();
        msg.to.clear();
        assert!(ConsoleTransport::new().send(&msg).is_err());
    }
}
