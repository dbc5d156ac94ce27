use std::fmt;

use chrono::{DateTime, Utc};
use drip_channels::EmailMessage;
use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::drip::RenderedEmail;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    #[default]
    Queued,
    Sent,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendState::Queued => f.write_str("queued"),
            SendState::Sent => f.write_str("sent"),
        }
    }
}

/// Describes a single valid state transition for a sent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SendState,
    pub to: SendState,
    pub trigger: &'static str,
}

/// Queued records move to sent once, on a successful dispatch. Sent is terminal.
pub const TRANSITIONS: &[StateTransition] = &[StateTransition {
    from: SendState::Queued,
    to: SendState::Sent,
    trigger: "dispatch_succeeded",
}];

pub fn can_transition(from: SendState, to: SendState) -> bool {
    TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

/// The durable record of one (drip, user) email. Content is captured when the
/// record is created and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    pub id: Uuid,
    pub drip_id: Uuid,
    pub user_id: Uuid,
    pub recipient: String,
    pub from_email: String,
    pub sender_name: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub state: SendState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SentRecord {
    pub fn queued(
        drip_id: Uuid,
        user_id: Uuid,
        recipient: impl Into<String>,
        from_email: impl Into<String>,
        sender_name: impl Into<String>,
        content: RenderedEmail,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            drip_id,
            user_id,
            recipient: recipient.into(),
            from_email: from_email.into(),
            sender_name: sender_name.into(),
            subject: content.subject,
            text_body: content.text_body,
            html_body: content.html_body,
            state: SendState::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.state == SendState::Queued
    }

    /// Compose the outbound message; html goes along as an alternative.
    pub fn message(&self) -> EmailMessage {
        EmailMessage::new(&self.subject, &self.from_email, &self.recipient, &self.text_body)
            .sender_name(&self.sender_name)
            .attach_html(&self.html_body)
    }

    /// Move to `to`, refusing anything the transition table does not allow.
    pub fn transition(&mut self, to: SendState) -> DripResult<()> {
        if !can_transition(self.state, to) {
            return Err(DripError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(html: &str) -> SentRecord {
        SentRecord::queued(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ada@example.com",
            "news@example.com",
            "News",
            RenderedEmail {
                subject: "Hi".into(),
                text_body: "Hello".into(),
                html_body: html.into(),
            },
        )
    }

    #[test]
    fn test_queued_to_sent_once() {
        let mut rec = record("");
        assert!(rec.is_queued());
        rec.transition(SendState::Sent).unwrap();
        assert_eq!(rec.state, SendState::Sent);
        let err = rec.transition(SendState::Sent).unwrap_err();
        assert!(matches!(err, DripError::InvalidTransition { .. }));
        assert!(rec.transition(SendState::Queued).is_err());
    }

    #[test]
    fn test_message_carries_captured_content() {
        let msg = record("<p>Hello</p>").message();
        assert_eq!(msg.subject, "Hi");
        assert_eq!(msg.to, vec!["ada@example.com".to_string()]);
        assert_eq!(msg.from_header(), "News <news@example.com>");
        assert_eq!(msg.html_body.as_deref(), Some("<p>Hello</p>"));
        assert!(record("").message().html_body.is_none());
    }
}
