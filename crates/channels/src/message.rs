use serde::{Deserialize, Serialize};

/// An outbound email: a plain-text body with an optional html alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    pub from_email: String,
    pub sender_name: String,
    pub to: Vec<String>,
    pub text_body: String,
    pub html_body: Option<String>,
}

impl EmailMessage {
    pub fn new(
        subject: impl Into<String>,
        from_email: impl Into<String>,
        to: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            from_email: from_email.into(),
            sender_name: String::new(),
            to: vec![to.into()],
            text_body: text_body.into(),
            html_body: None,
        }
    }

    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    /// Attach an html alternative. Empty bodies are ignored.
    pub fn attach_html(mut self, html: impl Into<String>) -> Self {
        let html = html.into();
        if !html.trim().is_empty() {
            self.html_body = Some(html);
        }
        self
    }

    /// `Name <addr>` when a display name is set, otherwise the bare address.
    pub fn from_header(&self) -> String {
        if self.sender_name.is_empty() {
            self.from_email.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.from_email)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_alternative_only_when_present() {
        let plain = EmailMessage::new("s", "a@x.io", "b@x.io", "body").attach_html("  ");
        assert!(plain.html_body.is_none());
        let rich = EmailMessage::new("s", "a@x.io", "b@x.io", "body").attach_html("<p>hi</p>");
        assert_eq!(rich.html_body.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_from_header_includes_display_name() {
        let msg = EmailMessage::new("s", "news@x.io", "b@x.io", "body");
        assert_eq!(msg.from_header(), "news@x.io");
        assert_eq!(msg.sender_name("Newsletter").from_header(), "Newsletter <news@x.io>");
    }
}
