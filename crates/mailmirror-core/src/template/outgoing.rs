//! Outgoing message representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mailbox::RecipientRole;

/// An email message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// BCC addresses.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: impl Into<String>) -> Self {
        self.cc.push(recipient.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: impl Into<String>) -> Self {
        self.bcc.push(recipient.into());
        self
    }

    /// Adds a recipient under the given role.
    pub fn push_recipient(&mut self, role: RecipientRole, address: impl Into<String>) {
        match role {
            RecipientRole::To => self.to.push(address.into()),
            RecipientRole::Cc => self.cc.push(address.into()),
            RecipientRole::Bcc => self.bcc.push(address.into()),
        }
    }

    /// Builds the RFC 5322 formatted message.
    ///
    /// Bcc recipients are listed only when `include_bcc` is set, which is
    /// what a copy kept in Drafts or Sent wants.
    #[must_use]
    pub fn to_rfc5322(&self, date: DateTime<Utc>, include_bcc: bool) -> String {
        use std::fmt::Write;

        let mut message = String::new();

        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());
        let _ = write!(message, "From: {}\r\n", self.from);

        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", self.to.join(", "));
        }

        if !self.cc.is_empty() {
            let _ = write!(message, "Cc: {}\r\n", self.cc.join(", "));
        }

        if include_bcc && !self.bcc.is_empty() {
            let _ = write!(message, "Bcc: {}\r\n", self.bcc.join(", "));
        }

        let _ = write!(message, "Subject: {}\r\n", self.subject);
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");

        // Empty line between headers and body
        message.push_str("\r\n");

        message.push_str(&self.body.replace("\r\n", "\n").replace('\n', "\r\n"));

        message
    }

    /// Returns all recipients (to, cc, bcc).
    #[must_use]
    pub fn all_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mailbox::Message;
    use crate::remote::RawMessage;

    #[test]
    fn test_rfc5322_parses_back() {
        let outgoing = OutgoingMessage::new("me@example.com", "Hello", "line one\nline two")
            .to("a@example.com")
            .cc("b@example.com")
            .bcc("c@example.com");
        let date = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let raw = RawMessage {
            id: "1".to_string(),
            data: outgoing.to_rfc5322(date, true).into_bytes(),
            seen: true,
            received_at: date,
        };
        let message = Message::from_raw(&raw).unwrap();

        assert_eq!(message.header.subject, "Hello");
        assert_eq!(message.header.to[0].email, "a@example.com");
        assert_eq!(message.header.cc[0].email, "b@example.com");
        assert_eq!(message.header.bcc[0].email, "c@example.com");
        assert!(message.body.text.starts_with("line one\nline two"));
    }

    #[test]
    fn test_bcc_hidden_by_default() {
        let outgoing = OutgoingMessage::new("me@example.com", "s", "b").bcc("hidden@example.com");
        let text = outgoing.to_rfc5322(Utc::now(), false);
        assert!(!text.contains("hidden@example.com"));
        assert_eq!(outgoing.all_recipients(), vec!["hidden@example.com"]);
    }
}
