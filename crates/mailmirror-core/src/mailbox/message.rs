//! Message model and conversion from raw store data.

use std::fmt;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use serde::{Deserialize, Serialize};

use crate::remote::RawMessage;
use crate::template::extract_tag_names;
use crate::{Error, Result};

/// Store-assigned message identifier. Opaque and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new message ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Recipient role within a message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecipientRole {
    /// Primary recipient.
    To,
    /// Carbon copy.
    Cc,
    /// Blind carbon copy.
    Bcc,
}

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name.
    pub name: Option<String>,
    /// Address (local@domain).
    pub email: String,
}

impl EmailAddress {
    /// Create an address without a display name.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.email),
            _ => f.write_str(&self.email),
        }
    }
}

/// Message header fields kept in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Sender.
    pub from: Option<EmailAddress>,
    /// To recipients.
    pub to: Vec<EmailAddress>,
    /// Cc recipients.
    pub cc: Vec<EmailAddress>,
    /// Bcc recipients (only visible on drafts and sent mail).
    pub bcc: Vec<EmailAddress>,
    /// Subject line.
    pub subject: String,
    /// When the store received the message.
    pub received_at: DateTime<Utc>,
}

/// Rendered message body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Body {
    /// Plain text rendering of the body.
    pub text: String,
    /// Number of attachments.
    pub attachment_count: usize,
    /// Attachment file names, where present.
    pub attachment_names: Vec<String>,
}

/// A message as mirrored from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Header fields.
    pub header: Header,
    /// Rendered body.
    pub body: Body,
    /// Placeholder tag names found in the body.
    pub tags: Vec<String>,
    /// Whether the message has been read.
    pub is_read: bool,
}

impl Message {
    /// Parse a raw store message into its snapshot representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the bytes are not a parseable
    /// RFC 5322 message.
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let id = MessageId::new(raw.id.clone());
        let parsed = MessageParser::default()
            .parse(raw.data.as_slice())
            .ok_or_else(|| Error::MalformedMessage(id.clone()))?;

        let text = parsed
            .body_text(0)
            .map(|t| t.replace("\r\n", "\n"))
            .unwrap_or_default();
        let tags = extract_tag_names(&text);

        let attachment_names = parsed
            .attachments()
            .filter_map(|part| part.attachment_name().map(String::from))
            .collect();

        Ok(Self {
            id,
            header: Header {
                from: parsed
                    .from()
                    .and_then(|addr| convert_addresses(addr).into_iter().next()),
                to: parsed.to().map(convert_addresses).unwrap_or_default(),
                cc: parsed.cc().map(convert_addresses).unwrap_or_default(),
                bcc: parsed.bcc().map(convert_addresses).unwrap_or_default(),
                subject: parsed.subject().unwrap_or_default().to_string(),
                received_at: raw.received_at,
            },
            body: Body {
                text,
                attachment_count: parsed.attachment_count(),
                attachment_names,
            },
            tags,
            is_read: raw.seen,
        })
    }

    /// Received timestamp, the primary snapshot ordering key.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.header.received_at
    }
}

fn convert_addresses(address: &mail_parser::Address<'_>) -> Vec<EmailAddress> {
    let convert = |addr: &mail_parser::Addr<'_>| {
        addr.address.as_ref().map(|email| EmailAddress {
            name: addr.name.as_ref().map(ToString::to_string),
            email: email.to_string(),
        })
    };

    match address {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(convert).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter().filter_map(convert))
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw(data: &str) -> RawMessage {
        RawMessage {
            id: "42".to_string(),
            data: data.as_bytes().to_vec(),
            seen: true,
            received_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_from_raw_extracts_header_and_tags() {
        let message = Message::from_raw(&raw(
            "From: Jane Doe <jane@example.com>\r\n\
             To: a@example.com, b@example.com\r\n\
             Cc: c@example.com\r\n\
             Subject: Invoice\r\n\
             \r\n\
             Dear <!Name!>,\r\nyour items:\r\n<!Items!>\r\n",
        ))
        .unwrap();

        assert_eq!(message.id.as_str(), "42");
        assert_eq!(message.header.subject, "Invoice");
        assert_eq!(message.header.from.as_ref().unwrap().email, "jane@example.com");
        assert_eq!(message.header.from.as_ref().unwrap().name.as_deref(), Some("Jane Doe"));
        assert_eq!(message.header.to.len(), 2);
        assert_eq!(message.header.cc[0].email, "c@example.com");
        assert_eq!(message.tags, vec!["Name".to_string(), "Items".to_string()]);
        assert!(message.is_read);
        assert_eq!(message.body.attachment_count, 0);
        assert!(!message.body.text.contains('\r'));
    }

    #[test]
    fn test_from_raw_counts_attachments() {
        let message = Message::from_raw(&raw(
            "From: jane@example.com\r\n\
             Subject: Report\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             See attached.\r\n\
             --XYZ\r\n\
             Content-Type: application/pdf\r\n\
             Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             JVBERi0xLjQK\r\n\
             --XYZ--\r\n",
        ))
        .unwrap();

        assert_eq!(message.body.attachment_count, 1);
        assert_eq!(message.body.attachment_names, vec!["report.pdf".to_string()]);
        assert!(message.body.text.contains("See attached."));
    }

    #[test]
    fn test_address_display() {
        let named = EmailAddress {
            name: Some("Jane".to_string()),
            email: "jane@example.com".to_string(),
        };
        assert_eq!(named.to_string(), "Jane <jane@example.com>");
        assert_eq!(EmailAddress::new("x@example.com").to_string(), "x@example.com");
    }
}
