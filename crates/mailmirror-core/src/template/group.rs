//! Recipient grouping and grouped dispatch.
//!
//! A templated message is sent once per distinct set of tag values rather
//! than once per recipient: recipients whose values fingerprint identically
//! share one rendered body.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::model::{Tag, TagValue, TagValues, TemplateMessage, TemplateRecipient};
use super::outgoing::OutgoingMessage;
use super::placeholder::{effective_tags, render_body};
use crate::mailbox::RecipientRole;
use crate::remote::{MessageSender, RemoteError};
use crate::{Error, Result};

/// One (address, role) pair of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupRecipient {
    /// Email address as written by the user.
    pub address: String,
    /// Role the address was listed under.
    pub role: RecipientRole,
}

/// Recipients sharing one tag-value fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientGroup {
    /// Hex SHA-256 over the group's ordered tag values.
    pub fingerprint: String,
    /// Members, in the order they were listed.
    pub recipients: Vec<GroupRecipient>,
    /// The shared values, restricted to the tags in use.
    pub values: TagValues,
}

/// A rendered message addressed to one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    /// Members of the group.
    pub recipients: Vec<GroupRecipient>,
    /// Message to dispatch.
    pub message: OutgoingMessage,
}

/// Outcome of dispatching one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Members of the group.
    pub recipients: Vec<GroupRecipient>,
    /// The message that was dispatched.
    pub message: OutgoingMessage,
    /// Transport error, if delivery failed.
    pub error: Option<RemoteError>,
}

impl DispatchResult {
    /// Returns true if the transport accepted the message.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        self.error.is_none()
    }
}

fn address_key(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Every (address, role) pair of the message, duplicates removed.
fn occurrences(message: &TemplateMessage) -> Vec<(RecipientRole, &TemplateRecipient)> {
    let mut seen = HashSet::new();
    [
        (RecipientRole::To, &message.to),
        (RecipientRole::Cc, &message.cc),
        (RecipientRole::Bcc, &message.bcc),
    ]
    .into_iter()
    .flat_map(|(role, list)| list.iter().map(move |recipient| (role, recipient)))
    .filter(|(role, recipient)| seen.insert((address_key(&recipient.address), *role)))
    .collect()
}

/// Hex SHA-256 over the values of `tags`, in order.
#[must_use]
pub fn fingerprint(tags: &[Tag], values: &TagValues) -> String {
    let mut hasher = Sha256::new();
    for tag in tags {
        hasher.update((tag.name.len() as u64).to_le_bytes());
        hasher.update(tag.name.as_bytes());
        match values.get(&tag.name) {
            None => hasher.update(b"-"),
            Some(TagValue::Single(value)) => {
                hasher.update(b"s");
                hasher.update((value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
            Some(TagValue::List(entries)) => {
                hasher.update(b"l");
                hasher.update((entries.len() as u64).to_le_bytes());
                for entry in entries {
                    hasher.update((entry.len() as u64).to_le_bytes());
                    hasher.update(entry.as_bytes());
                }
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Partition the recipients of `message` by their values for `tags`.
///
/// An address listed under several roles needs values only once: the first
/// occurrence carrying a value for one of `tags` lends its values to every
/// other occurrence.
#[must_use]
pub fn group_recipients(message: &TemplateMessage, tags: &[Tag]) -> Vec<RecipientGroup> {
    let occurrences = occurrences(message);

    let mut assigned: HashMap<String, &TagValues> = HashMap::new();
    for (_, recipient) in &occurrences {
        if recipient.has_values_for(tags) {
            assigned
                .entry(address_key(&recipient.address))
                .or_insert(&recipient.values);
        }
    }

    let mut groups: Vec<RecipientGroup> = Vec::new();
    let mut by_fingerprint: HashMap<String, usize> = HashMap::new();

    for (role, recipient) in occurrences {
        let values = assigned
            .get(&address_key(&recipient.address))
            .copied()
            .unwrap_or(&recipient.values);
        let fingerprint = fingerprint(tags, values);

        let index = *by_fingerprint
            .entry(fingerprint.clone())
            .or_insert_with(|| {
                groups.push(RecipientGroup {
                    fingerprint,
                    recipients: Vec::new(),
                    values: values
                        .iter()
                        .filter(|(name, _)| tags.iter().any(|tag| &tag.name == *name))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                });
                groups.len() - 1
            });

        groups[index].recipients.push(GroupRecipient {
            address: recipient.address.clone(),
            role,
        });
    }

    groups
}

/// Render one message per recipient group without sending anything.
///
/// # Errors
///
/// Returns [`Error::EmptyTagValue`] naming the first recipient and tag that
/// lack a value. Nothing is planned in that case.
pub fn plan_grouped_send(message: &TemplateMessage) -> Result<Vec<PlannedSend>> {
    let tags = effective_tags(&message.body, &message.tags);

    if tags.is_empty() {
        let mut outgoing = OutgoingMessage::new(&message.from, &message.subject, &message.body);
        let recipients: Vec<GroupRecipient> = occurrences(message)
            .into_iter()
            .map(|(role, recipient)| GroupRecipient {
                address: recipient.address.clone(),
                role,
            })
            .collect();
        for recipient in &recipients {
            outgoing.push_recipient(recipient.role, &recipient.address);
        }
        return Ok(vec![PlannedSend {
            recipients,
            message: outgoing,
        }]);
    }

    let groups = group_recipients(message, &tags);

    for group in &groups {
        for tag in &tags {
            let missing = group.values.get(&tag.name).is_none_or(TagValue::is_empty);
            if missing {
                let address = group
                    .recipients
                    .first()
                    .map(|r| r.address.clone())
                    .unwrap_or_default();
                return Err(Error::EmptyTagValue {
                    address,
                    tag: tag.name.clone(),
                });
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let body = render_body(&message.body, &tags, &group.values);
            let mut outgoing = OutgoingMessage::new(&message.from, &message.subject, body);
            for recipient in &group.recipients {
                outgoing.push_recipient(recipient.role, &recipient.address);
            }
            PlannedSend {
                recipients: group.recipients,
                message: outgoing,
            }
        })
        .collect())
}

/// Personalize `message` per recipient group and dispatch each group.
///
/// Validation happens before the first dispatch, so a missing value means
/// nothing is sent. Transport failures are reported per group and do not
/// stop the remaining groups.
///
/// # Errors
///
/// Returns [`Error::EmptyTagValue`] if any recipient lacks a value.
pub async fn send_grouped<S: MessageSender>(
    sender: &S,
    message: &TemplateMessage,
) -> Result<Vec<DispatchResult>> {
    let planned = plan_grouped_send(message)?;
    info!(
        "Sending '{}' as {} message(s)",
        message.subject,
        planned.len()
    );

    let mut results = Vec::with_capacity(planned.len());
    for send in planned {
        let error = sender.send(&send.message).await.err();
        if let Some(e) = &error {
            warn!("Dispatch to {} recipient(s) failed: {}", send.recipients.len(), e);
        }
        results.push(DispatchResult {
            recipients: send.recipients,
            message: send.message,
            error,
        });
    }

    Ok(results)
}
