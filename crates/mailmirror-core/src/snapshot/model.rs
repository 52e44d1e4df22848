//! Snapshot data model.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::mailbox::{Message, MessageId};

/// Ordering key: newest first, ties broken by ascending id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SnapshotKey {
    received_at: DateTime<Utc>,
    id: MessageId,
}

impl Ord for SnapshotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .received_at
            .cmp(&self.received_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SnapshotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Last-known contents of one mailbox.
///
/// Iteration yields messages newest first. Serializes as an ordered list of
/// messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<SnapshotKey, Message>,
    index: HashMap<MessageId, DateTime<Utc>>,
}

impl Snapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a message with this id is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a message by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let received_at = *self.index.get(id)?;
        self.entries.get(&SnapshotKey {
            received_at,
            id: id.clone(),
        })
    }

    /// Ids of every message, in snapshot order.
    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.entries.keys().map(|key| &key.id)
    }

    /// Messages in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }

    /// Insert a message, replacing any previous message with the same id.
    pub fn insert(&mut self, message: Message) -> Option<Message> {
        let previous = self.remove(&message.id);
        let key = SnapshotKey {
            received_at: message.received_at(),
            id: message.id.clone(),
        };
        self.index.insert(key.id.clone(), key.received_at);
        self.entries.insert(key, message);
        previous
    }

    /// Remove a message by id.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let received_at = self.index.remove(id)?;
        self.entries.remove(&SnapshotKey {
            received_at,
            id: id.clone(),
        })
    }

    /// Update the read flag of a message. Returns false if it is absent.
    pub fn set_read(&mut self, id: &MessageId, is_read: bool) -> bool {
        let Some(received_at) = self.index.get(id).copied() else {
            return false;
        };
        self.entries
            .get_mut(&SnapshotKey {
                received_at,
                id: id.clone(),
            })
            .map(|message| message.is_read = is_read)
            .is_some()
    }
}

impl FromIterator<Message> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for message in iter {
            snapshot.insert(message);
        }
        snapshot
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Message>::deserialize(deserializer).map(Self::from_iter)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::mailbox::{Body, Header};

    pub(crate) fn message(id: &str, ts: i64) -> Message {
        Message {
            id: MessageId::new(id),
            header: Header {
                from: None,
                to: Vec::new(),
                cc: Vec::new(),
                bcc: Vec::new(),
                subject: format!("Message {id}"),
                received_at: DateTime::from_timestamp(ts, 0).unwrap(),
            },
            body: Body::default(),
            tags: Vec::new(),
            is_read: false,
        }
    }

    fn order(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.ids().map(MessageId::as_str).collect()
    }

    #[test]
    fn test_orders_newest_first_with_id_tiebreak() {
        let snapshot: Snapshot = [
            message("b", 100),
            message("c", 300),
            message("a", 100),
            message("d", 200),
        ]
        .into_iter()
        .collect();

        assert_eq!(order(&snapshot), vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(message("a", 100));
        let previous = snapshot.insert(message("a", 500));

        assert_eq!(snapshot.len(), 1);
        assert!(previous.is_some());
        assert_eq!(snapshot.get(&MessageId::new("a")).unwrap().received_at().timestamp(), 500);
    }

    #[test]
    fn test_remove_and_set_read() {
        let mut snapshot: Snapshot = [message("a", 1), message("b", 2)].into_iter().collect();

        assert!(snapshot.set_read(&MessageId::new("a"), true));
        assert!(snapshot.get(&MessageId::new("a")).unwrap().is_read);
        assert!(!snapshot.set_read(&MessageId::new("zz"), true));

        assert!(snapshot.remove(&MessageId::new("b")).is_some());
        assert!(snapshot.remove(&MessageId::new("b")).is_none());
        assert_eq!(order(&snapshot), vec!["a"]);
    }

    #[test]
    fn test_serializes_in_order() {
        let snapshot: Snapshot = [message("x", 1), message("y", 2)].into_iter().collect();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();

        assert!(json.find("\"y\"").unwrap() < json.find("\"x\"").unwrap());
        assert_eq!(back, snapshot);
    }
}
