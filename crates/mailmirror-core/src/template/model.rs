//! Template data models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bullet style for list placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulletStyle {
    /// `• item`
    #[default]
    Round,
    /// `▪ item`
    Square,
    /// `1. item`
    Numbered,
    /// `a. item`
    Lettered,
}

impl BulletStyle {
    /// Marker for the entry at zero-based `index`, including trailing space.
    #[must_use]
    pub fn marker(self, index: usize) -> String {
        match self {
            Self::Round => "\u{2022} ".to_string(),
            Self::Square => "\u{25aa} ".to_string(),
            Self::Numbered => format!("{}. ", index + 1),
            Self::Lettered => format!("{}. ", letters(index)),
        }
    }
}

/// `0 -> a`, `25 -> z`, `26 -> aa`, `27 -> ab`, ...
fn letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        // index % 26 < 26, so the cast cannot truncate
        #[allow(clippy::cast_possible_truncation)]
        out.push(b'a' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// How a placeholder is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagKind {
    /// One value substituted verbatim.
    Single,
    /// An ordered list rendered as bullet lines.
    List(BulletStyle),
}

/// A placeholder declared by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Name used in `<!name!>`.
    pub name: String,
    /// Kind of value expected.
    pub kind: TagKind,
}

impl Tag {
    /// A single-value tag.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TagKind::Single,
        }
    }

    /// A list tag with the given bullet style.
    #[must_use]
    pub fn list(name: impl Into<String>, style: BulletStyle) -> Self {
        Self {
            name: name.into(),
            kind: TagKind::List(style),
        }
    }
}

/// Value assigned to a tag for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// One value.
    Single(String),
    /// Ordered list of values.
    List(Vec<String>),
}

impl TagValue {
    /// Returns true if the value has no visible content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(value) => value.trim().is_empty(),
            Self::List(entries) => entries.iter().all(|entry| entry.trim().is_empty()),
        }
    }
}

/// Tag values of one recipient, keyed by tag name.
pub type TagValues = BTreeMap<String, TagValue>;

/// A recipient of a templated message together with its tag values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateRecipient {
    /// Email address.
    pub address: String,
    /// Values for the template's tags.
    #[serde(default)]
    pub values: TagValues,
}

impl TemplateRecipient {
    /// A recipient with no values yet.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            values: TagValues::new(),
        }
    }

    /// Assign a single value.
    #[must_use]
    pub fn with(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(tag.into(), TagValue::Single(value.into()));
        self
    }

    /// Assign a list value.
    #[must_use]
    pub fn with_list<I, S>(mut self, tag: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.insert(
            tag.into(),
            TagValue::List(entries.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Returns true if at least one of `tags` has a value with content.
    #[must_use]
    pub fn has_values_for(&self, tags: &[Tag]) -> bool {
        tags.iter().any(|tag| {
            self.values
                .get(&tag.name)
                .is_some_and(|value| !value.is_empty())
        })
    }
}

/// A message whose body contains `<!name!>` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateMessage {
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Body with placeholders.
    pub body: String,
    /// Declared tags. Placeholders without a declaration are single-valued.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// To recipients.
    #[serde(default)]
    pub to: Vec<TemplateRecipient>,
    /// Cc recipients.
    #[serde(default)]
    pub cc: Vec<TemplateRecipient>,
    /// Bcc recipients.
    #[serde(default)]
    pub bcc: Vec<TemplateRecipient>,
}
