//! Placeholder scanning and substitution.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::model::{Tag, TagKind, TagValue, TagValues};

#[allow(clippy::expect_used)] // literal pattern, checked by tests
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!([^!<>]+)!>").expect("placeholder pattern is valid"));

/// Names of the placeholders in `body`, unique, in order of first use.
#[must_use]
pub fn extract_tag_names(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(body) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Tags that actually appear in `body`, resolved against the declarations.
///
/// Undeclared placeholders are treated as single-valued.
#[must_use]
pub fn effective_tags(body: &str, declared: &[Tag]) -> Vec<Tag> {
    extract_tag_names(body)
        .into_iter()
        .map(|name| {
            declared
                .iter()
                .find(|tag| tag.name == name)
                .cloned()
                .unwrap_or_else(|| Tag::single(name))
        })
        .collect()
}

/// Render one value the way its tag asks for.
///
/// A list value on a single tag is joined with commas; a single value on a
/// list tag becomes a one-entry list. Blank list entries are skipped.
#[must_use]
pub fn render_value(kind: TagKind, value: &TagValue) -> String {
    match (kind, value) {
        (TagKind::Single, TagValue::Single(value)) => value.clone(),
        (TagKind::Single, TagValue::List(entries)) => non_blank(entries).collect::<Vec<_>>().join(", "),
        (TagKind::List(style), TagValue::Single(value)) => format!("{}{value}", style.marker(0)),
        (TagKind::List(style), TagValue::List(entries)) => non_blank(entries)
            .enumerate()
            .map(|(i, entry)| format!("{}{entry}", style.marker(i)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn non_blank(entries: &[String]) -> impl Iterator<Item = &str> {
    entries
        .iter()
        .map(String::as_str)
        .filter(|entry| !entry.trim().is_empty())
}

/// Substitute every placeholder in `body` with the recipient's values.
///
/// Placeholders with no value are left untouched; callers validate first.
#[must_use]
pub fn render_body(body: &str, tags: &[Tag], values: &TagValues) -> String {
    let kinds: HashMap<&str, TagKind> = tags
        .iter()
        .map(|tag| (tag.name.as_str(), tag.kind))
        .collect();

    PLACEHOLDER
        .replace_all(body, |caps: &Captures<'_>| {
            let name = &caps[1];
            let kind = kinds.get(name).copied().unwrap_or(TagKind::Single);
            values
                .get(name)
                .map_or_else(|| caps[0].to_string(), |value| render_value(kind, value))
        })
        .into_owned()
}
