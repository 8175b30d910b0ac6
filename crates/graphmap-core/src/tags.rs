//! # Tags
//!
//! `name` / `name=value` tokens attached to nodes and edges, and the
//! wildcard matcher shared by every filter predicate.
//!
//! Tag keys compare case-insensitively and a tag set holds at most one
//! entry per key. Order of first insertion is preserved.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// WILDCARD MATCHING
// =============================================================================

/// Case-insensitive glob match: `*` matches any run of characters,
/// `?` matches exactly one.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it was matched against
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Returns true when `value` contains glob metacharacters.
pub fn is_wildcard(value: &str) -> bool {
    value.contains(['*', '?'])
}

// =============================================================================
// TAG
// =============================================================================

/// A single `key` or `key=value` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    key: String,
    value: Option<String>,
}

impl Tag {
    /// Create a tag. Surrounding whitespace is trimmed from both parts.
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        let key: String = key.into();
        Self {
            key: key.trim().to_string(),
            value: value.map(|v| v.trim().to_string()),
        }
    }

    /// Parse `key` or `key=value`. Only the first `=` splits; the rest
    /// belongs to the value. Returns `None` for an empty key.
    pub fn parse(text: &str) -> Option<Self> {
        let (key, value) = match text.split_once('=') {
            Some((k, v)) => (k, Some(v.to_string())),
            None => (text, None),
        };
        let tag = Self::new(key, value);
        if tag.key.is_empty() { None } else { Some(tag) }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn same_key(&self, key: &str) -> bool {
        self.key.to_lowercase() == key.to_lowercase()
    }

    /// Treat `self` as a filter and test it against a stored tag.
    ///
    /// A key-only filter matches any value; a valued filter matches
    /// exactly, or by glob when it carries `*`/`?`.
    fn accepts(&self, stored: &Tag) -> bool {
        if !stored.same_key(&self.key) {
            return false;
        }
        match (&self.value, &stored.value) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(wanted), Some(actual)) => wildcard_match(wanted, actual),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

// =============================================================================
// TAG SET
// =============================================================================

/// Ordered tag collection with at most one tag per (case-insensitive) key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `,`/`;` separated tag list such as `name=marko, age=29`.
    ///
    /// Empty segments are skipped; a repeated key keeps the last value.
    pub fn parse(text: &str) -> Self {
        let mut tags = Self::new();
        for segment in text.split([',', ';']) {
            if let Some(tag) = Tag::parse(segment) {
                tags.set(tag);
            }
        }
        tags
    }

    /// Insert a tag, replacing any tag with the same key in place.
    pub fn set(&mut self, tag: Tag) {
        match self.0.iter_mut().find(|t| t.same_key(&tag.key)) {
            Some(existing) => *existing = tag,
            None => self.0.push(tag),
        }
    }

    /// Remove the tag with `key`. Returns true if one was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|t| !t.same_key(key));
        self.0.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.0.iter().find(|t| t.same_key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// "has" predicate for a single filter tag.
    pub fn has(&self, filter: &Tag) -> bool {
        self.0.iter().any(|stored| filter.accepts(stored))
    }

    /// Subset query: every filter tag must be satisfied.
    pub fn has_all(&self, filter: &Tags) -> bool {
        filter.iter().all(|f| self.has(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Tags {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut tags = Self::new();
        for tag in iter {
            tags.set(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", tag)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
