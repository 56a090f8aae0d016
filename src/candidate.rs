// The artifact under optimization.
// Created by the generator on the first iteration, replaced each iteration
// by the result of applying an action.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::state::digest16;

/// A candidate artifact: either plain text (a query string, a snippet) or an
/// arbitrary structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Candidate {
    Text(String),
    Structured(serde_json::Value),
}

impl Candidate {
    /// Textual form of the candidate, used by structural heuristics and hashing.
    /// Structured payloads serialize to their canonical JSON string.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Candidate::Text(text) => Cow::Borrowed(text.as_str()),
            Candidate::Structured(value) => {
                Cow::Owned(serde_json::to_string(value).unwrap_or_default())
            }
        }
    }

    /// Stable content hash; identical content always hashes identically.
    pub fn content_hash(&self) -> String {
        digest16(self.as_text().as_bytes())
    }

    /// Length of the textual form in bytes
    pub fn len(&self) -> usize {
        self.as_text().len()
    }

    /// Whether the candidate carries no content at all
    pub fn is_empty(&self) -> bool {
        match self {
            Candidate::Text(text) => text.trim().is_empty(),
            Candidate::Structured(value) => value.is_null(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<String> for Candidate {
    fn from(text: String) -> Self {
        Candidate::Text(text)
    }
}

impl From<&str> for Candidate {
    fn from(text: &str) -> Self {
        Candidate::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Candidate {
    fn from(value: serde_json::Value) -> Self {
        Candidate::Structured(value)
    }
}
