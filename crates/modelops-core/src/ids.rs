//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Group used when the caller does not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Server-issued hash identifying a model, preprocessing step or training
/// experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new ResourceId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one execution, scoped to its parent resource.
///
/// Ordering is numeric: the server issues ids monotonically, so the maximum
/// id is the most recent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ExecutionId(u64);

impl ExecutionId {
    /// Create a new ExecutionId.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Numeric value of the id.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Extracts the first run of ASCII digits from a server message such as
    /// `"Training execution '12' created"`.
    pub fn find_in(text: &str) -> Option<Self> {
        let start = text.find(|c: char| c.is_ascii_digit())?;
        let digits: String = text[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok().map(Self)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ExecutionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for ExecutionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| CoreError::InvalidExecutionId(s.to_owned()))
    }
}

impl<'de> Deserialize<'de> for ExecutionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(n) => Ok(Self(n)),
            Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Namespace/ACL boundary under which resources live.
///
/// Names are normalized on construction: lowercased, trimmed, and spaces,
/// dots and dashes replaced by underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupName(String);

impl GroupName {
    /// Create a normalized group name.
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name
            .as_ref()
            .trim()
            .to_lowercase()
            .replace([' ', '.', '-'], "_");
        Self(normalized)
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GroupName {
    fn default() -> Self {
        Self(DEFAULT_GROUP.to_owned())
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for GroupName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
