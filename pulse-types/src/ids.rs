//! Identifier types used throughout Pulse.
//!
//! Entities are addressed by URI-like strings (`ex:1`, `d:0192…`). Ids minted
//! on the client use UUID v7 so they sort by creation time.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix for ids generated client-side.
pub const GENERATED_PREFIX: &str = "d:";

/// Server-assigned freshness counter of an entity.
pub type Version = u64;

/// Stable identity of a server-resident entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh id for an entity that does not exist on the server yet.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Parses an id, rejecting strings that cannot travel in a wire frame.
    pub fn parse(s: &str) -> Result<Self, crate::Error> {
        if s.is_empty() {
            return Err(crate::Error::InvalidId("empty id".to_string()));
        }
        if let Some(c) = s.chars().find(|c| matches!(c, ',' | '=') || c.is_whitespace()) {
            return Err(crate::Error::InvalidId(format!(
                "reserved character {c:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was minted by [`EntityId::generate`].
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(GENERATED_PREFIX)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
