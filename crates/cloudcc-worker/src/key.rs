//! Artifact keys.
//!
//! Keys are 128-bit random identifiers rendered as 32 lowercase hex
//! characters. Uniqueness is assumed from randomness, never checked.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Error parsing a caller-supplied key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid artifact key '{0}': expected a 128-bit hex identifier")]
pub struct KeyError(pub String);

/// A validated artifact key.
///
/// Parsing only admits UUID-shaped strings, so a key can always be used as
/// a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a key from its simple or hyphenated form.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let trimmed = s.trim();
        let uuid = Uuid::try_parse(trimmed).map_err(|_| KeyError(truncate(trimmed)))?;
        Ok(Self(uuid.simple().to_string()))
    }

    /// The normalized key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out prefix.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(64).collect()
}
