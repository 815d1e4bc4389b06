//! Flag policy configuration.

use serde::{Deserialize, Serialize};

/// Limits and extra denials applied on top of the built-in deny list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagPolicy {
    /// Maximum number of tokens in one flag string.
    pub max_tokens: usize,
    /// Maximum length of the raw flag string in bytes.
    pub max_len: usize,
    /// Additional flag prefixes to deny (e.g. `-fprofile-`).
    pub denied_prefixes: Vec<String>,
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            max_len: 8 * 1024,
            denied_prefixes: Vec::new(),
        }
    }
}
