//! Flag check result types.

use serde::{Deserialize, Serialize};

/// Machine-readable rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "detail")]
pub enum RejectionReason {
    /// The flag string could not be tokenized or parsed.
    #[serde(rename = "PARSE_ERROR")]
    ParseError(String),

    /// A flag the worker controls itself (output paths, plugins).
    #[serde(rename = "DENIED_FLAG")]
    DeniedFlag(String),

    /// A bare word that would become an extra input.
    #[serde(rename = "POSITIONAL_ARGUMENT")]
    PositionalArgument(String),

    /// An `@file` response file.
    #[serde(rename = "RESPONSE_FILE")]
    ResponseFile(String),

    /// A lone `-` asking the tool to read stdin.
    #[serde(rename = "STDIN_INPUT")]
    StdinInput,

    /// A bare `--`, after which the tool takes every token as an input.
    #[serde(rename = "END_OF_OPTIONS")]
    EndOfOptions,

    /// More tokens than the policy allows.
    #[serde(rename = "TOO_MANY_TOKENS")]
    TooManyTokens { count: usize, max: usize },

    /// The raw string is longer than the policy allows.
    #[serde(rename = "TOO_LONG")]
    TooLong { len: usize, max: usize },
}

impl RejectionReason {
    /// Get a machine-readable string representation.
    pub fn to_code(&self) -> String {
        match self {
            RejectionReason::ParseError(e) => format!("PARSE_ERROR:{}", e),
            RejectionReason::DeniedFlag(f) => format!("DENIED_FLAG:{}", f),
            RejectionReason::PositionalArgument(a) => format!("POSITIONAL_ARGUMENT:{}", a),
            RejectionReason::ResponseFile(p) => format!("RESPONSE_FILE:{}", p),
            RejectionReason::StdinInput => "STDIN_INPUT".to_string(),
            RejectionReason::EndOfOptions => "END_OF_OPTIONS".to_string(),
            RejectionReason::TooManyTokens { count, max } => {
                format!("TOO_MANY_TOKENS:{}>{}", count, max)
            }
            RejectionReason::TooLong { len, max } => format!("TOO_LONG:{}>{}", len, max),
        }
    }
}

/// Result of checking a flag string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagCheck {
    /// Whether the flag string was accepted.
    pub accepted: bool,

    /// Accepted tokens, in caller order. None when rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv: Option<Vec<String>>,

    /// Tokens that caused rejection (may be empty).
    #[serde(default)]
    pub rejected_tokens: Vec<String>,

    /// Machine-readable rejection reasons.
    #[serde(default)]
    pub rejection_reasons: Vec<RejectionReason>,
}

impl FlagCheck {
    /// Create an accepted result.
    pub fn accepted(argv: Vec<String>) -> Self {
        Self {
            accepted: true,
            argv: Some(argv),
            rejected_tokens: Vec::new(),
            rejection_reasons: Vec::new(),
        }
    }

    /// Create a rejected result.
    pub fn rejected(rejected_tokens: Vec<String>, rejection_reasons: Vec<RejectionReason>) -> Self {
        Self {
            accepted: false,
            argv: None,
            rejected_tokens,
            rejection_reasons,
        }
    }

    /// Get rejection reasons as machine-readable strings.
    pub fn rejection_reason_codes(&self) -> Vec<String> {
        self.rejection_reasons.iter().map(|r| r.to_code()).collect()
    }

    /// Accepted argv, or the rejection if there is none.
    pub fn into_argv(self) -> Result<Vec<String>, FlagCheck> {
        match self.argv {
            Some(argv) if self.accepted => Ok(argv),
            _ => Err(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_codes() {
        let result = FlagCheck::rejected(
            vec!["-o".to_string(), "x.c".to_string()],
            vec![
                RejectionReason::DeniedFlag("-o".to_string()),
                RejectionReason::PositionalArgument("x.c".to_string()),
                RejectionReason::TooManyTokens { count: 9, max: 8 },
                RejectionReason::EndOfOptions,
            ],
        );
        assert_eq!(
            result.rejection_reason_codes(),
            vec![
                "DENIED_FLAG:-o",
                "POSITIONAL_ARGUMENT:x.c",
                "TOO_MANY_TOKENS:9>8",
                "END_OF_OPTIONS"
            ]
        );
    }

    #[test]
    fn test_into_argv() {
        let ok = FlagCheck::accepted(vec!["-O2".to_string()]);
        assert_eq!(ok.into_argv().unwrap(), vec!["-O2".to_string()]);

        let bad = FlagCheck::rejected(vec![], vec![RejectionReason::StdinInput]);
        assert!(bad.into_argv().is_err());
    }

    #[test]
    fn test_serialization() {
        let result = FlagCheck::rejected(vec!["@rsp".to_string()], vec![RejectionReason::ResponseFile("rsp".to_string())]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["accepted"], false);
        assert_eq!(json["rejection_reasons"][0]["type"], "RESPONSE_FILE");
        assert!(json.get("argv").is_none());
    }
}
