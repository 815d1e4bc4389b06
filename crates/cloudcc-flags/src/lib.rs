//! Deny-by-default guard for caller-supplied compiler flag strings.
//!
//! Callers send tool flags as a single string. The worker appends its own
//! input and output paths, so the string must never be able to add inputs,
//! redirect outputs, or load code into the tool. This crate tokenizes the
//! string and rejects anything that could.

mod config;
mod parser;
mod result;

pub use config::FlagPolicy;
pub use parser::{parse_flags, parse_tokens, tokenize, ParsedFlags, ParsedToken};
pub use result::{FlagCheck, RejectionReason};

/// Flags the worker controls itself, denied in any position.
const DENIED_FLAGS: &[&str] = &[
    "-o",
    "--output",
    "-MF",
    "-MJ",
    "-dumpdir",
    "-save-temps",
    "-load",
    "-fplugin",
    "-fpass-plugin",
    "-Xlinker",
    "-Wl",
];

/// Prefixes of joined forms (`--output=x`, `-fplugin=x.so`).
const DENIED_PREFIXES: &[&str] = &[
    "--output=",
    "-MF",
    "-MJ",
    "-dumpdir",
    "-save-temps=",
    "-fplugin=",
    "-fpass-plugin=",
    "-Wl,",
];

/// Flags whose value is handed to another tool and must be checked too.
const FORWARDING_FLAGS: &[&str] = &["-Xclang", "-mllvm"];

/// Check a flag string against the built-in deny list and `policy`.
///
/// Returns the accepted tokens in caller order, ready to be followed by the
/// worker's own fixed arguments.
pub fn check(flags: &str, policy: &FlagPolicy) -> FlagCheck {
    if flags.len() > policy.max_len {
        return FlagCheck::rejected(
            Vec::new(),
            vec![RejectionReason::TooLong {
                len: flags.len(),
                max: policy.max_len,
            }],
        );
    }

    let parsed = match parse_flags(flags) {
        Ok(p) => p,
        Err(e) => {
            return FlagCheck::rejected(Vec::new(), vec![RejectionReason::ParseError(e)]);
        }
    };

    if parsed.tokens.len() > policy.max_tokens {
        return FlagCheck::rejected(
            Vec::new(),
            vec![RejectionReason::TooManyTokens {
                count: parsed.tokens.len(),
                max: policy.max_tokens,
            }],
        );
    }

    let mut rejected_tokens: Vec<String> = Vec::new();
    let mut rejection_reasons: Vec<RejectionReason> = Vec::new();

    for token in &parsed.parsed {
        match token {
            ParsedToken::Stdin => {
                rejected_tokens.push("-".to_string());
                rejection_reasons.push(RejectionReason::StdinInput);
            }
            ParsedToken::EndOfOptions => {
                rejected_tokens.push("--".to_string());
                rejection_reasons.push(RejectionReason::EndOfOptions);
            }
            ParsedToken::ResponseFile(path) => {
                rejected_tokens.push(format!("@{}", path));
                rejection_reasons.push(RejectionReason::ResponseFile(path.clone()));
            }
            ParsedToken::Positional(word) => {
                rejected_tokens.push(word.clone());
                rejection_reasons.push(RejectionReason::PositionalArgument(word.clone()));
            }
            ParsedToken::Flag(flag, value) => {
                if is_denied(flag, policy) {
                    rejected_tokens.push(flag.clone());
                    rejection_reasons.push(RejectionReason::DeniedFlag(flag.clone()));
                    continue;
                }
                let Some(v) = value else { continue };
                if !FORWARDING_FLAGS.contains(&flag.as_str()) {
                    continue;
                }
                // a forwarded bare word is an input file for the receiving tool
                if !v.starts_with('-') {
                    rejected_tokens.push(v.clone());
                    rejection_reasons.push(RejectionReason::PositionalArgument(v.clone()));
                } else if is_denied(v, policy) {
                    rejected_tokens.push(v.clone());
                    rejection_reasons.push(RejectionReason::DeniedFlag(v.clone()));
                }
            }
        }
    }

    if rejection_reasons.is_empty() {
        FlagCheck::accepted(parsed.tokens)
    } else {
        FlagCheck::rejected(rejected_tokens, rejection_reasons)
    }
}

/// Whether a single flag token is denied.
fn is_denied(flag: &str, policy: &FlagPolicy) -> bool {
    if DENIED_FLAGS.contains(&flag) {
        return true;
    }
    if DENIED_PREFIXES.iter().any(|p| flag.starts_with(p)) {
        return true;
    }
    // `-ofile` is an output path; `-objc…`/`-object` are not
    if flag.len() > 2 && flag.starts_with("-o") && !flag.starts_with("-obj") {
        return true;
    }
    policy
        .denied_prefixes
        .iter()
        .any(|p| !p.is_empty() && flag.starts_with(p.as_str()))
}
