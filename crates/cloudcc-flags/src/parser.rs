//! Flag string tokenizer and parser.
//!
//! Turns a caller-supplied flag string into tokens, then into a structured
//! list of flags and stray positional arguments.

/// Flags that take their value as the following token.
const FLAGS_WITH_VALUES: &[&str] = &[
    "-I",
    "-D",
    "-U",
    "-include",
    "-isystem",
    "-iquote",
    "-idirafter",
    "-target",
    "-arch",
    "-x",
    "-mllvm",
    "-Xclang",
    "-Xlinker",
    "-MF",
    "-MT",
    "-MQ",
];

/// One parsed token group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedToken {
    /// A flag, with its separate value if the flag takes one.
    Flag(String, Option<String>),
    /// A bare word not consumed as a flag value.
    Positional(String),
    /// A response file reference (`@path`).
    ResponseFile(String),
    /// A lone `-` (read from stdin).
    Stdin,
    /// A bare `--`; every later token is an input file to the tool.
    EndOfOptions,
}

/// Parsed flag string.
#[derive(Debug, Clone, Default)]
pub struct ParsedFlags {
    /// Raw tokens in order.
    pub tokens: Vec<String>,
    /// Structured view of the tokens.
    pub parsed: Vec<ParsedToken>,
}

/// Split a flag string into tokens.
///
/// Whitespace separates tokens. Single quotes are literal, double quotes
/// honor `\"` and `\\`, and a backslash outside quotes escapes the next
/// character. An unterminated quote is an error.
pub fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Group tokens into flags, flag values and positionals.
pub fn parse_tokens(tokens: &[String]) -> Result<Vec<ParsedToken>, String> {
    let mut parsed = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];

        if token == "-" {
            parsed.push(ParsedToken::Stdin);
            i += 1;
            continue;
        }

        if token == "--" {
            parsed.push(ParsedToken::EndOfOptions);
            i += 1;
            continue;
        }

        if let Some(path) = token.strip_prefix('@') {
            parsed.push(ParsedToken::ResponseFile(path.to_string()));
            i += 1;
            continue;
        }

        if !token.starts_with('-') {
            parsed.push(ParsedToken::Positional(token.clone()));
            i += 1;
            continue;
        }

        if FLAGS_WITH_VALUES.contains(&token.as_str()) {
            let Some(value) = tokens.get(i + 1) else {
                return Err(format!("flag {} requires a value", token));
            };
            parsed.push(ParsedToken::Flag(token.clone(), Some(value.clone())));
            i += 2;
            continue;
        }

        parsed.push(ParsedToken::Flag(token.clone(), None));
        i += 1;
    }

    Ok(parsed)
}

/// Tokenize and parse a flag string in one step.
pub fn parse_flags(input: &str) -> Result<ParsedFlags, String> {
    let tokens = tokenize(input)?;
    let parsed = parse_tokens(&tokens)?;
    Ok(ParsedFlags { tokens, parsed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s).unwrap()
    }

    #[test]
    fn test_tokenize_whitespace() {
        assert_eq!(toks("  -O2   -g\t-c "), vec!["-O2", "-g", "-c"]);
        assert!(toks("").is_empty());
        assert!(toks("   ").is_empty());
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(toks("-DNAME='a b'"), vec!["-DNAME=a b"]);
        assert_eq!(toks(r#"-DMSG="say \"hi\"""#), vec![r#"-DMSG=say "hi""#]);
        assert_eq!(toks(r"-DPATH=a\ b"), vec!["-DPATH=a b"]);
        assert_eq!(toks("''"), vec![""]);
    }

    #[test]
    fn test_tokenize_unterminated() {
        assert!(tokenize("-D'x").is_err());
        assert!(tokenize("-D\"x").is_err());
        assert!(tokenize("-O2 \\").is_err());
    }

    #[test]
    fn test_parse_value_flags() {
        let parsed = parse_tokens(&toks("-I include -O2 -target x86_64-linux-gnu")).unwrap();
        assert_eq!(
            parsed,
            vec![
                ParsedToken::Flag("-I".to_string(), Some("include".to_string())),
                ParsedToken::Flag("-O2".to_string(), None),
                ParsedToken::Flag("-target".to_string(), Some("x86_64-linux-gnu".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_positional_and_special() {
        let parsed = parse_tokens(&toks("-c extra.c @args -")).unwrap();
        assert_eq!(
            parsed,
            vec![
                ParsedToken::Flag("-c".to_string(), None),
                ParsedToken::Positional("extra.c".to_string()),
                ParsedToken::ResponseFile("args".to_string()),
                ParsedToken::Stdin,
            ]
        );
    }

    #[test]
    fn test_parse_end_of_options() {
        let parsed = parse_tokens(&toks("-O2 -- -extra.c")).unwrap();
        assert_eq!(
            parsed,
            vec![
                ParsedToken::Flag("-O2".to_string(), None),
                ParsedToken::EndOfOptions,
                ParsedToken::Flag("-extra.c".to_string(), None),
            ]
        );
        // as a flag value it stays a value
        assert_eq!(
            parse_tokens(&toks("-D --")).unwrap(),
            vec![ParsedToken::Flag("-D".to_string(), Some("--".to_string()))]
        );
    }

    #[test]
    fn test_parse_forwarded_values() {
        let parsed = parse_tokens(&toks("-Xclang /tmp/extra.ll -mllvm -inline-threshold=100")).unwrap();
        assert_eq!(
            parsed,
            vec![
                ParsedToken::Flag("-Xclang".to_string(), Some("/tmp/extra.ll".to_string())),
                ParsedToken::Flag("-mllvm".to_string(), Some("-inline-threshold=100".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_missing_value() {
        let err = parse_tokens(&toks("-O2 -target")).unwrap_err();
        assert!(err.contains("-target"));
    }
}
