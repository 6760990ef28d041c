//! Version ordering that tolerates whatever package managers print.
//!
//! A version string is split into runs of ASCII digits and runs of letters.
//! Everything else (dots, dashes, pluses, tildes, spaces) only separates runs.
//! Runs are then compared position by position:
//!
//! - two numeric runs compare by magnitude, leading zeros ignored
//! - two text runs compare case-insensitively
//! - a numeric run sorts before a text run
//! - a version that runs out of runs first is the older one
//!
//! Nothing here can fail. A string with no runs at all (only punctuation)
//! falls back to comparing the raw strings.
//!
//! ```
//! use mpm::version::compare;
//! use std::cmp::Ordering;
//!
//! assert_eq!(compare("2.35.1", "2.35.2"), Ordering::Less);
//! assert_eq!(compare("1.3.1", "1.3.1+build2"), Ordering::Less);
//! assert_eq!(compare("default:1.0", "1.0"), Ordering::Equal);
//! ```

use std::cmp::Ordering;
use std::fmt;

/// One run of a tokenized version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Digits with leading zeros removed (`"0"` for a run of zeros)
    Numeric(String),
    /// Lower-cased letters
    Text(String),
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // No integer parsing: runs can be longer than any integer type.
            (Token::Numeric(a), Token::Numeric(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Token::Text(a), Token::Text(b)) => a.cmp(b),
            (Token::Numeric(_), Token::Text(_)) => Ordering::Less,
            (Token::Text(_), Token::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Numeric(n) => f.write_str(n),
            Token::Text(t) => f.write_str(t),
        }
    }
}

/// A tokenized version, ordered as described in the module docs.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        Version {
            raw: raw.to_string(),
            tokens: tokenize(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tokens.cmp(&other.tokens).then_with(|| {
            if self.tokens.is_empty() && other.tokens.is_empty() {
                self.raw.cmp(&other.raw)
            } else {
                Ordering::Equal
            }
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Removes decorations that carry no ordering information: surrounding
/// whitespace, a leading `label:` prefix made of letters (as in
/// `default:1.0`), and a `v` directly in front of a digit.
///
/// Numeric epochs such as Debian's `1:2.30` are kept.
pub fn strip_decorations(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some((label, rest)) = s.split_once(':') {
        if !label.is_empty() && label.chars().all(|c| c.is_alphabetic()) {
            s = rest.trim_start();
        }
    }
    let mut chars = s.chars();
    if matches!(chars.next(), Some('v' | 'V')) && chars.next().is_some_and(|c| c.is_ascii_digit()) {
        s = &s[1..];
    }
    s
}

/// Splits a version string into numeric and text runs.
pub fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut numeric = false;

    let flush = |current: &mut String, numeric: bool, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let run = std::mem::take(current);
        if numeric {
            let trimmed = run.trim_start_matches('0');
            let digits = if trimmed.is_empty() { "0" } else { trimmed };
            tokens.push(Token::Numeric(digits.to_string()));
        } else {
            tokens.push(Token::Text(run.to_lowercase()));
        }
    };

    for c in strip_decorations(raw).chars() {
        if c.is_ascii_digit() {
            if !numeric {
                flush(&mut current, numeric, &mut tokens);
                numeric = true;
            }
            current.push(c);
        } else if c.is_alphabetic() {
            if numeric {
                flush(&mut current, numeric, &mut tokens);
                numeric = false;
            }
            current.push(c);
        } else {
            flush(&mut current, numeric, &mut tokens);
        }
    }
    flush(&mut current, numeric, &mut tokens);
    tokens
}

/// Orders two version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    Version::parse(a).cmp(&Version::parse(b))
}

/// Whether `installed` is older than `candidate`.
///
/// Identical strings are never outdated, whatever they tokenize to.
pub fn is_outdated(installed: &str, candidate: &str) -> bool {
    if installed == candidate {
        return false;
    }
    compare(installed, candidate) == Ordering::Less
}

/// Whether `actual` satisfies a minimum version requirement.
pub fn meets_minimum(actual: &str, minimum: &str) -> bool {
    compare(actual, minimum) != Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2.35.1", "2.35.2", Ordering::Less)]
    #[case("1.3.1", "1.3.1+build2", Ordering::Less)]
    #[case("default:1.0", "1.0", Ordering::Equal)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("1.01", "1.1", Ordering::Equal)]
    #[case("1.0", "1.0.0", Ordering::Less)]
    #[case("1.0.RC1", "1.0.rc1", Ordering::Equal)]
    #[case("1.0alpha", "1.0beta", Ordering::Less)]
    #[case("1.0.1", "1.0.a", Ordering::Less)]
    #[case("v2.0", "2.0", Ordering::Equal)]
    #[case("1:2.30-1", "2.31", Ordering::Less)]
    #[case("1.2__3", "1.2.3", Ordering::Equal)]
    #[case("20240101", "9", Ordering::Greater)]
    #[case("99999999999999999999999", "99999999999999999999998", Ordering::Greater)]
    fn test_compare(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare(a, b), expected, "{a} vs {b}");
        assert_eq!(compare(b, a), expected.reverse(), "{b} vs {a}");
    }

    #[test]
    fn test_tokenize_runs() {
        assert_eq!(
            tokenize("1.3.1+build02"),
            vec![
                Token::Numeric("1".into()),
                Token::Numeric("3".into()),
                Token::Numeric("1".into()),
                Token::Text("build".into()),
                Token::Numeric("2".into()),
            ]
        );
        assert!(tokenize("").is_empty());
        assert!(tokenize("...--").is_empty());
    }

    #[test]
    fn test_punctuation_only_versions_fall_back_to_raw() {
        assert_eq!(compare("-", "+"), "-".cmp("+"));
        assert_eq!(compare("", "1"), Ordering::Less);
        assert_eq!(compare("?", "?"), Ordering::Equal);
    }

    #[test]
    fn test_is_outdated_short_circuits_on_equal_strings() {
        assert!(!is_outdated("1.0", "1.0"));
        assert!(is_outdated("1.0", "1.1"));
        assert!(!is_outdated("1.1", "1.0"));
        // Equal under the ordering but not the same string: still not outdated.
        assert!(!is_outdated("1.01", "1.1"));
    }

    #[test]
    fn test_strip_decorations() {
        assert_eq!(strip_decorations("  default: 1.0 "), "1.0");
        assert_eq!(strip_decorations("v1.2"), "1.2");
        assert_eq!(strip_decorations("vim"), "vim");
        assert_eq!(strip_decorations("2:1.0"), "2:1.0");
    }

    #[test]
    fn test_meets_minimum() {
        assert!(meets_minimum("9.2.0", "9.0.0"));
        assert!(meets_minimum("9.0.0", "9.0.0"));
        assert!(!meets_minimum("8.19.4", "9.0.0"));
    }
}
