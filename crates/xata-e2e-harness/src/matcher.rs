//! What an expectation looks for in terminal output.

use std::fmt;

use regex::Regex;

use crate::error::HarnessError;

/// A literal substring or a regular expression.
///
/// Literals are matched verbatim; no character has special meaning.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    /// Match `text` exactly.
    pub fn literal(text: impl Into<String>) -> Self {
        Matcher::Literal(text.into())
    }

    /// Compile `pattern` as a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self, HarnessError> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    /// Byte range of the leftmost match in `haystack`.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Matcher::Literal(needle) => haystack
                .find(needle.as_str())
                .map(|start| (start, start + needle.len())),
            Matcher::Pattern(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Literal(text) => write!(f, "{text:?}"),
            Matcher::Pattern(re) => write!(f, "pattern /{}/", re.as_str()),
        }
    }
}

impl From<&str> for Matcher {
    fn from(text: &str) -> Self {
        Matcher::literal(text)
    }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self {
        Matcher::Pattern(re)
    }
}
