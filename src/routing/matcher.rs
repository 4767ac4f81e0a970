//! Path matching and validation.
//!
//! # Design Decisions
//! - Matching is on the raw (still percent-encoded) path, case-sensitive
//! - The reserved prefix matches whole segments: with prefix `/bare/`, both
//!   `/bare` and `/bare/...` match, `/barely` does not
//! - No regex in the hot path

use crate::error::{ProxyError, Result};

/// Matches a reserved path prefix on segment boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    /// Always ends with '/'.
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a matcher. A missing trailing '/' is added.
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) || path == &self.prefix[..self.prefix.len() - 1]
    }

    /// The part of `path` after the prefix, if it matches.
    pub fn remainder<'a>(&self, path: &'a str) -> Option<&'a str> {
        if let Some(rest) = path.strip_prefix(self.prefix.as_str()) {
            Some(rest)
        } else if self.matches(path) {
            Some("")
        } else {
            None
        }
    }
}

/// Reject paths no handler could make sense of.
///
/// A well-formed path starts with '/', contains only well-formed percent escapes,
/// and neither raw nor decoded contains control characters.
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ProxyError::client("path must start with '/'"));
    }
    if path.chars().any(char::is_control) {
        return Err(ProxyError::client("path contains control characters"));
    }

    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3).and_then(|hex| {
                std::str::from_utf8(hex)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
            });
            match escape {
                Some(byte) if byte.is_ascii_control() => {
                    return Err(ProxyError::client("path encodes control characters"));
                }
                Some(_) => i += 3,
                None => {
                    return Err(ProxyError::client(format!(
                        "malformed percent escape at offset {}",
                        i
                    )));
                }
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}
