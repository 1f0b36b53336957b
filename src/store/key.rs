//! Validated cache identifiers
//!
//! Identifiers name both the cache file and the upstream script, so they are
//! validated once at construction and treated as safe everywhere after.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum identifier length in bytes
///
/// Keeps the derived `<id>.rec` file name under common 255-byte limits.
pub const MAX_LEN: usize = 200;

/// Errors from identifier text that cannot name a cache entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdentifier {
    #[error("Identifier is empty")]
    Empty,

    #[error("Identifier is {0} bytes long (limit {max})", max = MAX_LEN)]
    TooLong(usize),

    #[error("Identifier starts with a dot")]
    LeadingDot,

    #[error("Identifier contains forbidden character {ch:?}")]
    ForbiddenCharacter { ch: char },
}

/// A validated cache identifier
///
/// Allowed characters are `[A-Za-z0-9._-]` with no leading dot, which makes
/// the identifier to file name mapping injective and rules out path
/// separators, traversal sequences and hidden files. Construction is the
/// only gate; once a `ScriptId` exists its text is used as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptId(String);

impl ScriptId {
    /// Validates identifier text
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let id = id.into();

        if id.is_empty() {
            return Err(InvalidIdentifier::Empty);
        }
        if id.len() > MAX_LEN {
            return Err(InvalidIdentifier::TooLong(id.len()));
        }
        if id.starts_with('.') {
            return Err(InvalidIdentifier::LeadingDot);
        }
        if let Some(ch) = id.chars().find(|c| !is_allowed(*c)) {
            return Err(InvalidIdentifier::ForbiddenCharacter { ch });
        }

        Ok(Self(id))
    }

    /// Returns the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the file name this identifier's record is stored under
    pub fn file_name(&self) -> String {
        format!("{}.rec", self.0)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScriptId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_identifiers() {
        for id in [
            "statistics",
            "download",
            "review-list",
            "user_logout",
            "publication.q7b22736",
            "App2",
            "a",
        ] {
            assert!(ScriptId::new(id).is_ok(), "Expected {:?} to validate", id);
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ScriptId::new(""), Err(InvalidIdentifier::Empty));
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert_eq!(ScriptId::new(".."), Err(InvalidIdentifier::LeadingDot));
        assert_eq!(ScriptId::new("."), Err(InvalidIdentifier::LeadingDot));
        assert_eq!(
            ScriptId::new("../../etc/passwd"),
            Err(InvalidIdentifier::LeadingDot)
        );
        assert_eq!(
            ScriptId::new("a/../b"),
            Err(InvalidIdentifier::ForbiddenCharacter { ch: '/' })
        );
    }

    #[test]
    fn test_rejects_separators_and_specials() {
        for (id, ch) in [
            ("a/b", '/'),
            ("a\\b", '\\'),
            ("a b", ' '),
            ("a:b", ':'),
            ("a\0b", '\0'),
            ("caf\u{e9}", '\u{e9}'),
        ] {
            assert_eq!(
                ScriptId::new(id),
                Err(InvalidIdentifier::ForbiddenCharacter { ch }),
                "Expected {:?} to be rejected",
                id
            );
        }
    }

    #[test]
    fn test_rejects_hidden_file_names() {
        assert_eq!(ScriptId::new(".hidden"), Err(InvalidIdentifier::LeadingDot));
    }

    #[test]
    fn test_length_limit() {
        let at_limit = "a".repeat(MAX_LEN);
        assert!(ScriptId::new(at_limit).is_ok());

        let over = "a".repeat(MAX_LEN + 1);
        assert_eq!(
            ScriptId::new(over),
            Err(InvalidIdentifier::TooLong(MAX_LEN + 1))
        );
    }

    #[test]
    fn test_file_name_derivation() {
        let id = ScriptId::new("statistics").expect("Failed to build id");
        assert_eq!(id.file_name(), "statistics.rec");

        // Dots inside the identifier stay distinct from other characters
        let dotted = ScriptId::new("a.b").expect("Failed to build id");
        let underscored = ScriptId::new("a_b").expect("Failed to build id");
        assert_ne!(dotted.file_name(), underscored.file_name());
    }

    #[test]
    fn test_from_str_and_display_round_trip() {
        let id: ScriptId = "update-check".parse().expect("Failed to parse id");
        assert_eq!(id.to_string(), "update-check");
        assert_eq!(id.as_str(), "update-check");
    }
}
