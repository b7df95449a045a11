//! Username validation.

use super::message::USERNAME_SIZE;
use std::fmt;
use thiserror::Error;

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_LEN: usize = USERNAME_SIZE - 1;

/// Username rejection reasons
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,

    #[error("username is {len} bytes long, maximum is {}", MAX_USERNAME_LEN)]
    TooLong { len: usize },

    #[error("username contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated username: 1 to 31 ASCII letters, digits or underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, UsernameError> {
        if raw.is_empty() {
            return Err(UsernameError::Empty);
        }
        if raw.len() > MAX_USERNAME_LEN {
            return Err(UsernameError::TooLong { len: raw.len() });
        }
        if let Some(bad) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(UsernameError::InvalidChar(bad));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a username without keeping it.
pub fn validate_username(raw: &str) -> bool {
    Username::parse(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid() {
        for name in ["a", "Alice", "bob_42", "_", "X".repeat(31).as_str()] {
            assert!(validate_username(name), "{name:?} should be accepted");
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(Username::parse(""), Err(UsernameError::Empty));
    }

    #[test]
    fn test_rejects_too_long() {
        let name = "a".repeat(32);
        assert_eq!(
            Username::parse(&name),
            Err(UsernameError::TooLong { len: 32 })
        );
    }

    #[test]
    fn test_rejects_invalid_chars() {
        assert_eq!(
            Username::parse("bob smith"),
            Err(UsernameError::InvalidChar(' '))
        );
        assert_eq!(
            Username::parse("ñandú"),
            Err(UsernameError::InvalidChar('ñ'))
        );
        assert!(!validate_username("a-b"));
        assert!(!validate_username("a.b"));
    }

    #[test]
    fn test_display() {
        let name = Username::parse("carol").unwrap();
        assert_eq!(name.as_str(), "carol");
        assert_eq!(name.to_string(), "carol");
    }
}
