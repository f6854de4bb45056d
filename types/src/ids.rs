use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an interactive shell session: exactly 8 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session id '{0}': expected 8 hex characters")]
pub struct SessionIdError(pub String);

impl SessionId {
    pub const LEN: usize = 8;

    pub fn parse(value: &str) -> Result<Self, SessionIdError> {
        let trimmed = value.trim();
        if trimmed.len() == Self::LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(SessionIdError(value.to_string()))
        }
    }

    /// Build an id from the leading hex digits of a longer token (e.g. a UUID).
    ///
    /// Non-hex characters such as `-` are skipped.
    pub fn from_token(token: &str) -> Result<Self, SessionIdError> {
        let prefix: String = token
            .chars()
            .filter(char::is_ascii_hexdigit)
            .take(Self::LEN)
            .collect();
        Self::parse(&prefix)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

/// Identifier of a conversation session (used to key persisted plan state).
///
/// Free-form, but restricted to characters that are safe in a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid conversation id '{0}': use letters, digits, '-' or '_'")]
pub struct ConversationIdError(pub String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Result<Self, ConversationIdError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= 128
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(value))
        } else {
            Err(ConversationIdError(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ConversationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.0
    }
}
