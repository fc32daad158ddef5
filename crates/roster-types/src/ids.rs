//! Record identifiers.
//!
//! Every record carries two identifiers: the numeric [`RecordId`] assigned by
//! the store on insert, and the [`PrivateId`], a short token used in links so
//! the numeric id never has to be exposed. Both are immutable once assigned.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Numeric identifier of a stored record.
///
/// Assigned by the record store (a `BIGSERIAL` column in `PostgreSQL`) and
/// never reused or changed afterwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct RecordId(#[ts(type = "number")] pub i64);

impl RecordId {
    /// Wrap a raw numeric id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Return the inner numeric value.
    pub const fn into_inner(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Errors produced when parsing a [`PrivateId`] from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrivateIdError {
    /// The token was empty.
    #[error("private id is empty")]
    Empty,
    /// The token contained a character outside `[A-Za-z0-9]`.
    #[error("private id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Short alphanumeric token identifying a record in links.
///
/// Globally unique across the record store. Generated by sampling a fixed
/// alphabet and retrying until the store reports no collision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct PrivateId(String);

impl PrivateId {
    /// Parse a private id, rejecting empty or non-alphanumeric tokens.
    ///
    /// # Errors
    ///
    /// Returns [`PrivateIdError`] if the token is empty or contains a
    /// character outside `[A-Za-z0-9]`.
    pub fn parse(token: &str) -> Result<Self, PrivateIdError> {
        if token.is_empty() {
            return Err(PrivateIdError::Empty);
        }
        if let Some(bad) = token.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(PrivateIdError::InvalidCharacter(bad));
        }
        Ok(Self(token.to_owned()))
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id and return the owned token.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for PrivateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
