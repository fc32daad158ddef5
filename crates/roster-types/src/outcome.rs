//! Match decisions, submission outcomes, and per-field validation errors.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{PrivateId, RecordId};

/// Why a submission was not written.
///
/// A skip is a terminal outcome, not an error: nothing was written and the
/// caller decides whether to tell the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SkipReason {
    /// A match was found under the `strict` policy.
    DuplicateRejected {
        /// Matching field that produced the hit.
        field: String,
        /// The record that already holds the value.
        existing: RecordId,
    },
    /// A match was found under the `block` policy.
    DuplicateSuppressed {
        /// Matching field that produced the hit.
        field: String,
        /// The record that already holds the value.
        existing: RecordId,
    },
    /// A concurrent submission committed the same matching value first.
    ConcurrentDuplicate {
        /// Field whose uniqueness constraint rejected the insert.
        field: String,
    },
    /// An update carried no columns to write.
    NoChanges {
        /// The record that would have been updated.
        record_id: RecordId,
    },
}

impl SkipReason {
    /// Whether the form layer should show the skip to the submitter.
    pub const fn is_reported(&self) -> bool {
        matches!(self, Self::DuplicateRejected { .. })
    }
}

/// Classification of a submission, computed fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MatchDecision {
    /// Create a new record.
    Insert,
    /// Merge into an existing record.
    Update(RecordId),
    /// Write nothing.
    Skip(SkipReason),
}

/// The kind of write that was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum WriteAction {
    /// A new record was created.
    Inserted,
    /// An existing record was updated.
    Updated,
}

/// Successful terminal result of processing a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SubmissionOutcome {
    /// The write was committed and the cache invalidated.
    Success {
        /// Numeric id of the written record.
        record_id: RecordId,
        /// Link token of the written record.
        private_id: PrivateId,
        /// Whether the record was created or updated.
        action: WriteAction,
    },
    /// Nothing was written.
    Skipped {
        /// Why the submission was skipped.
        reason: SkipReason,
    },
}

/// Category of a single field validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum FieldErrorKind {
    /// A required value was empty.
    Required,
    /// The value did not have the expected format.
    InvalidFormat,
    /// Another record already holds the value.
    NotUnique,
    /// A confirmation field did not match its source.
    Mismatch,
    /// The value is not one of the field's options.
    InvalidOption,
    /// The captcha answer was wrong.
    Captcha,
    /// A registered custom validator rejected the value.
    Custom,
}

/// One validation failure for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Failure category.
    pub kind: FieldErrorKind,
    /// Message suitable for re-display next to the field.
    pub message: String,
}

/// Every validation failure found in one pass over a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Create an empty error set.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a failure.
    pub fn push(&mut self, field: &str, kind: FieldErrorKind, message: String) {
        self.0.push(FieldError {
            field: field.to_owned(),
            kind,
            message,
        });
    }

    /// Whether no failures were recorded.
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures.
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over failures in the order they were found.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    /// Failures recorded against `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.0.iter().filter(move |e| e.field == field)
    }

    /// Whether `field` has at least one failure.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}
