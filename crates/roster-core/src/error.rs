//! Error types for submission processing.
//!
//! [`SubmissionError`] is returned by every stage of the pipeline. A
//! [`Skip`](roster_types::SubmissionOutcome::Skipped) is not an error and
//! never appears here.

use roster_db::DbError;
use roster_types::{PrivateIdError, RecordId, ValidationErrors};

/// Errors that end the processing of one submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// One or more fields failed validation. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Several records hold the matching value and the matching
    /// configuration refuses to pick one.
    #[error("{} records match on field {field}", candidates.len())]
    DuplicateAmbiguous {
        /// The matching field that produced several hits.
        field: String,
        /// The matching records, lowest id first.
        candidates: Vec<RecordId>,
    },

    /// The record store failed. Nothing further was attempted.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// The explicit record id hint does not resolve to a record.
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// The write committed but the cache could not be invalidated.
    #[error("record {record_id} was written but its cache entry could not be invalidated: {source}")]
    StaleCache {
        /// The committed record.
        record_id: RecordId,
        /// The cache backend failure.
        source: DbError,
    },

    /// No unused private id was found within the attempt limit.
    #[error("no unused private id found after {attempts} attempts")]
    PrivateIdExhausted {
        /// Number of candidates tried.
        attempts: u32,
    },

    /// A generated private id was malformed.
    #[error("generated private id is invalid: {0}")]
    InvalidPrivateId(#[from] PrivateIdError),

    /// The field registry or validator setup is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SubmissionError {
    /// The validation errors, when this is a validation failure.
    pub const fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
