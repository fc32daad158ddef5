//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors with additional context about which
//! operation failed.

use roster_types::RecordId;

/// Prefix of the unique expression indexes created for matching fields.
///
/// A violation of `records_unique_email` is reported as a uniqueness
/// conflict on the `email` field.
pub const FIELD_UNIQUE_INDEX_PREFIX: &str = "records_unique_";

/// Name of the unique constraint on `records.private_id`.
pub const PRIVATE_ID_CONSTRAINT: &str = "records_private_id_key";

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The record addressed by a write does not exist.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// A write violated a uniqueness constraint.
    #[error("Unique constraint {constraint} violated")]
    UniqueViolation {
        /// Name of the violated constraint or index.
        constraint: String,
        /// The field guarded by the constraint, when it is a field index.
        field: Option<String>,
    },

    /// A stored row could not be turned into a record.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The backend refused the operation (used by the in-memory backends to
    /// simulate an outage).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    /// Build a [`DbError::UniqueViolation`] from a constraint name, deriving
    /// the field from the [`FIELD_UNIQUE_INDEX_PREFIX`] naming convention.
    pub fn unique_violation(constraint: &str) -> Self {
        Self::UniqueViolation {
            constraint: constraint.to_owned(),
            field: constraint
                .strip_prefix(FIELD_UNIQUE_INDEX_PREFIX)
                .map(str::to_owned),
        }
    }

    /// The field whose uniqueness constraint rejected a write, if any.
    pub fn violated_field(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Whether this is a collision on the private id constraint.
    pub fn is_private_id_conflict(&self) -> bool {
        matches!(self, Self::UniqueViolation { constraint, .. } if constraint == PRIVATE_ID_CONSTRAINT)
    }

    /// Translate a write error, surfacing unique violations as
    /// [`DbError::UniqueViolation`].
    pub(crate) fn from_write(err: sqlx::Error) -> Self {
        let constraint = err
            .as_database_error()
            .filter(|db_err| db_err.is_unique_violation())
            .map(|db_err| db_err.constraint().unwrap_or("unknown").to_owned());
        match constraint {
            Some(name) => Self::unique_violation(&name),
            None => Self::Postgres(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_index_names_map_to_fields() {
        let err = DbError::unique_violation("records_unique_email");
        assert_eq!(err.violated_field(), Some("email"));

        let err = DbError::unique_violation(PRIVATE_ID_CONSTRAINT);
        assert_eq!(err.violated_field(), None);
        assert!(err.is_private_id_conflict());
    }
}
