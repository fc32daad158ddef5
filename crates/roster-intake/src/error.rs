//! Error types for the intake binary.
//!
//! [`IntakeError`] covers startup failures and I/O on the submission
//! stream. A submission that fails on its own is reported on stdout and
//! never becomes an [`IntakeError`].

/// Top-level error for the intake binary.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: roster_core::ConfigError,
    },

    /// Connecting to or preparing a backing service failed.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: roster_db::DbError,
    },

    /// The pipeline could not be assembled from the configuration.
    #[error("pipeline error: {source}")]
    Pipeline {
        /// The underlying pipeline error.
        #[from]
        source: roster_core::SubmissionError,
    },

    /// Reading submissions or writing reports failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A report could not be serialized.
    #[error("report serialization error: {source}")]
    Report {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}
