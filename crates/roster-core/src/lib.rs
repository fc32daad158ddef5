//! Roster core: record resolution, validation, caching, and the upsert
//! pipeline.
//!
//! A [`Submission`](roster_types::Submission) passes through four stages:
//!
//! - [`resolver`] decides Insert, Update, or Skip against the record store,
//!   using the submission's matching fields and [`MatchPolicy`].
//! - [`validation`] resolves each field's effective value, validates it,
//!   and assembles the column set, or returns every field error at once.
//! - [`executor`] performs the single atomic write and assigns private ids.
//! - [`cache`] is invalidated for the written record before the result is
//!   returned.
//!
//! [`SubmissionPipeline`] wires the stages together. Field metadata comes
//! from an injected [`FieldRegistry`]; per-request state from a
//! [`RequestContext`].

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod normalize;
pub mod pipeline;
pub mod private_id;
pub mod registry;
pub mod resolver;
pub mod validation;

pub use cache::{CacheStats, RecordCache};
pub use config::{
    CacheConfig, ConfigError, InfrastructureConfig, LoggingConfig, MatchingSettings,
    PrivateIdConfig, RosterConfig,
};
pub use context::RequestContext;
pub use error::SubmissionError;
pub use executor::PersistenceExecutor;
pub use pipeline::SubmissionPipeline;
pub use private_id::{PrivateIdGenerator, RandomPrivateIdGenerator};
pub use registry::{FieldRegistry, StaticFieldRegistry};
pub use resolver::{MatchPolicy, RecordMatchResolver};
pub use validation::{ValidationEngine, Validator, ValidatorRegistry};
