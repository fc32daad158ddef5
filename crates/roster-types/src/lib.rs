//! Shared type definitions for the Roster record database.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the record store, the submission pipeline, and the form layer
//! that renders results. Types flow to `TypeScript` via `ts-rs` so the form
//! layer can consume outcomes and validation errors without hand-written
//! mirrors.
//!
//! # Modules
//!
//! - [`ids`] -- Numeric record ids and private link tokens
//! - [`fields`] -- Field definitions, form element kinds, validation rules
//! - [`submission`] -- Submitted values and matching configuration
//! - [`record`] -- Stored records, column sets, sort orders
//! - [`outcome`] -- Match decisions, outcomes, validation errors

pub mod fields;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod submission;

// Re-export all public types at crate root for convenience.
pub use fields::{FieldDefinition, FormElementKind, ValidationRule};
pub use ids::{PrivateId, PrivateIdError, RecordId};
pub use outcome::{
    FieldError, FieldErrorKind, MatchDecision, SkipReason, SubmissionOutcome, ValidationErrors,
    WriteAction,
};
pub use record::{Column, ColumnSet, Record, SortDirection, SortOrder, value_as_text};
pub use submission::{AmbiguityMode, DuplicatePolicy, MatchingConfig, RawValue, Submission};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the form layer.

    #[test]
    fn export_bindings() {
        // ts-rs writes each exported type to `bindings/` relative to the
        // crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::RecordId::export_all();
        let _ = crate::ids::PrivateId::export_all();

        // Fields
        let _ = crate::fields::FormElementKind::export_all();
        let _ = crate::fields::ValidationRule::export_all();
        let _ = crate::fields::FieldDefinition::export_all();

        // Submissions
        let _ = crate::submission::RawValue::export_all();
        let _ = crate::submission::DuplicatePolicy::export_all();
        let _ = crate::submission::AmbiguityMode::export_all();
        let _ = crate::submission::MatchingConfig::export_all();
        let _ = crate::submission::Submission::export_all();

        // Records
        let _ = crate::record::Record::export_all();
        let _ = crate::record::Column::export_all();
        let _ = crate::record::ColumnSet::export_all();
        let _ = crate::record::SortDirection::export_all();
        let _ = crate::record::SortOrder::export_all();

        // Outcomes
        let _ = crate::outcome::SkipReason::export_all();
        let _ = crate::outcome::MatchDecision::export_all();
        let _ = crate::outcome::WriteAction::export_all();
        let _ = crate::outcome::SubmissionOutcome::export_all();
        let _ = crate::outcome::FieldErrorKind::export_all();
        let _ = crate::outcome::FieldError::export_all();
        let _ = crate::outcome::ValidationErrors::export_all();
    }
}
