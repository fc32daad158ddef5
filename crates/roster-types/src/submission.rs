//! Incoming form submissions and the matching configuration that travels
//! with them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::RecordId;

/// A raw value as submitted by a form.
///
/// Most elements submit one string; multi-select and checkbox-group elements
/// submit a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum RawValue {
    /// A single string value.
    Single(String),
    /// A list of string values.
    Multi(Vec<String>),
}

impl RawValue {
    /// Whether the value carries no content once whitespace is ignored.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Single(s) => s.trim().is_empty(),
            Self::Multi(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// Flatten the value to a single string. Lists are joined with `", "`.
    pub fn to_text(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Multi(items) => items.join(", "),
        }
    }

    /// The individual values, a one-element list for [`RawValue::Single`].
    pub fn items(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Multi(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// What happens when a submission matches an existing record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DuplicatePolicy {
    /// Never merge. A match is skipped and reported to the submitter.
    #[default]
    Strict,
    /// Merge the submission into the matched record.
    Update,
    /// Skip the match silently, without reporting an error.
    Block,
}

/// How several records matching the same field value are handled.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AmbiguityMode {
    /// Pick the record with the lowest id and log a diagnostic.
    #[default]
    LowestId,
    /// Refuse the submission with a `DuplicateAmbiguous` error.
    Reject,
}

/// Matching configuration for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MatchingConfig {
    /// Policy applied when a match is found.
    #[serde(default)]
    pub policy: DuplicatePolicy,
    /// Matching fields, highest priority first.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Handling of multiple records matching one field.
    #[serde(default)]
    pub ambiguity: AmbiguityMode,
}

impl MatchingConfig {
    /// Create a configuration matching on `fields` in priority order.
    pub fn new(policy: DuplicatePolicy, fields: &[&str]) -> Self {
        Self {
            policy,
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            ambiguity: AmbiguityMode::LowestId,
        }
    }

    /// Set the ambiguity mode.
    #[must_use]
    pub const fn with_ambiguity(mut self, ambiguity: AmbiguityMode) -> Self {
        self.ambiguity = ambiguity;
        self
    }
}

/// A form submission: submitted values plus control metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Submission {
    /// Submitted values keyed by field name.
    #[serde(default)]
    pub values: BTreeMap<String, RawValue>,
    /// Explicit record to update, bypassing matching.
    #[serde(default)]
    pub record_id_hint: Option<RecordId>,
    /// Fields the form actually rendered. `None` means every registry field.
    #[serde(default)]
    pub expected_fields: Option<Vec<String>>,
    /// Duplicate matching configuration.
    #[serde(default)]
    pub matching: MatchingConfig,
}

impl Submission {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a submitted value.
    #[must_use]
    pub fn with_value(mut self, field: &str, value: impl Into<RawValue>) -> Self {
        self.values.insert(field.to_owned(), value.into());
        self
    }

    /// Target a specific record.
    #[must_use]
    pub const fn with_hint(mut self, id: RecordId) -> Self {
        self.record_id_hint = Some(id);
        self
    }

    /// Restrict processing to the fields the form rendered.
    #[must_use]
    pub fn with_expected_fields(mut self, fields: &[&str]) -> Self {
        self.expected_fields = Some(fields.iter().map(|f| (*f).to_owned()).collect());
        self
    }

    /// Set the matching configuration.
    #[must_use]
    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    /// The submitted value for `field`, if any.
    pub fn value(&self, field: &str) -> Option<&RawValue> {
        self.values.get(field)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_accepts_string_or_list() {
        let single: RawValue = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(single, RawValue::Single("hello".to_owned()));
        let multi: RawValue = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(multi.to_text(), "a, b");
    }

    #[test]
    fn whitespace_only_values_are_blank() {
        assert!(RawValue::from("   ").is_blank());
        assert!(RawValue::Multi(vec![String::new(), " ".to_owned()]).is_blank());
        assert!(!RawValue::from(" x ").is_blank());
    }

    #[test]
    fn submission_deserializes_with_defaults() {
        let sub: Submission =
            serde_json::from_str(r#"{"values":{"email":"a@x.com"},"record_id_hint":5}"#).unwrap();
        assert_eq!(sub.record_id_hint, Some(RecordId(5)));
        assert_eq!(sub.matching.policy, DuplicatePolicy::Strict);
        assert!(sub.expected_fields.is_none());
    }
}
