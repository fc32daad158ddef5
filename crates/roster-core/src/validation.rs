//! Validation and column-set assembly.
//!
//! [`ValidationEngine::assemble`] walks the active field set once, resolves
//! each field's effective value, validates it, and normalizes it. Failures
//! are accumulated across all fields; if there is any, the caller gets the
//! complete error set and no column set at all.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use roster_db::RecordStore;
use roster_types::{
    ColumnSet, FieldDefinition, FieldErrorKind, FormElementKind, MatchDecision, RawValue,
    RecordId, Submission, ValidationErrors, ValidationRule,
};
use validator::{ValidateEmail, ValidateUrl};

use crate::context::RequestContext;
use crate::error::SubmissionError;
use crate::normalize::{comparable_text, empty_value, is_empty_value, normalize};

/// A named, application-supplied check for [`ValidationRule::Custom`].
pub trait Validator: Send + Sync {
    /// Check the trimmed, non-empty `value` of `field`.
    ///
    /// Returns the message to show next to the field on failure.
    fn validate(
        &self,
        field: &FieldDefinition,
        value: &str,
        submission: &Submission,
    ) -> Result<(), String>;
}

/// Custom validators, looked up by the name a field's rule carries.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `validator` under `name`, replacing any earlier one.
    pub fn register(&mut self, name: &str, validator: Arc<dyn Validator>) {
        self.validators.insert(name.to_owned(), validator);
    }

    /// Builder form of [`ValidatorRegistry::register`].
    #[must_use]
    pub fn with(mut self, name: &str, validator: Arc<dyn Validator>) -> Self {
        self.register(name, validator);
        self
    }

    /// The validator registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(name)
    }
}

/// Validates submissions and builds the column set for the write.
pub struct ValidationEngine {
    store: Arc<dyn RecordStore>,
    validators: ValidatorRegistry,
    patterns: HashMap<String, Regex>,
}

impl ValidationEngine {
    /// Create an engine that checks uniqueness against `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            validators: ValidatorRegistry::new(),
            patterns: HashMap::new(),
        }
    }

    /// Compile the regex rules of `fields` up front.
    ///
    /// Patterns that do not compile are left out here and reported by
    /// [`ValidationEngine::check_fields`].
    #[must_use]
    pub fn with_patterns(mut self, fields: &[FieldDefinition]) -> Self {
        let compiled = fields.iter().filter_map(|field| match &field.validation {
            ValidationRule::Regex { pattern } => Regex::new(pattern)
                .ok()
                .map(|regex| (pattern.clone(), regex)),
            _ => None,
        });
        self.patterns.extend(compiled);
        self
    }

    /// Use `validators` for custom rules.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Check that every rule in `fields` can be evaluated: patterns compile,
    /// custom validators are registered, confirmation targets exist.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Config`] naming the first unusable rule.
    pub fn check_fields(&self, fields: &[FieldDefinition]) -> Result<(), SubmissionError> {
        for field in fields {
            match &field.validation {
                ValidationRule::Regex { pattern } => {
                    self.pattern(&field.name, pattern)?;
                }
                ValidationRule::Custom { name } => {
                    self.custom(&field.name, name)?;
                }
                ValidationRule::Matches { field: source } => {
                    if !fields.iter().any(|f| &f.name == source) {
                        return Err(SubmissionError::Config(format!(
                            "field {}: confirms unknown field {source}",
                            field.name
                        )));
                    }
                }
                ValidationRule::None
                | ValidationRule::Required
                | ValidationRule::Email
                | ValidationRule::Url
                | ValidationRule::Numeric
                | ValidationRule::Unique => {}
            }
        }
        Ok(())
    }

    /// Validate `submission` and assemble the columns to write.
    ///
    /// `fields` is the full registry; the submission's expected-field list,
    /// if any, narrows it. Under [`MatchDecision::Update`], fields the
    /// submission omits (and that have no persistent prior value) are left
    /// out entirely so the stored values survive.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Validation`] with every failure found,
    /// [`SubmissionError::Config`] for an unusable rule, or
    /// [`SubmissionError::Database`] if a uniqueness check fails.
    pub async fn assemble(
        &self,
        fields: &[FieldDefinition],
        submission: &Submission,
        decision: &MatchDecision,
        ctx: &RequestContext,
    ) -> Result<ColumnSet, SubmissionError> {
        let active = active_fields(fields, submission);
        let target = match decision {
            MatchDecision::Update(id) => Some(*id),
            MatchDecision::Insert | MatchDecision::Skip(_) => None,
        };
        let mut errors = ValidationErrors::new();

        // Captcha first, on its own, and never written.
        for field in active
            .iter()
            .filter(|f| f.form_element == FormElementKind::Captcha)
        {
            check_captcha(field, submission, ctx, &mut errors);
        }

        let mut columns = ColumnSet::new();
        for field in active.iter().filter(|f| f.form_element.stores_value()) {
            let Some(raw) = effective_value(field, submission, ctx, target.is_some()) else {
                continue;
            };
            let Some(value) = self
                .check_value(field, &raw, fields, submission, target, &mut errors)
                .await?
            else {
                continue;
            };
            if target.is_none() && is_empty_value(&value) {
                continue;
            }
            columns.push(&field.name, value);
        }

        if errors.is_empty() {
            tracing::debug!(columns = columns.len(), "Assembled column set");
            Ok(columns)
        } else {
            tracing::debug!(errors = errors.len(), "Submission failed validation");
            Err(SubmissionError::Validation(errors))
        }
    }

    /// Validate and normalize one effective value.
    ///
    /// Returns `Ok(None)` after recording a field error.
    async fn check_value(
        &self,
        field: &FieldDefinition,
        raw: &RawValue,
        fields: &[FieldDefinition],
        submission: &Submission,
        target: Option<RecordId>,
        errors: &mut ValidationErrors,
    ) -> Result<Option<serde_json::Value>, SubmissionError> {
        let label = field.label();

        if raw.is_blank() {
            if field.validation.implies_required() {
                errors.push(
                    &field.name,
                    FieldErrorKind::Required,
                    format!("{label} is required."),
                );
                return Ok(None);
            }
            return Ok(Some(empty_value(field.form_element)));
        }

        if field.form_element.is_choice() && !field.options.is_empty() {
            let rejected = raw
                .items()
                .into_iter()
                .map(str::trim)
                .find(|item| !item.is_empty() && !field.options.iter().any(|o| o == item));
            if let Some(item) = rejected {
                errors.push(
                    &field.name,
                    FieldErrorKind::InvalidOption,
                    format!("{label}: \"{item}\" is not one of the available choices."),
                );
                return Ok(None);
            }
        }

        let value = match normalize(field.form_element, raw) {
            Ok(value) => value,
            Err(e) => {
                errors.push(&field.name, FieldErrorKind::InvalidFormat, e.message(label));
                return Ok(None);
            }
        };

        let text = raw.to_text().trim().to_owned();
        let failure = self
            .check_rule(field, &text, &value, fields, submission, target)
            .await?;

        if let Some((kind, message)) = failure {
            errors.push(&field.name, kind, message);
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Apply the field's rule to a present, normalized value.
    ///
    /// Returns the failure to record, if any.
    async fn check_rule(
        &self,
        field: &FieldDefinition,
        text: &str,
        value: &serde_json::Value,
        fields: &[FieldDefinition],
        submission: &Submission,
        target: Option<RecordId>,
    ) -> Result<Option<(FieldErrorKind, String)>, SubmissionError> {
        let label = field.label();
        let failure = match &field.validation {
            ValidationRule::None | ValidationRule::Required => None,
            ValidationRule::Email => (!text.to_owned().validate_email()).then(|| {
                (
                    FieldErrorKind::InvalidFormat,
                    format!("{label} must be a valid email address."),
                )
            }),
            ValidationRule::Url => (!text.to_owned().validate_url()).then(|| {
                (
                    FieldErrorKind::InvalidFormat,
                    format!("{label} must be a valid URL."),
                )
            }),
            ValidationRule::Numeric => (!text.parse::<f64>().is_ok_and(f64::is_finite)).then(|| {
                (
                    FieldErrorKind::InvalidFormat,
                    format!("{label} must be a number."),
                )
            }),
            ValidationRule::Regex { pattern } => {
                let regex = self.pattern(&field.name, pattern)?;
                (!regex.is_match(text)).then(|| {
                    (
                        FieldErrorKind::InvalidFormat,
                        format!("{label} is not in the expected format."),
                    )
                })
            }
            ValidationRule::Matches { field: source } => {
                let source_text = submission
                    .value(source)
                    .map(|v| v.to_text().trim().to_owned())
                    .unwrap_or_default();
                let source_label = fields
                    .iter()
                    .find(|f| &f.name == source)
                    .map_or(source.as_str(), FieldDefinition::label);
                (source_text != text).then(|| {
                    (
                        FieldErrorKind::Mismatch,
                        format!("{label} must match {source_label}."),
                    )
                })
            }
            ValidationRule::Unique => {
                let stored = comparable_text(value);
                let holders = self.store.query_by_field_equal(&field.name, &stored).await?;
                holders.iter().any(|id| Some(*id) != target).then(|| {
                    (
                        FieldErrorKind::NotUnique,
                        format!("{label} \"{stored}\" is already in use."),
                    )
                })
            }
            ValidationRule::Custom { name } => {
                let validator = self.custom(&field.name, name)?;
                validator
                    .validate(field, text, submission)
                    .err()
                    .map(|message| (FieldErrorKind::Custom, message))
            }
        };
        Ok(failure)
    }

    fn pattern(&self, field: &str, pattern: &str) -> Result<Cow<'_, Regex>, SubmissionError> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(Cow::Borrowed(regex));
        }
        Regex::new(pattern).map(Cow::Owned).map_err(|e| {
            SubmissionError::Config(format!("field {field}: invalid pattern {pattern:?}: {e}"))
        })
    }

    fn custom(&self, field: &str, name: &str) -> Result<Arc<dyn Validator>, SubmissionError> {
        self.validators.get(name).cloned().ok_or_else(|| {
            SubmissionError::Config(format!("field {field}: no validator registered as {name:?}"))
        })
    }
}

/// The registry fields this submission covers, in registry order.
fn active_fields<'a>(
    fields: &'a [FieldDefinition],
    submission: &Submission,
) -> Vec<&'a FieldDefinition> {
    match &submission.expected_fields {
        Some(expected) => fields
            .iter()
            .filter(|f| expected.iter().any(|name| name == &f.name))
            .collect(),
        None => fields.iter().collect(),
    }
}

/// Submitted value, else persistent prior value, else (on insert only) the
/// field default. `None` means the field is left untouched.
fn effective_value<'a>(
    field: &FieldDefinition,
    submission: &'a Submission,
    ctx: &'a RequestContext,
    updating: bool,
) -> Option<Cow<'a, RawValue>> {
    if let Some(value) = submission.value(&field.name) {
        return Some(Cow::Borrowed(value));
    }
    if let Some(prior) = ctx.prior_value(&field.name).filter(|_| field.persistent) {
        return Some(Cow::Borrowed(prior));
    }
    if updating {
        return None;
    }
    Some(Cow::Owned(RawValue::Single(field.default_value.clone())))
}

fn check_captcha(
    field: &FieldDefinition,
    submission: &Submission,
    ctx: &RequestContext,
    errors: &mut ValidationErrors,
) {
    let answer = submission
        .value(&field.name)
        .map(|v| v.to_text().trim().to_lowercase())
        .unwrap_or_default();
    let expected = ctx
        .captcha_answer
        .as_deref()
        .map(|a| a.trim().to_lowercase());
    let passed = !answer.is_empty() && expected.is_some_and(|e| e == answer);
    if !passed {
        errors.push(
            &field.name,
            FieldErrorKind::Captcha,
            format!("The answer to {} is incorrect.", field.label()),
        );
    }
}
