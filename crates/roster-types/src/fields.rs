//! Field metadata supplied by the field registry.
//!
//! A [`FieldDefinition`] describes one column of the record database: how the
//! form renders it ([`FormElementKind`]), how submitted values are checked
//! ([`ValidationRule`]), and what value it takes when a submission omits it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Form element kinds
// ---------------------------------------------------------------------------

/// The form element used to collect a field's value.
///
/// The kind decides how a raw submitted value is normalized before it is
/// written, and whether the field produces a column at all.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum FormElementKind {
    /// Single line of plain text.
    #[default]
    TextLine,
    /// Multi-line plain text.
    TextArea,
    /// Multi-line text that may contain markup.
    RichText,
    /// Single checkbox holding one value when checked.
    Checkbox,
    /// One choice out of a set of radio buttons.
    Radio,
    /// One choice out of a dropdown list.
    Dropdown,
    /// Any number of choices out of a checkbox group.
    MultiCheckbox,
    /// Any number of choices out of a multi-select list.
    MultiSelect,
    /// Calendar date.
    Date,
    /// Whole number.
    Numeric,
    /// Number with a fractional part.
    Decimal,
    /// URL.
    Link,
    /// Value carried by the form but not shown to the user.
    Hidden,
    /// Human-verification challenge. Checked, never stored.
    Captcha,
    /// Timestamp maintained by the store. Never written from a submission.
    Timestamp,
    /// Display-only element with no data.
    Placeholder,
}

impl FormElementKind {
    /// Whether a submitted value for this kind is written to the record.
    pub const fn stores_value(self) -> bool {
        !matches!(self, Self::Captcha | Self::Timestamp | Self::Placeholder)
    }

    /// Whether this kind collects a list of values.
    pub const fn is_multi_value(self) -> bool {
        matches!(self, Self::MultiCheckbox | Self::MultiSelect)
    }

    /// Whether values must come from the field's `options` list.
    pub const fn is_choice(self) -> bool {
        matches!(
            self,
            Self::Radio | Self::Dropdown | Self::MultiCheckbox | Self::MultiSelect
        )
    }
}

// ---------------------------------------------------------------------------
// Validation rules
// ---------------------------------------------------------------------------

/// How a field's effective value is validated.
///
/// Every rule other than [`ValidationRule::None`] makes the field required:
/// an empty value fails with a "required" message before the format part of
/// the rule is considered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(tag = "rule", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ValidationRule {
    /// No validation. Empty values are accepted.
    #[default]
    None,
    /// Value must be non-empty.
    Required,
    /// Value must be an email address.
    Email,
    /// Value must be an absolute URL.
    Url,
    /// Value must parse as a number.
    Numeric,
    /// Value must match a regular expression.
    Regex {
        /// The pattern, in `regex` crate syntax.
        pattern: String,
    },
    /// Value must equal the submitted value of another field.
    Matches {
        /// Name of the field this one confirms.
        field: String,
    },
    /// No other record may hold the same value for this field.
    Unique,
    /// Value is checked by a validator registered under `name`.
    Custom {
        /// Registered validator name.
        name: String,
    },
}

impl ValidationRule {
    /// Whether an empty value fails this rule.
    pub const fn implies_required(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// ---------------------------------------------------------------------------
// Field definition
// ---------------------------------------------------------------------------

/// Metadata for one field of the record database.
///
/// Owned by the field registry. The core treats definitions as immutable for
/// the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FieldDefinition {
    /// Column name, unique across the registry.
    pub name: String,
    /// Human-readable label used in validation messages.
    #[serde(default)]
    pub title: String,
    /// Display group the field belongs to.
    #[serde(default)]
    pub group: String,
    /// Sort position within the registry.
    #[serde(default)]
    pub position: i32,
    /// Form element used to collect the value.
    #[serde(default)]
    pub form_element: FormElementKind,
    /// Validation applied to the effective value.
    #[serde(default)]
    pub validation: ValidationRule,
    /// Whether a value from an earlier submission in the same session is
    /// reused when this submission omits the field.
    #[serde(default)]
    pub persistent: bool,
    /// Value used when a new record omits the field.
    #[serde(default)]
    pub default_value: String,
    /// Allowed values for choice elements. Empty means unrestricted.
    #[serde(default)]
    pub options: Vec<String>,
}

impl FieldDefinition {
    /// Create a definition with no validation, no default, and no options.
    pub fn new(name: &str, form_element: FormElementKind) -> Self {
        Self {
            name: name.to_owned(),
            title: String::new(),
            group: String::new(),
            position: 0,
            form_element,
            validation: ValidationRule::None,
            persistent: false,
            default_value: String::new(),
            options: Vec::new(),
        }
    }

    /// Set the human-readable title.
    #[must_use]
    pub fn with_title(mut self, title: &str) -> Self {
        title.clone_into(&mut self.title);
        self
    }

    /// Set the display group.
    #[must_use]
    pub fn with_group(mut self, group: &str) -> Self {
        group.clone_into(&mut self.group);
        self
    }

    /// Set the validation rule.
    #[must_use]
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = rule;
        self
    }

    /// Mark the field persistent across submissions in a session.
    #[must_use]
    pub const fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Set the default value used on insert.
    #[must_use]
    pub fn with_default(mut self, value: &str) -> Self {
        value.clone_into(&mut self.default_value);
        self
    }

    /// Set the allowed options for a choice element.
    #[must_use]
    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| (*o).to_owned()).collect();
        self
    }

    /// The label shown in messages: the title, or the name when untitled.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn non_data_kinds_store_nothing() {
        assert!(!FormElementKind::Captcha.stores_value());
        assert!(!FormElementKind::Timestamp.stores_value());
        assert!(!FormElementKind::Placeholder.stores_value());
        assert!(FormElementKind::Hidden.stores_value());
    }

    #[test]
    fn every_rule_but_none_implies_required() {
        assert!(!ValidationRule::None.implies_required());
        assert!(ValidationRule::Email.implies_required());
        assert!(
            ValidationRule::Regex {
                pattern: "^x$".to_owned()
            }
            .implies_required()
        );
    }

    #[test]
    fn rule_deserializes_from_tagged_map() {
        let rule: ValidationRule =
            serde_json::from_str(r#"{"rule":"regex","pattern":"^[0-9]{5}$"}"#).unwrap();
        assert_eq!(
            rule,
            ValidationRule::Regex {
                pattern: "^[0-9]{5}$".to_owned()
            }
        );
    }

    #[test]
    fn definition_defaults_fill_missing_keys() {
        let def: FieldDefinition = serde_json::from_str(r#"{"name":"email"}"#).unwrap();
        assert_eq!(def.form_element, FormElementKind::TextLine);
        assert_eq!(def.validation, ValidationRule::None);
        assert_eq!(def.label(), "email");
        assert_eq!(def.with_title("Email").label(), "Email");
    }
}
