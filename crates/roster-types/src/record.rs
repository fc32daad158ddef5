//! Stored records, column sets, and sort orders.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{PrivateId, RecordId};

/// A stored record.
///
/// `values` holds one JSON value per field: a string for text elements, a
/// number for numeric elements, and an array of strings for multi-value
/// elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Record {
    /// Numeric id, immutable once assigned.
    pub id: RecordId,
    /// Link token, unique across the store.
    pub private_id: PrivateId,
    /// Field values keyed by field name.
    pub values: BTreeMap<String, serde_json::Value>,
    /// When the record was inserted.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// The stored value for `field`.
    pub fn value(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }

    /// The stored value for `field` rendered as text, the form used for
    /// equality matching and sorting.
    pub fn text(&self, field: &str) -> Option<String> {
        self.values.get(field).map(value_as_text)
    }
}

/// Render a stored JSON value as the text used for comparisons.
///
/// Strings are returned unquoted, arrays are joined with `", "`, and `null`
/// becomes the empty string.
pub fn value_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_as_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// One pending column assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Column {
    /// Field name.
    pub name: String,
    /// Normalized value to write.
    pub value: serde_json::Value,
}

/// Ordered column assignments for a single write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct ColumnSet(Vec<Column>);

impl ColumnSet {
    /// Create an empty column set.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an assignment.
    pub fn push(&mut self, name: &str, value: serde_json::Value) {
        self.0.push(Column {
            name: name.to_owned(),
            value,
        });
    }

    /// Whether no assignments are pending.
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of assignments.
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over assignments in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.0.iter()
    }

    /// The value assigned to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.iter().find(|c| c.name == name).map(|c| &c.value)
    }

    /// Collapse the assignments into a JSON object for storage.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.0
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }
}

impl<'a> IntoIterator for &'a ColumnSet {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Direction of a sort order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Order in which records are browsed and cache windows are laid out.
///
/// Records are ordered by the text of `field` (or by id when `field` is
/// `None`), with the numeric id as tie-breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SortOrder {
    /// Field to sort by. `None` sorts by numeric id.
    #[serde(default)]
    pub field: Option<String>,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortOrder {
    /// Ascending numeric id, the default browse order.
    pub const fn by_id() -> Self {
        Self {
            field: None,
            direction: SortDirection::Ascending,
        }
    }

    /// Sort by a field's value.
    pub fn by_field(field: &str, direction: SortDirection) -> Self {
        Self {
            field: Some(field.to_owned()),
            direction,
        }
    }

    /// Stable string form, used in cache keys.
    pub fn cache_key(&self) -> String {
        let dir = match self.direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        self.field
            .as_ref()
            .map_or_else(|| format!("id:{dir}"), |f| format!("f.{f}:{dir}"))
    }
}
