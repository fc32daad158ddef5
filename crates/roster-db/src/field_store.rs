//! Field registry persistence on the `fields` table.
//!
//! Field definitions are read in `(position, name)` order, which is the
//! order the submission pipeline walks them and reports validation errors.

use roster_types::{FieldDefinition, FormElementKind, ValidationRule};
use sqlx::PgPool;

use crate::error::DbError;

/// Operations on the `fields` table.
pub struct FieldStore<'a> {
    pool: &'a PgPool,
}

impl<'a> FieldStore<'a> {
    /// Create a field store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load every field definition in registry order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    /// Returns [`DbError::Corrupt`] if a stored element kind or rule is
    /// unknown.
    pub async fn load_fields(&self) -> Result<Vec<FieldDefinition>, DbError> {
        let rows = sqlx::query_as::<_, FieldRow>(
            r"SELECT name, title, group_name, position, form_element, validation, persistent, default_value, options
              FROM fields
              ORDER BY position, name",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(FieldDefinition::try_from).collect()
    }

    /// Insert or replace field definitions in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any write fails; no definition is
    /// changed in that case.
    pub async fn upsert_fields(&self, fields: &[FieldDefinition]) -> Result<(), DbError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for field in fields {
            let validation = serde_json::to_value(&field.validation)?;
            let options = serde_json::to_value(&field.options)?;
            sqlx::query(
                r"INSERT INTO fields (name, title, group_name, position, form_element, validation, persistent, default_value, options)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                  ON CONFLICT (name) DO UPDATE SET
                    title = EXCLUDED.title,
                    group_name = EXCLUDED.group_name,
                    position = EXCLUDED.position,
                    form_element = EXCLUDED.form_element,
                    validation = EXCLUDED.validation,
                    persistent = EXCLUDED.persistent,
                    default_value = EXCLUDED.default_value,
                    options = EXCLUDED.options",
            )
            .bind(&field.name)
            .bind(&field.title)
            .bind(&field.group)
            .bind(field.position)
            .bind(form_element_to_db(field.form_element))
            .bind(&validation)
            .bind(field.persistent)
            .bind(&field.default_value)
            .bind(&options)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(count = fields.len(), "Upserted field definitions");
        Ok(())
    }

    /// Delete a field definition. Stored record values are left in place.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn delete_field(&self, name: &str) -> Result<bool, DbError> {
        let result = sqlx::query(r"DELETE FROM fields WHERE name = $1")
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// A row from the `fields` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FieldRow {
    /// Field name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Display group.
    pub group_name: String,
    /// Registry position.
    pub position: i32,
    /// Form element kind as stored text.
    pub form_element: String,
    /// Validation rule as a tagged JSON object.
    pub validation: serde_json::Value,
    /// Persistent flag.
    pub persistent: bool,
    /// Default value.
    pub default_value: String,
    /// Options as a JSON array of strings.
    pub options: serde_json::Value,
}

impl TryFrom<FieldRow> for FieldDefinition {
    type Error = DbError;

    fn try_from(row: FieldRow) -> Result<Self, Self::Error> {
        let form_element = form_element_from_db(&row.form_element)?;
        let validation: ValidationRule = serde_json::from_value(row.validation)
            .map_err(|e| DbError::Corrupt(format!("field {}: bad validation rule: {e}", row.name)))?;
        let options: Vec<String> = serde_json::from_value(row.options)
            .map_err(|e| DbError::Corrupt(format!("field {}: bad options: {e}", row.name)))?;
        Ok(Self {
            name: row.name,
            title: row.title,
            group: row.group_name,
            position: row.position,
            form_element,
            validation,
            persistent: row.persistent,
            default_value: row.default_value,
            options,
        })
    }
}

/// Convert a [`FormElementKind`] to its stored text.
pub const fn form_element_to_db(kind: FormElementKind) -> &'static str {
    match kind {
        FormElementKind::TextLine => "text-line",
        FormElementKind::TextArea => "text-area",
        FormElementKind::RichText => "rich-text",
        FormElementKind::Checkbox => "checkbox",
        FormElementKind::Radio => "radio",
        FormElementKind::Dropdown => "dropdown",
        FormElementKind::MultiCheckbox => "multi-checkbox",
        FormElementKind::MultiSelect => "multi-select",
        FormElementKind::Date => "date",
        FormElementKind::Numeric => "numeric",
        FormElementKind::Decimal => "decimal",
        FormElementKind::Link => "link",
        FormElementKind::Hidden => "hidden",
        FormElementKind::Captcha => "captcha",
        FormElementKind::Timestamp => "timestamp",
        FormElementKind::Placeholder => "placeholder",
    }
}

/// Parse stored text back into a [`FormElementKind`].
///
/// # Errors
///
/// Returns [`DbError::Corrupt`] for unknown text.
pub fn form_element_from_db(text: &str) -> Result<FormElementKind, DbError> {
    let kind = match text {
        "text-line" => FormElementKind::TextLine,
        "text-area" => FormElementKind::TextArea,
        "rich-text" => FormElementKind::RichText,
        "checkbox" => FormElementKind::Checkbox,
        "radio" => FormElementKind::Radio,
        "dropdown" => FormElementKind::Dropdown,
        "multi-checkbox" => FormElementKind::MultiCheckbox,
        "multi-select" => FormElementKind::MultiSelect,
        "date" => FormElementKind::Date,
        "numeric" => FormElementKind::Numeric,
        "decimal" => FormElementKind::Decimal,
        "link" => FormElementKind::Link,
        "hidden" => FormElementKind::Hidden,
        "captcha" => FormElementKind::Captcha,
        "timestamp" => FormElementKind::Timestamp,
        "placeholder" => FormElementKind::Placeholder,
        other => return Err(DbError::Corrupt(format!("unknown form element {other:?}"))),
    };
    Ok(kind)
}
