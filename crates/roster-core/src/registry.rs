//! Field registry: the ordered field metadata the pipeline validates
//! against.
//!
//! The registry is injected into the pipeline rather than read from global
//! state. [`StaticFieldRegistry`] holds a fixed list, built either from
//! configuration or from the `fields` table.

use roster_db::{DbError, FieldStore};
use roster_types::FieldDefinition;

/// Source of ordered field metadata. Read-only to the pipeline.
pub trait FieldRegistry: Send + Sync {
    /// Every field definition in registry order.
    fn fields(&self) -> &[FieldDefinition];

    /// The definition named `name`.
    fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields().iter().find(|f| f.name == name)
    }
}

/// A registry over a fixed list of definitions, kept in
/// `(position, name)` order.
#[derive(Debug, Clone, Default)]
pub struct StaticFieldRegistry {
    fields: Vec<FieldDefinition>,
}

impl StaticFieldRegistry {
    /// Build a registry from definitions in any order.
    pub fn new(mut fields: Vec<FieldDefinition>) -> Self {
        fields.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        Self { fields }
    }

    /// Build a registry from the `fields` table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the table cannot be read.
    pub async fn load(store: &FieldStore<'_>) -> Result<Self, DbError> {
        let fields = store.load_fields().await?;
        tracing::info!(count = fields.len(), "Loaded field registry");
        Ok(Self::new(fields))
    }

    /// Number of fields.
    pub const fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the registry has no fields.
    pub const fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldRegistry for StaticFieldRegistry {
    fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }
}
