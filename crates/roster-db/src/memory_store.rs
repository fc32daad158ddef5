//! In-memory [`RecordStore`] for tests and single-process use.
//!
//! Mirrors the `PostgreSQL` semantics of [`PgRecordStore`]: field equality on
//! the lowercased text form of a value, merge-on-update, optional
//! per-field uniqueness constraints, and a unique private id. Every write
//! runs under one lock, so it is atomic with respect to every other call.
//!
//! [`PgRecordStore`]: crate::record_store::PgRecordStore

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use roster_types::{ColumnSet, PrivateId, Record, RecordId, SortDirection, SortOrder};

use crate::error::{DbError, FIELD_UNIQUE_INDEX_PREFIX, PRIVATE_ID_CONSTRAINT};
use crate::record_store::RecordStore;

/// The text a stored value compares as, matching `PostgreSQL`'s `->>`.
fn stored_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Sort key of a record under a field sort: `COALESCE(data->>field, '')`.
fn sort_text(record: &Record, field: &str) -> String {
    record.value(field).and_then(stored_text).unwrap_or_default()
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<RecordId, Record>,
    last_id: i64,
    unique_fields: BTreeSet<String>,
    unavailable: bool,
    writes: u64,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable {
            return Err(DbError::Unavailable("memory record store is offline".to_owned()));
        }
        Ok(())
    }

    /// Fail if writing `columns` to record `target` (or a new record when
    /// `None`) would duplicate a unique field value held by another record.
    fn check_unique(&self, target: Option<RecordId>, columns: &ColumnSet) -> Result<(), DbError> {
        for column in columns {
            if !self.unique_fields.contains(&column.name) {
                continue;
            }
            let Some(candidate) = stored_text(&column.value).map(|s| s.to_lowercase()) else {
                continue;
            };
            let clash = self.records.values().any(|r| {
                Some(r.id) != target
                    && r.value(&column.name)
                        .and_then(stored_text)
                        .is_some_and(|s| s.to_lowercase() == candidate)
            });
            if clash {
                return Err(DbError::unique_violation(&format!(
                    "{FIELD_UNIQUE_INDEX_PREFIX}{}",
                    column.name
                )));
            }
        }
        Ok(())
    }
}

/// Record store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce uniqueness of `field` values, like a unique index.
    #[must_use]
    pub fn with_unique_field(self, field: &str) -> Self {
        self.state.lock().unique_fields.insert(field.to_owned());
        self
    }

    /// Simulate an outage: every call fails with [`DbError::Unavailable`]
    /// while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Number of successful writes (inserts and updates) so far.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Insert a record with a chosen id, bypassing id assignment.
    ///
    /// Later inserts are assigned ids above the highest seeded id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] if the id, private id, or a
    /// unique field value is already taken.
    pub fn seed(
        &self,
        id: RecordId,
        private_id: PrivateId,
        values: &[(&str, serde_json::Value)],
    ) -> Result<(), DbError> {
        let mut state = self.state.lock();
        if state.records.contains_key(&id) {
            return Err(DbError::unique_violation("records_pkey"));
        }
        if state.records.values().any(|r| r.private_id == private_id) {
            return Err(DbError::unique_violation(PRIVATE_ID_CONSTRAINT));
        }
        let mut columns = ColumnSet::new();
        for (name, value) in values {
            columns.push(name, value.clone());
        }
        state.check_unique(None, &columns)?;
        let now = Utc::now();
        state.records.insert(
            id,
            Record {
                id,
                private_id,
                values: columns.to_json_object().into_iter().collect(),
                created_at: now,
                updated_at: now,
            },
        );
        state.last_id = state.last_id.max(id.into_inner());
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_by_id(&self, id: RecordId) -> Result<Option<Record>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.records.get(&id).cloned())
    }

    async fn get_by_private_id(&self, private_id: &PrivateId) -> Result<Option<Record>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .records
            .values()
            .find(|r| &r.private_id == private_id)
            .cloned())
    }

    async fn private_id_exists(&self, private_id: &PrivateId) -> Result<bool, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.records.values().any(|r| &r.private_id == private_id))
    }

    async fn query_by_field_equal(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<RecordId>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        let needle = value.to_lowercase();
        Ok(state
            .records
            .values()
            .filter(|r| {
                r.value(field)
                    .and_then(stored_text)
                    .is_some_and(|s| s.to_lowercase() == needle)
            })
            .map(|r| r.id)
            .collect())
    }

    async fn insert(
        &self,
        private_id: &PrivateId,
        columns: &ColumnSet,
    ) -> Result<RecordId, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;
        if state.records.values().any(|r| &r.private_id == private_id) {
            return Err(DbError::unique_violation(PRIVATE_ID_CONSTRAINT));
        }
        state.check_unique(None, columns)?;

        let next = state
            .last_id
            .checked_add(1)
            .ok_or_else(|| DbError::Config("record id sequence exhausted".to_owned()))?;
        let id = RecordId::new(next);
        let now = Utc::now();
        state.records.insert(
            id,
            Record {
                id,
                private_id: private_id.clone(),
                values: columns.to_json_object().into_iter().collect(),
                created_at: now,
                updated_at: now,
            },
        );
        state.last_id = next;
        state.writes = state.writes.saturating_add(1);
        Ok(id)
    }

    async fn update(&self, id: RecordId, columns: &ColumnSet) -> Result<PrivateId, DbError> {
        let mut state = self.state.lock();
        state.check_available()?;
        state.check_unique(Some(id), columns)?;

        let record = state
            .records
            .get_mut(&id)
            .ok_or(DbError::RecordNotFound(id))?;
        for column in columns {
            record.values.insert(column.name.clone(), column.value.clone());
        }
        record.updated_at = Utc::now();
        let private_id = record.private_id.clone();
        state.writes = state.writes.saturating_add(1);
        Ok(private_id)
    }

    async fn max_id(&self) -> Result<Option<RecordId>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.records.keys().next_back().copied())
    }

    async fn list_window(
        &self,
        sort: &SortOrder,
        start: RecordId,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        if !state.records.contains_key(&start) {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<&Record> = state.records.values().collect();
        ordered.sort_by(|a, b| compare_in_order(sort, a, b));

        let position = ordered.iter().position(|r| r.id == start).unwrap_or(0);
        Ok(ordered
            .into_iter()
            .skip(position)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, DbError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(u64::try_from(state.records.len()).unwrap_or(u64::MAX))
    }
}

/// Compare two records in `sort` order, id breaking ties.
fn compare_in_order(sort: &SortOrder, a: &Record, b: &Record) -> Ordering {
    let ordering = sort.field.as_ref().map_or_else(
        || a.id.cmp(&b.id),
        |field| {
            sort_text(a, field)
                .cmp(&sort_text(b, field))
                .then(a.id.cmp(&b.id))
        },
    );
    match sort.direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}
