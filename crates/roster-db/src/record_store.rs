//! The record store: durable keyed storage for contact records.
//!
//! [`RecordStore`] is the seam between the submission pipeline and storage.
//! [`PgRecordStore`] implements it on the `records` table; the in-memory
//! [`MemoryRecordStore`](crate::memory_store::MemoryRecordStore) implements
//! it for tests and single-process use.
//!
//! # Matching semantics
//!
//! Field equality compares the text form of a stored value (`data->>field`)
//! case-insensitively, so `A@x.com` and `a@x.com` are the same address. A
//! store-enforced uniqueness guarantee for a matching field is installed with
//! [`PgRecordStore::ensure_unique_index`], which creates an expression index
//! over the same lowercased text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use roster_types::{ColumnSet, PrivateId, Record, RecordId, SortDirection, SortOrder};
use sqlx::PgPool;

use crate::error::{DbError, FIELD_UNIQUE_INDEX_PREFIX};

/// Durable keyed storage for records.
///
/// Every write is atomic: either all columns of a call apply or none do.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record by numeric id.
    async fn get_by_id(&self, id: RecordId) -> Result<Option<Record>, DbError>;

    /// Fetch one record by private id.
    async fn get_by_private_id(&self, private_id: &PrivateId) -> Result<Option<Record>, DbError>;

    /// Whether any record already uses `private_id`.
    async fn private_id_exists(&self, private_id: &PrivateId) -> Result<bool, DbError>;

    /// Ids of records whose `field` equals `value`, lowest id first.
    async fn query_by_field_equal(&self, field: &str, value: &str)
    -> Result<Vec<RecordId>, DbError>;

    /// Insert a new record and return its assigned id.
    async fn insert(&self, private_id: &PrivateId, columns: &ColumnSet)
    -> Result<RecordId, DbError>;

    /// Merge `columns` into record `id` and return its private id.
    ///
    /// Fields not named in `columns` keep their stored values.
    async fn update(&self, id: RecordId, columns: &ColumnSet) -> Result<PrivateId, DbError>;

    /// The highest assigned id, or `None` when the store is empty.
    async fn max_id(&self) -> Result<Option<RecordId>, DbError>;

    /// Up to `limit` records in `sort` order, starting at the position of
    /// record `start` (inclusive). Empty when `start` does not exist.
    async fn list_window(
        &self,
        sort: &SortOrder,
        start: RecordId,
        limit: usize,
    ) -> Result<Vec<Record>, DbError>;

    /// Total number of records.
    async fn count(&self) -> Result<u64, DbError>;
}

/// Reject field names that are not plain `[a-z0-9_]` identifiers.
///
/// Field names are bound as parameters in queries, but index DDL has to
/// interpolate them.
pub fn validate_field_name(field: &str) -> Result<(), DbError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::Config(format!("invalid field name {field:?}")))
    }
}

/// Clamp a window size to the `LIMIT` parameter type.
fn limit_to_db(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Record store on the `records` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the unique expression index that makes the store reject two
    /// records with the same (case-insensitive) value for `field`.
    ///
    /// Named `records_unique_{field}` so violations map back to the field.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] for an invalid field name.
    /// Returns [`DbError::Postgres`] if the index cannot be built (for
    /// example because duplicates already exist).
    pub async fn ensure_unique_index(&self, field: &str) -> Result<(), DbError> {
        validate_field_name(field)?;
        let ddl = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {FIELD_UNIQUE_INDEX_PREFIX}{field} \
             ON records (lower(data->>'{field}')) WHERE data ? '{field}'"
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::info!(field, "Ensured unique index on matching field");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get_by_id(&self, id: RecordId) -> Result<Option<Record>, DbError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r"SELECT id, private_id, data, created_at, updated_at
              FROM records
              WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Record::try_from).transpose()
    }

    async fn get_by_private_id(&self, private_id: &PrivateId) -> Result<Option<Record>, DbError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r"SELECT id, private_id, data, created_at, updated_at
              FROM records
              WHERE private_id = $1",
        )
        .bind(private_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Record::try_from).transpose()
    }

    async fn private_id_exists(&self, private_id: &PrivateId) -> Result<bool, DbError> {
        let row: (bool,) =
            sqlx::query_as(r"SELECT EXISTS (SELECT 1 FROM records WHERE private_id = $1)")
                .bind(private_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn query_by_field_equal(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<RecordId>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r"SELECT id
              FROM records
              WHERE lower(data->>$1) = lower($2)
              ORDER BY id ASC",
        )
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| RecordId::new(id)).collect())
    }

    async fn insert(
        &self,
        private_id: &PrivateId,
        columns: &ColumnSet,
    ) -> Result<RecordId, DbError> {
        let data = serde_json::Value::Object(columns.to_json_object());
        let mut tx = self.pool.begin().await?;

        let row: (i64,) = sqlx::query_as(
            r"INSERT INTO records (private_id, data)
              VALUES ($1, $2)
              RETURNING id",
        )
        .bind(private_id.as_str())
        .bind(&data)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from_write)?;

        tx.commit().await?;

        tracing::debug!(record_id = row.0, columns = columns.len(), "Inserted record");
        Ok(RecordId::new(row.0))
    }

    async fn update(&self, id: RecordId, columns: &ColumnSet) -> Result<PrivateId, DbError> {
        let data = serde_json::Value::Object(columns.to_json_object());
        let mut tx = self.pool.begin().await?;

        let row: Option<(String,)> = sqlx::query_as(
            r"UPDATE records
              SET data = data || $2, updated_at = now()
              WHERE id = $1
              RETURNING private_id",
        )
        .bind(id.into_inner())
        .bind(&data)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::from_write)?;

        // Dropping `tx` without commit rolls back.
        let Some((private_id,)) = row else {
            return Err(DbError::RecordNotFound(id));
        };
        tx.commit().await?;

        tracing::debug!(record_id = %id, columns = columns.len(), "Updated record");
        PrivateId::parse(&private_id).map_err(|e| DbError::Corrupt(format!("record {id}: {e}")))
    }

    async fn max_id(&self) -> Result<Option<RecordId>, DbError> {
        let row: (Option<i64>,) = sqlx::query_as(r"SELECT MAX(id) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(RecordId::new))
    }

    async fn list_window(
        &self,
        sort: &SortOrder,
        start: RecordId,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let rows = match (&sort.field, sort.direction) {
            (None, SortDirection::Ascending) => {
                sqlx::query_as::<_, RecordRow>(
                    r"SELECT id, private_id, data, created_at, updated_at
                      FROM records
                      WHERE id >= $1 AND EXISTS (SELECT 1 FROM records WHERE id = $1)
                      ORDER BY id ASC
                      LIMIT $2",
                )
                .bind(start.into_inner())
                .bind(limit_to_db(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (None, SortDirection::Descending) => {
                sqlx::query_as::<_, RecordRow>(
                    r"SELECT id, private_id, data, created_at, updated_at
                      FROM records
                      WHERE id <= $1 AND EXISTS (SELECT 1 FROM records WHERE id = $1)
                      ORDER BY id DESC
                      LIMIT $2",
                )
                .bind(start.into_inner())
                .bind(limit_to_db(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (Some(field), SortDirection::Ascending) => {
                sqlx::query_as::<_, RecordRow>(
                    r"WITH anchor AS (
                          SELECT COALESCE(data->>$1, '') AS v FROM records WHERE id = $2
                      )
                      SELECT r.id, r.private_id, r.data, r.created_at, r.updated_at
                      FROM records r, anchor a
                      WHERE (COALESCE(r.data->>$1, ''), r.id) >= (a.v, $2)
                      ORDER BY COALESCE(r.data->>$1, '') ASC, r.id ASC
                      LIMIT $3",
                )
                .bind(field)
                .bind(start.into_inner())
                .bind(limit_to_db(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (Some(field), SortDirection::Descending) => {
                sqlx::query_as::<_, RecordRow>(
                    r"WITH anchor AS (
                          SELECT COALESCE(data->>$1, '') AS v FROM records WHERE id = $2
                      )
                      SELECT r.id, r.private_id, r.data, r.created_at, r.updated_at
                      FROM records r, anchor a
                      WHERE (COALESCE(r.data->>$1, ''), r.id) <= (a.v, $2)
                      ORDER BY COALESCE(r.data->>$1, '') DESC, r.id DESC
                      LIMIT $3",
                )
                .bind(field)
                .bind(start.into_inner())
                .bind(limit_to_db(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Record::try_from).collect()
    }

    async fn count(&self) -> Result<u64, DbError> {
        let row: (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }
}

/// A row from the `records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    /// Numeric id.
    pub id: i64,
    /// Link token.
    pub private_id: String,
    /// Field values as a JSONB object.
    pub data: serde_json::Value,
    /// Insert timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last write timestamp.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let private_id = PrivateId::parse(&row.private_id)
            .map_err(|e| DbError::Corrupt(format!("record {}: {e}", row.id)))?;
        let values: BTreeMap<String, serde_json::Value> = match row.data {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            serde_json::Value::Null => BTreeMap::new(),
            other => {
                return Err(DbError::Corrupt(format!(
                    "record {}: data is not an object: {other}",
                    row.id
                )));
            }
        };
        Ok(Self {
            id: RecordId::new(row.id),
            private_id,
            values,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
