//! The persistence executor: one atomic write per submission.
//!
//! After the store commits, the written record is marked stale in the
//! [`RecordCache`] before the result is handed back. A committed write whose
//! invalidation failed is reported as [`SubmissionError::StaleCache`], never
//! as success.

use std::sync::Arc;

use roster_db::RecordStore;
use roster_types::{ColumnSet, MatchDecision, RecordId, SubmissionOutcome, WriteAction};

use crate::cache::RecordCache;
use crate::config::PrivateIdConfig;
use crate::error::SubmissionError;
use crate::private_id::{PrivateIdGenerator, generate_unique};

/// Commits match decisions to the record store.
pub struct PersistenceExecutor {
    store: Arc<dyn RecordStore>,
    cache: Arc<RecordCache>,
    ids: Arc<dyn PrivateIdGenerator>,
    config: PrivateIdConfig,
}

impl PersistenceExecutor {
    /// Create an executor writing to `store` and invalidating `cache`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<RecordCache>,
        ids: Arc<dyn PrivateIdGenerator>,
        config: PrivateIdConfig,
    ) -> Self {
        Self {
            store,
            cache,
            ids,
            config,
        }
    }

    /// Commit `columns` as `decision` says.
    ///
    /// A [`MatchDecision::Skip`] writes nothing and is returned as
    /// [`SubmissionOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Database`] if the write fails (nothing is
    /// applied), [`SubmissionError::PrivateIdExhausted`] if no private id
    /// could be assigned, or [`SubmissionError::StaleCache`] if the write
    /// committed but the cache could not be invalidated.
    pub async fn commit(
        &self,
        decision: &MatchDecision,
        columns: &ColumnSet,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let outcome = match decision {
            MatchDecision::Skip(reason) => {
                return Ok(SubmissionOutcome::Skipped {
                    reason: reason.clone(),
                });
            }
            MatchDecision::Insert => self.insert(columns).await?,
            MatchDecision::Update(id) => {
                let private_id = self.store.update(*id, columns).await?;
                tracing::info!(record_id = %id, columns = columns.len(), "Record updated");
                SubmissionOutcome::Success {
                    record_id: *id,
                    private_id,
                    action: WriteAction::Updated,
                }
            }
        };

        if let SubmissionOutcome::Success { record_id, .. } = &outcome {
            self.invalidate(*record_id).await?;
        }
        Ok(outcome)
    }

    async fn insert(&self, columns: &ColumnSet) -> Result<SubmissionOutcome, SubmissionError> {
        // The existence check can race with another insert; the store's
        // constraint on private ids catches what it misses. Both kinds of
        // collision draw from one attempt budget.
        let mut spent = 0;
        loop {
            let private_id = generate_unique(
                self.store.as_ref(),
                self.ids.as_ref(),
                &self.config,
                &mut spent,
            )
            .await?;
            match self.store.insert(&private_id, columns).await {
                Ok(record_id) => {
                    tracing::info!(
                        record_id = %record_id,
                        columns = columns.len(),
                        "Record inserted"
                    );
                    return Ok(SubmissionOutcome::Success {
                        record_id,
                        private_id,
                        action: WriteAction::Inserted,
                    });
                }
                Err(e) if e.is_private_id_conflict() => {
                    tracing::debug!(attempt = spent, "Private id taken at insert, resampling");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn invalidate(&self, record_id: RecordId) -> Result<(), SubmissionError> {
        self.cache.mark_stale(record_id).await.map_err(|source| {
            tracing::error!(
                record_id = %record_id,
                error = %source,
                "Write committed but cache invalidation failed"
            );
            SubmissionError::StaleCache { record_id, source }
        })
    }
}
