//! The submission pipeline: resolve, validate, write, invalidate.
//!
//! ```text
//! Submission ──► RecordMatchResolver ──► MatchDecision
//!                                           │
//!                      Skip ◄───────────────┤
//!                                           ▼
//!                                   ValidationEngine ──► ValidationErrors
//!                                           │
//!                                           ▼ ColumnSet
//!                                   PersistenceExecutor ──► RecordStore
//!                                           │
//!                                           ▼
//!                                   RecordCache::mark_stale
//! ```
//!
//! One submission runs strictly sequentially; many may run concurrently
//! against the same store and cache.

use std::sync::Arc;

use roster_db::{DbError, RecordStore};
use roster_types::{
    FieldDefinition, MatchDecision, SkipReason, Submission, SubmissionOutcome,
};
use tracing::Instrument;

use crate::cache::RecordCache;
use crate::config::PrivateIdConfig;
use crate::context::RequestContext;
use crate::error::SubmissionError;
use crate::executor::PersistenceExecutor;
use crate::private_id::{PrivateIdGenerator, RandomPrivateIdGenerator};
use crate::registry::FieldRegistry;
use crate::resolver::RecordMatchResolver;
use crate::validation::{ValidationEngine, ValidatorRegistry};

/// Processes submissions end to end.
pub struct SubmissionPipeline {
    registry: Arc<dyn FieldRegistry>,
    store: Arc<dyn RecordStore>,
    cache: Arc<RecordCache>,
    resolver: RecordMatchResolver,
    engine: ValidationEngine,
    executor: PersistenceExecutor,
    ids: Arc<dyn PrivateIdGenerator>,
    private_ids: PrivateIdConfig,
}

impl SubmissionPipeline {
    /// Assemble a pipeline over shared store and cache handles.
    ///
    /// Private ids are drawn from [`RandomPrivateIdGenerator`] with the
    /// given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::InvalidPrivateId`] if the configured
    /// alphabet is unusable.
    pub fn new(
        registry: Arc<dyn FieldRegistry>,
        store: Arc<dyn RecordStore>,
        cache: Arc<RecordCache>,
        private_ids: PrivateIdConfig,
    ) -> Result<Self, SubmissionError> {
        let ids: Arc<dyn PrivateIdGenerator> =
            Arc::new(RandomPrivateIdGenerator::from_config(&private_ids)?);
        let executor = PersistenceExecutor::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&ids),
            private_ids.clone(),
        );
        Ok(Self {
            resolver: RecordMatchResolver::new(Arc::clone(&store), Arc::clone(&registry)),
            engine: ValidationEngine::new(Arc::clone(&store)).with_patterns(registry.fields()),
            registry,
            store,
            cache,
            executor,
            ids,
            private_ids,
        })
    }

    /// Use `validators` for [`Custom`](roster_types::ValidationRule::Custom)
    /// rules.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.engine = self.engine.with_validators(validators);
        self
    }

    /// Draw private ids from `ids` instead of the random generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn PrivateIdGenerator>) -> Self {
        self.ids = ids;
        self.rebuild_executor();
        self
    }

    fn rebuild_executor(&mut self) {
        self.executor = PersistenceExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.ids),
            self.private_ids.clone(),
        );
    }

    /// Check that every field rule can be evaluated.
    ///
    /// Call once at startup, after registering validators.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Config`] naming the first unusable rule.
    pub fn check_configuration(&self) -> Result<(), SubmissionError> {
        self.engine.check_fields(self.registry.fields())
    }

    /// The record cache this pipeline invalidates.
    pub const fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    /// Process one submission.
    ///
    /// Returns the write outcome, or a [`SubmissionOutcome::Skipped`] when
    /// the match policy or an unchanged update leaves nothing to write.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Validation`] with every field failure,
    /// [`SubmissionError::Database`] if the store fails, and the other
    /// [`SubmissionError`] variants as documented there. Nothing is written
    /// unless the result is `Ok`, except for
    /// [`SubmissionError::StaleCache`].
    pub async fn process_submission(
        &self,
        submission: &Submission,
        ctx: &RequestContext,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let span = tracing::info_span!("submission", request_id = %ctx.request_id);
        self.process(submission, ctx).instrument(span).await
    }

    async fn process(
        &self,
        submission: &Submission,
        ctx: &RequestContext,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let fields = self.registry.fields();
        let policy = &submission.matching.policy;

        let decision = self.resolver.resolve(submission, policy).await?;
        tracing::debug!(?decision, "Resolved submission");

        match self.write(fields, submission, &decision, ctx).await {
            Err(SubmissionError::Database(err)) if is_lost_insert_race(&decision, &err) => {
                let field = err.violated_field().unwrap_or_default().to_owned();
                tracing::warn!(field = %field, "Insert lost a uniqueness race, resolving again");
                self.retry_after_race(fields, submission, ctx, field, err)
                    .await
            }
            result => result,
        }
    }

    /// Second and last resolution after a concurrent insert took the
    /// matching value first.
    async fn retry_after_race(
        &self,
        fields: &[FieldDefinition],
        submission: &Submission,
        ctx: &RequestContext,
        field: String,
        err: DbError,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        match self
            .resolver
            .resolve(submission, &submission.matching.policy)
            .await?
        {
            decision @ MatchDecision::Update(_) => {
                self.write(fields, submission, &decision, ctx).await
            }
            MatchDecision::Skip(_) => {
                let reason = SkipReason::ConcurrentDuplicate { field };
                tracing::info!(?reason, "Submission skipped");
                Ok(SubmissionOutcome::Skipped { reason })
            }
            // The constraint is not on a matching field; nothing to fold
            // the submission into.
            MatchDecision::Insert => Err(SubmissionError::Database(err)),
        }
    }

    async fn write(
        &self,
        fields: &[FieldDefinition],
        submission: &Submission,
        decision: &MatchDecision,
        ctx: &RequestContext,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        if let MatchDecision::Skip(reason) = decision {
            tracing::info!(?reason, "Submission skipped");
            return Ok(SubmissionOutcome::Skipped {
                reason: reason.clone(),
            });
        }

        let columns = self.engine.assemble(fields, submission, decision, ctx).await?;

        if let (MatchDecision::Update(record_id), true) = (decision, columns.is_empty()) {
            let reason = SkipReason::NoChanges {
                record_id: *record_id,
            };
            tracing::info!(?reason, "Submission skipped");
            return Ok(SubmissionOutcome::Skipped { reason });
        }

        self.executor.commit(decision, &columns).await
    }
}

fn is_lost_insert_race(decision: &MatchDecision, err: &DbError) -> bool {
    matches!(decision, MatchDecision::Insert) && err.violated_field().is_some()
}
