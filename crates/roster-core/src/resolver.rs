//! Record match resolution: Insert, Update, or Skip.
//!
//! An explicit record id hint wins outright. Otherwise the matching fields
//! are tried in priority order and the first field with a non-empty value
//! that hits a stored record decides; later fields are not consulted. A hit
//! is turned into a decision by the [`MatchPolicy`].
//!
//! Submitted values are compared in their stored form: a field registered
//! with a kind is normalized before the lookup, so a resubmission finds the
//! record its first submission created.

use std::sync::Arc;

use roster_db::RecordStore;
use roster_types::{
    AmbiguityMode, DuplicatePolicy, FormElementKind, MatchDecision, RecordId, SkipReason,
    Submission,
};

use crate::error::SubmissionError;
use crate::normalize::{comparable_text, normalize};
use crate::registry::FieldRegistry;

/// What to do with a submission whose matching field hit a stored record.
pub trait MatchPolicy: Send + Sync {
    /// Decide for a hit on `field` against record `existing`.
    fn on_match(&self, field: &str, existing: RecordId) -> MatchDecision;
}

impl MatchPolicy for DuplicatePolicy {
    fn on_match(&self, field: &str, existing: RecordId) -> MatchDecision {
        match self {
            Self::Update => MatchDecision::Update(existing),
            Self::Strict => MatchDecision::Skip(SkipReason::DuplicateRejected {
                field: field.to_owned(),
                existing,
            }),
            Self::Block => MatchDecision::Skip(SkipReason::DuplicateSuppressed {
                field: field.to_owned(),
                existing,
            }),
        }
    }
}

/// The text a matching field is compared with.
///
/// With a known `kind` this is the normalized value as the store renders
/// it; without one, the submitted text trimmed. Blank values and values
/// that do not normalize yield `None`.
pub fn matching_text(
    submission: &Submission,
    field: &str,
    kind: Option<FormElementKind>,
) -> Option<String> {
    let raw = submission.value(field).filter(|raw| !raw.is_blank())?;
    let text = match kind {
        Some(kind) => comparable_text(&normalize(kind, raw).ok()?),
        None => raw.to_text().trim().to_owned(),
    };
    (!text.is_empty()).then_some(text)
}

/// Classifies submissions against the record store.
#[derive(Clone)]
pub struct RecordMatchResolver {
    store: Arc<dyn RecordStore>,
    registry: Arc<dyn FieldRegistry>,
}

impl RecordMatchResolver {
    /// Create a resolver reading from `store`, normalizing matching values
    /// by the kinds in `registry`.
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<dyn FieldRegistry>) -> Self {
        Self { store, registry }
    }

    /// Decide how `submission` is written.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::NotFound`] for a hint naming no record,
    /// [`SubmissionError::DuplicateAmbiguous`] for several hits under
    /// [`AmbiguityMode::Reject`], and [`SubmissionError::Database`] if the
    /// store fails. A store failure never degrades to `Insert`.
    pub async fn resolve(
        &self,
        submission: &Submission,
        policy: &dyn MatchPolicy,
    ) -> Result<MatchDecision, SubmissionError> {
        if let Some(hint) = submission.record_id_hint {
            return match self.store.get_by_id(hint).await? {
                Some(_) => {
                    tracing::debug!(record_id = %hint, "Resolved by explicit id");
                    Ok(MatchDecision::Update(hint))
                }
                None => Err(SubmissionError::NotFound(hint)),
            };
        }

        let matching = &submission.matching;
        for field in &matching.fields {
            let kind = self.registry.field(field).map(|def| def.form_element);
            let Some(value) = matching_text(submission, field, kind) else {
                continue;
            };

            let candidates = self.store.query_by_field_equal(field, &value).await?;
            let Some(&lowest) = candidates.iter().min() else {
                continue;
            };

            if candidates.len() > 1 {
                match matching.ambiguity {
                    AmbiguityMode::LowestId => {
                        tracing::warn!(
                            field = %field,
                            candidates = ?candidates,
                            chosen = %lowest,
                            "Several records match; using the lowest id"
                        );
                    }
                    AmbiguityMode::Reject => {
                        let mut candidates = candidates;
                        candidates.sort_unstable();
                        return Err(SubmissionError::DuplicateAmbiguous {
                            field: field.clone(),
                            candidates,
                        });
                    }
                }
            }

            let decision = policy.on_match(field, lowest);
            tracing::debug!(field = %field, record_id = %lowest, ?decision, "Matched existing record");
            return Ok(decision);
        }

        Ok(MatchDecision::Insert)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use roster_db::MemoryRecordStore;
    use roster_types::{FieldDefinition, MatchingConfig, PrivateId};
    use serde_json::json;

    use super::*;
    use crate::registry::StaticFieldRegistry;

    fn seeded() -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .seed(
                RecordId::new(5),
                PrivateId::parse("AAAAAA5").unwrap(),
                &[("email", json!("a@x.com")), ("phone", json!("555"))],
            )
            .unwrap();
        store
            .seed(
                RecordId::new(9),
                PrivateId::parse("AAAAAA9").unwrap(),
                &[("email", json!("b@x.com")), ("phone", json!("555"))],
            )
            .unwrap();
        store
    }

    fn resolver(store: &Arc<MemoryRecordStore>) -> RecordMatchResolver {
        let registry = StaticFieldRegistry::new(vec![
            FieldDefinition::new("email", FormElementKind::TextLine),
            FieldDefinition::new("phone", FormElementKind::TextLine),
            FieldDefinition::new("age", FormElementKind::Numeric),
        ]);
        RecordMatchResolver::new(Arc::clone(store) as Arc<dyn RecordStore>, Arc::new(registry))
    }

    fn submission(policy: DuplicatePolicy, fields: &[&str]) -> Submission {
        Submission::new().with_matching(MatchingConfig::new(policy, fields))
    }

    #[tokio::test]
    async fn update_policy_resolves_to_existing_record() {
        let store = seeded();
        let sub = submission(DuplicatePolicy::Update, &["email"]).with_value("email", "a@x.com");
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(5)));
    }

    #[tokio::test]
    async fn matching_ignores_case_and_surrounding_space() {
        let store = seeded();
        let sub =
            submission(DuplicatePolicy::Update, &["email"]).with_value("email", "  A@X.COM ");
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(5)));
    }

    #[tokio::test]
    async fn strict_and_block_skip() {
        let store = seeded();
        let strict = submission(DuplicatePolicy::Strict, &["email"]).with_value("email", "a@x.com");
        let block = submission(DuplicatePolicy::Block, &["email"]).with_value("email", "a@x.com");

        let strict_decision = resolver(&store)
            .resolve(&strict, &strict.matching.policy)
            .await
            .unwrap();
        assert_eq!(
            strict_decision,
            MatchDecision::Skip(SkipReason::DuplicateRejected {
                field: "email".to_owned(),
                existing: RecordId::new(5),
            })
        );

        let block_decision = resolver(&store)
            .resolve(&block, &block.matching.policy)
            .await
            .unwrap();
        assert_eq!(
            block_decision,
            MatchDecision::Skip(SkipReason::DuplicateSuppressed {
                field: "email".to_owned(),
                existing: RecordId::new(5),
            })
        );
    }

    #[tokio::test]
    async fn empty_values_are_never_a_match_source() {
        let store = seeded();
        store
            .seed(
                RecordId::new(11),
                PrivateId::parse("AAAAA11").unwrap(),
                &[("email", json!(""))],
            )
            .unwrap();
        let sub = submission(DuplicatePolicy::Update, &["email"]).with_value("email", "   ");
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Insert);
    }

    #[tokio::test]
    async fn first_field_with_a_hit_wins() {
        let store = seeded();
        // No record has this email, so phone decides; phone is ambiguous.
        let sub = submission(DuplicatePolicy::Update, &["email", "phone"])
            .with_value("email", "nobody@x.com")
            .with_value("phone", "555");
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(5)));

        // A hit on the first field short-circuits, even if a later field
        // would pick another record.
        let sub = submission(DuplicatePolicy::Update, &["email", "phone"])
            .with_value("email", "b@x.com")
            .with_value("phone", "555");
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(9)));
    }

    #[tokio::test]
    async fn ambiguity_can_be_rejected() {
        let store = seeded();
        let sub = Submission::new()
            .with_value("phone", "555")
            .with_matching(
                MatchingConfig::new(DuplicatePolicy::Update, &["phone"])
                    .with_ambiguity(AmbiguityMode::Reject),
            );
        let err = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::DuplicateAmbiguous { ref field, ref candidates }
                if field == "phone" && candidates == &[RecordId::new(5), RecordId::new(9)]
        ));
    }

    #[tokio::test]
    async fn hint_bypasses_matching() {
        let store = seeded();
        let sub = submission(DuplicatePolicy::Strict, &["email"])
            .with_value("email", "a@x.com")
            .with_hint(RecordId::new(9));
        let decision = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(9)));

        let missing = Submission::new().with_hint(RecordId::new(404));
        let err = resolver(&store)
            .resolve(&missing, &missing.matching.policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NotFound(id) if id == RecordId::new(404)));
    }

    #[tokio::test]
    async fn values_are_matched_in_stored_form() {
        let store = seeded();
        store
            .seed(
                RecordId::new(12),
                PrivateId::parse("AAAAA12").unwrap(),
                &[("email", json!("ada lovelace")), ("age", json!(41))],
            )
            .unwrap();

        let spaced = submission(DuplicatePolicy::Update, &["email"])
            .with_value("email", "<b>Ada</b>   Lovelace");
        let decision = resolver(&store)
            .resolve(&spaced, &spaced.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(12)));

        let padded = submission(DuplicatePolicy::Update, &["age"]).with_value("age", "041");
        let decision = resolver(&store)
            .resolve(&padded, &padded.matching.policy)
            .await
            .unwrap();
        assert_eq!(decision, MatchDecision::Update(RecordId::new(12)));
    }

    #[test]
    fn unnormalizable_values_are_not_a_match_source() {
        let sub = Submission::new().with_value("age", "forty");
        assert_eq!(matching_text(&sub, "age", Some(FormElementKind::Numeric)), None);
        assert_eq!(
            matching_text(&sub, "age", None).as_deref(),
            Some("forty")
        );
    }

    #[tokio::test]
    async fn store_outage_is_fatal_not_insert() {
        let store = seeded();
        store.set_unavailable(true);
        let sub = submission(DuplicatePolicy::Update, &["email"]).with_value("email", "new@x.com");
        let err = resolver(&store)
            .resolve(&sub, &sub.matching.policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Database(_)));
    }
}
