//! The NDJSON intake loop.
//!
//! Each input line is one submission:
//!
//! ```json
//! {"values": {"email": "a@x.com", "tags": ["a", "b"]},
//!  "matching": {"policy": "update", "fields": ["email"]},
//!  "record_id_hint": null, "expected_fields": null,
//!  "prior_values": {}, "captcha_answer": null}
//! ```
//!
//! Only `values` is needed; `matching` falls back to the configured
//! default. Each line produces exactly one report line on the output.

use std::collections::BTreeMap;

use roster_core::{RequestContext, SubmissionError, SubmissionPipeline};
use roster_types::{
    MatchingConfig, PrivateId, RawValue, RecordId, SkipReason, Submission, SubmissionOutcome,
    ValidationErrors, WriteAction,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::IntakeError;

/// One submission as read from the input stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntakeLine {
    /// Submitted values keyed by field name.
    #[serde(default)]
    pub values: BTreeMap<String, RawValue>,
    /// Record to update, bypassing matching.
    #[serde(default)]
    pub record_id_hint: Option<RecordId>,
    /// Restricts the active field set.
    #[serde(default)]
    pub expected_fields: Option<Vec<String>>,
    /// Matching configuration; the configured default when absent.
    #[serde(default)]
    pub matching: Option<MatchingConfig>,
    /// Values from earlier submissions in the same session.
    #[serde(default)]
    pub prior_values: BTreeMap<String, RawValue>,
    /// Expected captcha answer, if a challenge was issued.
    #[serde(default)]
    pub captcha_answer: Option<String>,
}

impl IntakeLine {
    /// Split into the submission and its request context.
    pub fn into_parts(self, default_matching: &MatchingConfig) -> (Submission, RequestContext) {
        let submission = Submission {
            values: self.values,
            record_id_hint: self.record_id_hint,
            expected_fields: self.expected_fields,
            matching: self.matching.unwrap_or_else(|| default_matching.clone()),
        };
        let ctx = RequestContext {
            prior_values: self.prior_values,
            captcha_answer: self.captcha_answer,
            ..RequestContext::new()
        };
        (submission, ctx)
    }
}

/// One report line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntakeReport {
    /// The record was written.
    Written {
        /// Input line number, from 1.
        line: u64,
        /// Request id the submission was logged under.
        request_id: Uuid,
        /// Numeric id of the written record.
        record_id: RecordId,
        /// Private id of the written record.
        private_id: PrivateId,
        /// Insert or update.
        action: WriteAction,
    },
    /// Nothing was written.
    Skipped {
        /// Input line number, from 1.
        line: u64,
        /// Request id the submission was logged under.
        request_id: Uuid,
        /// Why nothing was written.
        reason: SkipReason,
    },
    /// One or more fields failed validation.
    Invalid {
        /// Input line number, from 1.
        line: u64,
        /// Request id the submission was logged under.
        request_id: Uuid,
        /// Every field failure.
        errors: ValidationErrors,
    },
    /// Processing failed.
    Failed {
        /// Input line number, from 1.
        line: u64,
        /// Request id the submission was logged under.
        request_id: Uuid,
        /// The error, rendered.
        error: String,
    },
    /// The line is not a valid submission document.
    Malformed {
        /// Input line number, from 1.
        line: u64,
        /// The parse error, rendered.
        error: String,
    },
}

impl IntakeReport {
    /// Report the pipeline result for one line.
    pub fn from_result(
        line: u64,
        request_id: Uuid,
        result: Result<SubmissionOutcome, SubmissionError>,
    ) -> Self {
        match result {
            Ok(SubmissionOutcome::Success {
                record_id,
                private_id,
                action,
            }) => Self::Written {
                line,
                request_id,
                record_id,
                private_id,
                action,
            },
            Ok(SubmissionOutcome::Skipped { reason }) => Self::Skipped {
                line,
                request_id,
                reason,
            },
            Err(SubmissionError::Validation(errors)) => Self::Invalid {
                line,
                request_id,
                errors,
            },
            Err(e) => Self::Failed {
                line,
                request_id,
                error: e.to_string(),
            },
        }
    }
}

/// Counts of report statuses for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeSummary {
    /// Records inserted or updated.
    pub written: u64,
    /// Submissions skipped.
    pub skipped: u64,
    /// Submissions rejected by validation.
    pub invalid: u64,
    /// Submissions that failed, including malformed lines.
    pub failed: u64,
}

impl IntakeSummary {
    fn record(&mut self, report: &IntakeReport) {
        let counter = match report {
            IntakeReport::Written { .. } => &mut self.written,
            IntakeReport::Skipped { .. } => &mut self.skipped,
            IntakeReport::Invalid { .. } => &mut self.invalid,
            IntakeReport::Failed { .. } | IntakeReport::Malformed { .. } => &mut self.failed,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Process every line of `input`, writing one report line per submission
/// to `output`. Blank lines are ignored.
///
/// # Errors
///
/// Returns [`IntakeError::Io`] if reading or writing fails. Failures of
/// individual submissions are reported, not returned.
pub async fn run<R, W>(
    pipeline: &SubmissionPipeline,
    default_matching: &MatchingConfig,
    input: R,
    mut output: W,
) -> Result<IntakeSummary, IntakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut summary = IntakeSummary::default();
    let mut line_no: u64 = 0;

    while let Some(text) = lines.next_line().await? {
        line_no = line_no.saturating_add(1);
        if text.trim().is_empty() {
            continue;
        }

        let report = match serde_json::from_str::<IntakeLine>(&text) {
            Ok(parsed) => {
                let (submission, ctx) = parsed.into_parts(default_matching);
                let result = pipeline.process_submission(&submission, &ctx).await;
                if let Err(e) = &result {
                    tracing::warn!(line = line_no, request_id = %ctx.request_id, error = %e, "Submission failed");
                }
                IntakeReport::from_result(line_no, ctx.request_id, result)
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Malformed submission line");
                IntakeReport::Malformed {
                    line: line_no,
                    error: e.to_string(),
                }
            }
        };

        summary.record(&report);
        let mut json = serde_json::to_vec(&report)?;
        json.push(b'\n');
        output.write_all(&json).await?;
    }

    output.flush().await?;
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use roster_core::{CacheConfig, PrivateIdConfig, RecordCache, StaticFieldRegistry};
    use roster_db::{CacheBackend, MemoryCacheBackend, MemoryRecordStore, RecordStore};
    use roster_types::{DuplicatePolicy, FieldDefinition, FormElementKind, ValidationRule};
    use serde_json::Value;

    use super::*;

    fn pipeline(store: &Arc<MemoryRecordStore>) -> SubmissionPipeline {
        let store = Arc::clone(store) as Arc<dyn RecordStore>;
        let cache = Arc::new(RecordCache::new(
            Arc::clone(&store),
            Arc::new(MemoryCacheBackend::new()) as Arc<dyn CacheBackend>,
            CacheConfig::default(),
        ));
        let fields = vec![
            FieldDefinition::new("email", FormElementKind::TextLine)
                .with_validation(ValidationRule::Email),
            FieldDefinition::new("city", FormElementKind::TextLine),
        ];
        SubmissionPipeline::new(
            Arc::new(StaticFieldRegistry::new(fields)),
            store,
            cache,
            PrivateIdConfig::default(),
        )
        .unwrap()
    }

    fn reports(output: &[u8]) -> Vec<Value> {
        output
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[test]
    fn missing_matching_uses_default() {
        let line: IntakeLine = serde_json::from_str(r#"{"values": {"email": "a@x.com"}}"#).unwrap();
        let default = MatchingConfig::new(DuplicatePolicy::Update, &["email"]);
        let (submission, ctx) = line.into_parts(&default);
        assert_eq!(submission.matching, default);
        assert_eq!(submission.value("email"), Some(&RawValue::from("a@x.com")));
        assert!(ctx.captcha_answer.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<IntakeLine>(r#"{"valuez": {}}"#).is_err());
    }

    #[tokio::test]
    async fn every_line_gets_one_report() {
        let store = Arc::new(MemoryRecordStore::new());
        let pipeline = pipeline(&store);
        let default = MatchingConfig::new(DuplicatePolicy::Update, &["email"]);
        let input = concat!(
            r#"{"values": {"email": "a@x.com", "city": "Oslo"}}"#,
            "\n",
            "\n",
            r#"{"values": {"email": "A@x.com", "city": "Bergen"}}"#,
            "\n",
            r#"{"values": {"city": "Nowhere"}}"#,
            "\n",
            "not json\n",
        );
        let mut output = Vec::new();

        let summary = run(&pipeline, &default, input.as_bytes(), &mut output)
            .await
            .unwrap();

        let reports = reports(&output);
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0]["status"], "written");
        assert_eq!(reports[0]["action"], "inserted");
        assert_eq!(reports[1]["status"], "written");
        assert_eq!(reports[1]["action"], "updated");
        assert_eq!(reports[1]["line"], 3);
        assert_eq!(reports[2]["status"], "invalid");
        assert_eq!(reports[2]["errors"][0]["field"], "email");
        assert_eq!(reports[3]["status"], "malformed");
        assert_eq!(
            summary,
            IntakeSummary {
                written: 2,
                skipped: 0,
                invalid: 1,
                failed: 1,
            }
        );
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
