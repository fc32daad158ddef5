//! Per-request state supplied by the session layer.

use std::collections::BTreeMap;

use roster_types::RawValue;
use uuid::Uuid;

/// State that belongs to one request rather than to the submission itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Correlates every log event of this request.
    pub request_id: Uuid,
    /// Values from earlier submissions in the same session, reused for
    /// persistent fields the current submission omits.
    pub prior_values: BTreeMap<String, RawValue>,
    /// The answer the session expects for the captcha field, if one was
    /// issued.
    pub captcha_answer: Option<String>,
}

impl RequestContext {
    /// A fresh context with a time-ordered request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            prior_values: BTreeMap::new(),
            captcha_answer: None,
        }
    }

    /// Remember a value from an earlier submission.
    #[must_use]
    pub fn with_prior_value(mut self, field: &str, value: impl Into<RawValue>) -> Self {
        self.prior_values.insert(field.to_owned(), value.into());
        self
    }

    /// Set the expected captcha answer.
    #[must_use]
    pub fn with_captcha_answer(mut self, answer: &str) -> Self {
        self.captcha_answer = Some(answer.to_owned());
        self
    }

    /// The remembered value for `field`.
    pub fn prior_value(&self, field: &str) -> Option<&RawValue> {
        self.prior_values.get(field)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
