//! Private id generation.
//!
//! A private id is sampled from a fixed alphabet and checked against the
//! record store; collisions are resampled up to a configured attempt limit.
//! The store's unique constraint on `private_id` is the final arbiter, so
//! the executor also retries when an insert loses that race.

use rand::Rng;
use roster_db::RecordStore;
use roster_types::{PrivateId, PrivateIdError};

use crate::config::PrivateIdConfig;
use crate::error::SubmissionError;

/// Produces candidate private ids. Uniqueness is checked by the caller.
pub trait PrivateIdGenerator: Send + Sync {
    /// Sample one candidate token of `length` characters.
    fn generate(&self, length: usize) -> Result<PrivateId, PrivateIdError>;
}

/// Uniform sampling from an alphabet using the thread-local RNG.
#[derive(Debug, Clone)]
pub struct RandomPrivateIdGenerator {
    alphabet: Vec<char>,
}

impl RandomPrivateIdGenerator {
    /// Create a generator over the characters of `alphabet`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivateIdError`] if the alphabet is empty or contains a
    /// character a private id may not hold.
    pub fn new(alphabet: &str) -> Result<Self, PrivateIdError> {
        // Parsing the alphabet itself checks every character once.
        PrivateId::parse(alphabet)?;
        Ok(Self {
            alphabet: alphabet.chars().collect(),
        })
    }

    /// Create a generator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PrivateIdError`] if the configured alphabet is unusable.
    pub fn from_config(config: &PrivateIdConfig) -> Result<Self, PrivateIdError> {
        Self::new(&config.alphabet)
    }
}

impl PrivateIdGenerator for RandomPrivateIdGenerator {
    fn generate(&self, length: usize) -> Result<PrivateId, PrivateIdError> {
        let mut rng = rand::rng();
        let token: String = (0..length)
            .filter_map(|_| {
                let index = rng.random_range(0..self.alphabet.len());
                self.alphabet.get(index).copied()
            })
            .collect();
        PrivateId::parse(&token)
    }
}

/// Sample private ids until one is unused in `store`.
///
/// `spent` counts the attempts already used against
/// [`PrivateIdConfig::max_attempts`] and is advanced for every candidate
/// drawn here, so callers that retry share a single budget.
///
/// # Errors
///
/// Returns [`SubmissionError::PrivateIdExhausted`] once the budget is spent,
/// or [`SubmissionError::Database`] if the store check fails.
pub async fn generate_unique(
    store: &dyn RecordStore,
    generator: &dyn PrivateIdGenerator,
    config: &PrivateIdConfig,
    spent: &mut u32,
) -> Result<PrivateId, SubmissionError> {
    while *spent < config.max_attempts {
        *spent = spent.saturating_add(1);
        let candidate = generator.generate(config.length)?;
        if !store.private_id_exists(&candidate).await? {
            return Ok(candidate);
        }
        tracing::debug!(attempt = *spent, "Private id collision, resampling");
    }
    Err(SubmissionError::PrivateIdExhausted { attempts: *spent })
}
