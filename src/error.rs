use thiserror::Error;

use crate::refresh::engine::RefreshSummary;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailureReason {
    #[error("rate limited on all {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("page extraction failed: {0}")]
    Extraction(String),
}

/// A single product could not be fetched. Never fatal to a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fetch of product {product_id} failed: {reason}")]
pub struct FetchFailure {
    pub product_id: String,
    pub reason: FetchFailureReason,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// An atomic batch was rejected; none of its operations applied.
/// `tags` identify the staged groups that did not land.
#[derive(Debug, Error)]
#[error("batch commit of {ops} operations failed: {source}")]
pub struct BatchCommitFailure<T: std::fmt::Debug> {
    pub ops: usize,
    pub tags: Vec<T>,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The cutoff `now - threshold` is not a representable instant.
    #[error("staleness threshold {0} is out of range")]
    InvalidThreshold(chrono::Duration),
    #[error("staleness scan failed: {0}")]
    Scan(#[source] StoreError),
    /// Earlier batches of the cycle stay committed; `summary` reflects them.
    #[error("refresh cycle stopped after a batch commit failure: {source}")]
    BatchCommit {
        summary: RefreshSummary,
        #[source]
        source: StoreError,
    },
}

impl RefreshError {
    /// Progress made before the cycle stopped, when any was made.
    pub fn partial_summary(&self) -> Option<&RefreshSummary> {
        match self {
            RefreshError::InvalidThreshold(_) | RefreshError::Scan(_) => None,
            RefreshError::BatchCommit { summary, .. } => Some(summary),
        }
    }
}
