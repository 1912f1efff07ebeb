use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{PriceHistoryEntry, StoredRecord, WriteOp};

/// What a committed batch actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Products that received a history entry. Appends dropped by the tail
    /// guard, or aimed at a product that no longer exists, are absent.
    pub appended: HashSet<String>,
}

/// The persistent catalog. One handle is built at process start and shared
/// by every component.
///
/// Partitions: product records, per-product price history (append-only,
/// insertion order is chronological) and derived data keyed by product id.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// One page of records ordered by id, strictly after `after`.
    async fn scan_records(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    async fn load_record(&self, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Most recent history entry, if any.
    async fn history_tail(&self, id: &str) -> Result<Option<PriceHistoryEntry>, StoreError>;

    async fn load_history(&self, id: &str) -> Result<Vec<PriceHistoryEntry>, StoreError>;

    async fn has_derived(&self, id: &str) -> Result<bool, StoreError>;

    /// Apply every operation or none of them.
    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<CommitReport, StoreError>;
}
