use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::database_ops::store::{CatalogStore, CommitReport};
use crate::error::StoreError;
use crate::model::{PriceHistoryEntry, StoredRecord, WriteOp};
use crate::normalization::timestamp::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Default)]
struct Partitions {
    records: BTreeMap<String, StoredRecord>,
    history: HashMap<String, Vec<PriceHistoryEntry>>,
    derived: HashMap<String, Value>,
}

#[derive(Default)]
struct Inner {
    data: Partitions,
    commit_attempts: usize,
    failing_commits: HashSet<usize>,
    committed_batches: Vec<usize>,
    unreadable_history: HashSet<String>,
}

/// In-process catalog with the same atomic-batch semantics as the
/// Postgres store: a batch is applied to a copy that replaces the live
/// partitions only once every operation succeeded.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_record(&self, record: StoredRecord) {
        self.guard().data.records.insert(record.id.clone(), record);
    }

    pub fn insert_history(&self, id: &str, entries: Vec<PriceHistoryEntry>) {
        self.guard()
            .data
            .history
            .entry(id.to_string())
            .or_default()
            .extend(entries);
    }

    pub fn insert_derived(&self, id: &str, value: Value) {
        self.guard().data.derived.insert(id.to_string(), value);
    }

    /// Make the `n`-th commit attempt (1-based) fail without applying anything.
    pub fn fail_commit_number(&self, n: usize) {
        self.guard().failing_commits.insert(n);
    }

    /// Make history reads for `id` fail.
    pub fn fail_history_reads(&self, id: &str) {
        self.guard().unreadable_history.insert(id.to_string());
    }

    /// Operation counts of every batch that committed, in order.
    pub fn committed_batch_sizes(&self) -> Vec<usize> {
        self.guard().committed_batches.clone()
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.guard().data.records.keys().cloned().collect()
    }
}

/// Returns `true` when the op appended a history entry.
fn apply(data: &mut Partitions, op: &WriteOp) -> bool {
    match op {
        WriteOp::UpdateRecord(update) => {
            if let Some(rec) = data.records.get_mut(&update.id) {
                let newer = match rec.last_refreshed.as_deref().and_then(parse_timestamp) {
                    Some(existing) => existing <= update.last_refreshed,
                    None => true,
                };
                // An older snapshot landing late must not undo a newer one.
                if newer {
                    rec.stock = update.stock;
                    rec.quantity = update.quantity.clone();
                    rec.last_refreshed = Some(format_timestamp(&update.last_refreshed));
                }
            }
        }
        WriteOp::AppendHistory { id, entry } => {
            if !data.records.contains_key(id) {
                return false;
            }
            let history = data.history.entry(id.clone()).or_default();
            let duplicate = history
                .last()
                .map(|tail| tail.prices() == entry.prices())
                .unwrap_or(false);
            if !duplicate {
                history.push(entry.clone());
                return true;
            }
        }
        WriteOp::SetStock { id, stock } => {
            if let Some(rec) = data.records.get_mut(id) {
                rec.stock = *stock;
            }
        }
        WriteOp::SetEmbeddingStatus {
            id,
            status,
            overwrite,
        } => {
            if let Some(rec) = data.records.get_mut(id) {
                if *overwrite || rec.embedding_status.is_none() {
                    rec.embedding_status = Some(*status);
                }
            }
        }
        WriteOp::DeleteProduct { id } => {
            data.records.remove(id);
            data.history.remove(id);
            data.derived.remove(id);
        }
    }
    false
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn scan_records(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.guard();
        let lower = match after {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        Ok(inner
            .data
            .records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, rec)| rec.clone())
            .collect())
    }

    async fn load_record(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.guard().data.records.get(id).cloned())
    }

    async fn history_tail(&self, id: &str) -> Result<Option<PriceHistoryEntry>, StoreError> {
        let inner = self.guard();
        if inner.unreadable_history.contains(id) {
            return Err(StoreError::Unavailable(format!("history of {id} unreadable")));
        }
        Ok(inner.data.history.get(id).and_then(|h| h.last().cloned()))
    }

    async fn load_history(&self, id: &str) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        Ok(self.guard().data.history.get(id).cloned().unwrap_or_default())
    }

    async fn has_derived(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.guard().data.derived.contains_key(id))
    }

    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<CommitReport, StoreError> {
        let mut inner = self.guard();
        inner.commit_attempts += 1;
        let attempt = inner.commit_attempts;
        if inner.failing_commits.contains(&attempt) {
            return Err(StoreError::Unavailable(format!(
                "commit #{attempt} rejected"
            )));
        }
        let mut staged = inner.data.clone();
        let mut report = CommitReport::default();
        for op in ops {
            if apply(&mut staged, op) {
                report.appended.insert(op.product_id().to_string());
            }
        }
        inner.data = staged;
        let size = ops.iter().map(WriteOp::cost).sum();
        inner.committed_batches.push(size);
        Ok(report)
    }
}
