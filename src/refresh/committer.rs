use std::collections::HashSet;
use std::fmt::Debug;
use std::mem;
use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::database_ops::store::CatalogStore;
use crate::error::BatchCommitFailure;
use crate::model::{WriteOp, PARTITION_COUNT};

/// Hard per-batch operation ceiling of the store.
pub const STORE_BATCH_CEILING: usize = 500;

/// A batch that landed, with the tags of the groups it carried.
#[derive(Debug)]
pub struct BatchReceipt<T> {
    pub ops: usize,
    pub tags: Vec<T>,
    /// Products whose history append the store actually applied.
    pub appended: HashSet<String>,
}

/// Accumulates write groups and commits them atomically in batches whose
/// operation cost never exceeds `limit`. A group (all ops staged with one
/// tag) is never split across batches.
pub struct BatchCommitter<T> {
    store: Arc<dyn CatalogStore>,
    limit: usize,
    pending: Vec<WriteOp>,
    pending_cost: usize,
    tags: Vec<T>,
    committed_batches: usize,
}

impl<T: Debug + Send> BatchCommitter<T> {
    pub fn new(store: Arc<dyn CatalogStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.clamp(PARTITION_COUNT, STORE_BATCH_CEILING),
            pending: Vec::new(),
            pending_cost: 0,
            tags: Vec::new(),
            committed_batches: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn pending_ops(&self) -> usize {
        self.pending_cost
    }

    /// Stage a group. When it would not fit, the pending batch is
    /// committed first and its receipt returned. If that commit fails the
    /// incoming group is dropped too and its tag is reported with the rest.
    pub async fn stage(
        &mut self,
        ops: Vec<WriteOp>,
        tag: T,
    ) -> Result<Option<BatchReceipt<T>>, BatchCommitFailure<T>> {
        let cost: usize = ops.iter().map(WriteOp::cost).sum();
        let receipt = if !self.pending.is_empty() && self.pending_cost + cost > self.limit {
            match self.flush().await {
                Ok(receipt) => receipt,
                Err(mut failure) => {
                    failure.tags.push(tag);
                    return Err(failure);
                }
            }
        } else {
            None
        };
        self.pending.extend(ops);
        self.pending_cost += cost;
        self.tags.push(tag);
        Ok(receipt)
    }

    pub async fn push(
        &mut self,
        op: WriteOp,
        tag: T,
    ) -> Result<Option<BatchReceipt<T>>, BatchCommitFailure<T>> {
        self.stage(vec![op], tag).await
    }

    /// Commit whatever is pending. On failure nothing from the batch
    /// applied and its tags come back in the error.
    #[instrument(skip(self), fields(ops = self.pending_cost, batch = self.committed_batches + 1))]
    pub async fn flush(&mut self) -> Result<Option<BatchReceipt<T>>, BatchCommitFailure<T>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let ops = mem::take(&mut self.pending);
        let cost = mem::take(&mut self.pending_cost);
        let tags = mem::take(&mut self.tags);

        match self.store.commit_batch(&ops).await {
            Ok(report) => {
                self.committed_batches += 1;
                info!(
                    ops = cost,
                    groups = tags.len(),
                    appended = report.appended.len(),
                    "batch committed"
                );
                Ok(Some(BatchReceipt {
                    ops: cost,
                    tags,
                    appended: report.appended,
                }))
            }
            Err(source) => {
                error!(ops = cost, groups = tags.len(), error = %source, "batch commit failed");
                Err(BatchCommitFailure {
                    ops: cost,
                    tags,
                    source,
                })
            }
        }
    }

    pub async fn finish(mut self) -> Result<Option<BatchReceipt<T>>, BatchCommitFailure<T>> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::model::{StockFlag, StoredRecord};

    fn set_stock(i: usize) -> WriteOp {
        WriteOp::SetStock {
            id: format!("p{i:05}"),
            stock: StockFlag::OutOfStock,
        }
    }

    #[tokio::test]
    async fn twelve_hundred_ops_commit_in_three_batches() {
        let store = Arc::new(MemoryStore::new());
        let mut committer = BatchCommitter::new(store.clone(), 450);
        let mut landed = 0;
        for i in 0..1200 {
            if let Some(r) = committer.push(set_stock(i), i).await.unwrap() {
                landed += r.tags.len();
            }
        }
        if let Some(r) = committer.finish().await.unwrap() {
            landed += r.tags.len();
        }
        assert_eq!(landed, 1200);
        assert_eq!(store.committed_batch_sizes(), vec![450, 450, 300]);
    }

    #[tokio::test]
    async fn groups_are_never_split() {
        let store = Arc::new(MemoryStore::new());
        let mut committer = BatchCommitter::new(store.clone(), 4);
        for i in 0..3 {
            committer
                .stage(vec![set_stock(i), set_stock(i)], i)
                .await
                .unwrap();
        }
        committer.finish().await.unwrap();
        assert_eq!(store.committed_batch_sizes(), vec![4, 2]);
    }

    #[tokio::test]
    async fn limit_is_clamped_to_store_ceiling() {
        let store = Arc::new(MemoryStore::new());
        let committer: BatchCommitter<()> = BatchCommitter::new(store, 10_000);
        assert_eq!(committer.limit(), STORE_BATCH_CEILING);
    }

    #[tokio::test]
    async fn failed_batch_returns_its_tags_and_applies_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(StoredRecord::new("p00000"));
        store.fail_commit_number(1);
        let mut committer = BatchCommitter::new(store.clone(), 450);
        committer.push(set_stock(0), "first").await.unwrap();

        let err = committer.finish().await.unwrap_err();
        assert_eq!(err.tags, vec!["first"]);
        assert_eq!(err.ops, 1);
        let rec = store.load_record("p00000").await.unwrap().unwrap();
        assert_eq!(rec.stock, StockFlag::InStock);
        assert!(store.committed_batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_during_stage_reports_incoming_group() {
        let store = Arc::new(MemoryStore::new());
        store.fail_commit_number(1);
        let mut committer = BatchCommitter::new(store.clone(), 3);
        committer.stage(vec![set_stock(0), set_stock(0)], 0).await.unwrap();

        let err = committer
            .stage(vec![set_stock(1), set_stock(1)], 1)
            .await
            .unwrap_err();
        assert_eq!(err.tags, vec![0, 1]);
        assert_eq!(committer.pending_ops(), 0);
    }
}
