use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::database_ops::store::CatalogStore;
use crate::error::StoreError;
use crate::model::{EmbeddingStatus, WriteOp};
use crate::refresh::committer::{BatchCommitter, BatchReceipt};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingSyncReport {
    pub done: usize,
    pub ready: usize,
    pub skipped: usize,
}

impl EmbeddingSyncReport {
    fn record(&mut self, receipt: BatchReceipt<EmbeddingStatus>) {
        for status in receipt.tags {
            match status {
                EmbeddingStatus::Done => self.done += 1,
                EmbeddingStatus::Ready => self.ready += 1,
            }
        }
    }
}

/// Align each record's embedding status with the derived-data partition:
/// `done` whenever a vector exists, otherwise `ready` unless a status is
/// already set. Unknown ids are skipped.
#[instrument(skip(store, ids), fields(ids = ids.len()))]
pub async fn sync_embedding_status(
    store: Arc<dyn CatalogStore>,
    ids: &[String],
    batch_limit: usize,
) -> Result<EmbeddingSyncReport, StoreError> {
    let mut report = EmbeddingSyncReport::default();
    let mut committer: BatchCommitter<EmbeddingStatus> =
        BatchCommitter::new(store.clone(), batch_limit);

    for id in ids {
        let Some(record) = store.load_record(id).await? else {
            debug!(product_id = %id, "no such record; skipping");
            report.skipped += 1;
            continue;
        };
        let (status, overwrite) = if store.has_derived(id).await? {
            (EmbeddingStatus::Done, true)
        } else if record.embedding_status.is_none() {
            (EmbeddingStatus::Ready, false)
        } else {
            report.skipped += 1;
            continue;
        };
        let op = WriteOp::SetEmbeddingStatus {
            id: id.clone(),
            status,
            overwrite,
        };
        if let Some(receipt) = committer.push(op, status).await.map_err(|f| f.source)? {
            report.record(receipt);
        }
    }
    if let Some(receipt) = committer.finish().await.map_err(|f| f.source)? {
        report.record(receipt);
    }

    info!(
        done = report.done,
        ready = report.ready,
        skipped = report.skipped,
        "embedding status sync complete"
    );
    Ok(report)
}
