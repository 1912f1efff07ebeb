use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::database_ops::store::CatalogStore;
use crate::error::StoreError;
use crate::model::{StockFlag, WriteOp};
use crate::refresh::committer::BatchCommitter;
use crate::refresh::scanner::scan_stale;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StockSweepReport {
    pub scanned: usize,
    pub marked: usize,
    pub malformed: usize,
}

/// Flag every record not refreshed since `cutoff` as out of stock.
/// Records already flagged are left alone.
#[instrument(skip(store), fields(cutoff = %cutoff))]
pub async fn mark_stale_out_of_stock(
    store: Arc<dyn CatalogStore>,
    cutoff: DateTime<Utc>,
    page_size: usize,
    batch_limit: usize,
) -> Result<StockSweepReport, StoreError> {
    let scan = scan_stale(store.as_ref(), cutoff, page_size).await?;
    let mut report = StockSweepReport {
        scanned: scan.scanned,
        malformed: scan.malformed.len(),
        ..StockSweepReport::default()
    };

    let mut committer: BatchCommitter<()> = BatchCommitter::new(store, batch_limit);
    for record in scan.stale {
        if record.stock == StockFlag::OutOfStock {
            continue;
        }
        let op = WriteOp::SetStock {
            id: record.id,
            stock: StockFlag::OutOfStock,
        };
        if let Some(receipt) = committer.push(op, ()).await.map_err(|f| f.source)? {
            report.marked += receipt.tags.len();
        }
    }
    if let Some(receipt) = committer.finish().await.map_err(|f| f.source)? {
        report.marked += receipt.tags.len();
    }

    info!(
        scanned = report.scanned,
        marked = report.marked,
        malformed = report.malformed,
        "stale stock sweep complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::model::StoredRecord;
    use chrono::TimeZone;

    #[tokio::test]
    async fn marks_only_stale_in_stock_records() {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(StoredRecord::new("old").with_last_refreshed("2025-01-01T00:00:00Z"));
        store.insert_record(StoredRecord::new("new").with_last_refreshed("2025-07-01T00:00:00Z"));
        let mut flagged = StoredRecord::new("flagged").with_last_refreshed("2025-01-01T00:00:00Z");
        flagged.stock = StockFlag::OutOfStock;
        store.insert_record(flagged);
        store.insert_record(StoredRecord::new("bad").with_last_refreshed("??"));

        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let report = mark_stale_out_of_stock(store.clone(), cutoff, 2, 450)
            .await
            .unwrap();

        assert_eq!(
            report,
            StockSweepReport {
                scanned: 4,
                marked: 1,
                malformed: 1
            }
        );
        let old = store.load_record("old").await.unwrap().unwrap();
        assert_eq!(old.stock, StockFlag::OutOfStock);
        let new = store.load_record("new").await.unwrap().unwrap();
        assert_eq!(new.stock, StockFlag::InStock);
        assert_eq!(
            old.last_refreshed.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }
}
