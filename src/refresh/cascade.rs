use tracing::{info, instrument, warn};

use crate::database_ops::store::CatalogStore;
use crate::error::StoreError;
use crate::model::WriteOp;

/// References left behind after a delete, per partition.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Residue {
    pub record: bool,
    pub history_entries: usize,
    pub derived: bool,
}

impl Residue {
    pub fn is_clean(&self) -> bool {
        !self.record && self.history_entries == 0 && !self.derived
    }
}

/// Removes a product from every partition in one atomic operation.
pub struct DeletionCascade;

impl DeletionCascade {
    /// The single op that removes record, history and derived data. It
    /// costs one unit per partition against the batch ceiling.
    pub fn plan(id: &str) -> WriteOp {
        WriteOp::DeleteProduct { id: id.to_string() }
    }

    /// Delete immediately, outside of any refresh batch.
    #[instrument(skip(store))]
    pub async fn delete(store: &dyn CatalogStore, id: &str) -> Result<(), StoreError> {
        store.commit_batch(&[Self::plan(id)]).await?;
        info!(product_id = %id, "product deleted from all partitions");
        Ok(())
    }

    pub async fn residue(store: &dyn CatalogStore, id: &str) -> Result<Residue, StoreError> {
        Ok(Residue {
            record: store.load_record(id).await?.is_some(),
            history_entries: store.load_history(id).await?.len(),
            derived: store.has_derived(id).await?,
        })
    }

    /// `true` when no partition references `id` anymore.
    pub async fn verify_gone(store: &dyn CatalogStore, id: &str) -> Result<bool, StoreError> {
        let residue = Self::residue(store, id).await?;
        if !residue.is_clean() {
            warn!(product_id = %id, residue = ?residue, "product still referenced after delete");
        }
        Ok(residue.is_clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::model::{PriceHistoryEntry, ProductSnapshot, StockFlag, StoredRecord, PARTITION_COUNT};
    use crate::refresh::merger::plan_merge;
    use chrono::{TimeZone, Utc};

    fn seeded(id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_record(StoredRecord::new(id));
        store.insert_history(
            id,
            vec![PriceHistoryEntry {
                original_price: 1000,
                selling_price: 900,
                recorded_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            }],
        );
        store.insert_derived(id, serde_json::json!({ "vector": [0.1, 0.2] }));
        store
    }

    #[tokio::test]
    async fn delete_leaves_no_reference_in_any_partition() {
        let store = seeded("gone");
        store.insert_record(StoredRecord::new("kept"));

        DeletionCascade::delete(&store, "gone").await.unwrap();

        assert!(DeletionCascade::verify_gone(&store, "gone").await.unwrap());
        assert_eq!(store.record_ids(), vec!["kept".to_string()]);
        assert_eq!(store.committed_batch_sizes(), vec![PARTITION_COUNT]);
    }

    #[tokio::test]
    async fn failed_delete_leaves_every_partition_intact() {
        let store = seeded("p");
        store.fail_commit_number(1);

        assert!(DeletionCascade::delete(&store, "p").await.is_err());

        let residue = DeletionCascade::residue(&store, "p").await.unwrap();
        assert_eq!(
            residue,
            Residue {
                record: true,
                history_entries: 1,
                derived: true
            }
        );
    }

    #[tokio::test]
    async fn merge_landing_after_delete_leaves_no_history() {
        let store = seeded("x");
        let snapshot = ProductSnapshot {
            id: "x".into(),
            original_price: 1200,
            selling_price: 1000,
            quantity: "1개".into(),
            stock: StockFlag::InStock,
            fetched_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        };
        let plan = plan_merge(&store, &snapshot).await.unwrap();
        assert!(plan.appended);

        DeletionCascade::delete(&store, "x").await.unwrap();
        let report = store.commit_batch(&plan.ops).await.unwrap();

        assert!(report.appended.is_empty());
        assert_eq!(
            DeletionCascade::residue(&store, "x").await.unwrap(),
            Residue::default()
        );
    }

    #[tokio::test]
    async fn deleting_unknown_id_is_a_no_op() {
        let store = seeded("p");
        DeletionCascade::delete(&store, "missing").await.unwrap();
        assert!(!DeletionCascade::verify_gone(&store, "p").await.unwrap());
    }
}
