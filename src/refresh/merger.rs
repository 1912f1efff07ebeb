use tracing::debug;

use crate::database_ops::store::CatalogStore;
use crate::error::StoreError;
use crate::model::{ProductSnapshot, RecordUpdate, WriteOp};
use crate::refresh::change::has_changed;

/// Operations that fold one snapshot into the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub ops: Vec<WriteOp>,
    pub appended: bool,
}

/// Top-level fields are always overwritten; a history entry is appended
/// only when `changed`. The update comes first so a plan never carries an
/// append without its record write.
pub fn merge(snapshot: &ProductSnapshot, changed: bool) -> MergePlan {
    let mut ops = vec![WriteOp::UpdateRecord(RecordUpdate {
        id: snapshot.id.clone(),
        stock: snapshot.stock,
        quantity: snapshot.quantity.clone(),
        last_refreshed: snapshot.fetched_at,
    })];
    if changed {
        ops.push(WriteOp::AppendHistory {
            id: snapshot.id.clone(),
            entry: snapshot.history_entry(),
        });
    }
    MergePlan {
        ops,
        appended: changed,
    }
}

/// Read the current history tail and plan the merge against it.
///
/// The tail is read immediately before deciding so a product refreshed by
/// an overlapping cycle is compared against that cycle's entry. The
/// decision can still race a concurrent writer between this read and the
/// commit; both stores guard the append against a tail with the same
/// price pair, so the race cannot produce a duplicate entry.
pub async fn plan_merge(
    store: &dyn CatalogStore,
    snapshot: &ProductSnapshot,
) -> Result<MergePlan, StoreError> {
    let tail = store.history_tail(&snapshot.id).await?;
    let changed = has_changed(tail.as_ref(), snapshot);
    debug!(product_id = %snapshot.id, changed, "merge planned");
    Ok(merge(snapshot, changed))
}
