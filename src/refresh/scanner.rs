use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::database_ops::store::CatalogStore;
use crate::error::StoreError;
use crate::model::{ProductRecord, StoredRecord};
use crate::normalization::timestamp::parse_timestamp;

/// Result of one full pass over the record partition.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    /// Records whose `last_refreshed` is strictly before the cutoff.
    pub stale: Vec<ProductRecord>,
    /// `(id, raw value)` for records whose timestamp is missing or unparseable.
    pub malformed: Vec<(String, Option<String>)>,
}

/// Parse a stored record's timestamp; `Err((id, raw))` when it is missing or malformed.
pub fn canonicalize(stored: StoredRecord) -> Result<ProductRecord, (String, Option<String>)> {
    match stored.last_refreshed.as_deref().and_then(parse_timestamp) {
        Some(ts) => Ok(ProductRecord::from_stored(stored, ts)),
        None => Err((stored.id, stored.last_refreshed)),
    }
}

/// Walk every record in id order, `page_size` at a time, and classify it
/// against `cutoff`. A malformed record is logged and skipped.
#[instrument(skip(store), fields(cutoff = %cutoff))]
pub async fn scan_stale(
    store: &dyn CatalogStore,
    cutoff: DateTime<Utc>,
    page_size: usize,
) -> Result<ScanReport, StoreError> {
    let page_size = page_size.max(1);
    let mut report = ScanReport::default();
    let mut after: Option<String> = None;

    loop {
        let page = store.scan_records(after.as_deref(), page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.id.clone());
        let full_page = page.len() == page_size;
        report.scanned += page.len();

        for stored in page {
            match canonicalize(stored) {
                Ok(record) if record.last_refreshed < cutoff => report.stale.push(record),
                Ok(_) => {}
                Err((id, raw)) => {
                    warn!(product_id = %id, raw = ?raw, "unparseable last_refreshed; skipping record");
                    report.malformed.push((id, raw));
                }
            }
        }
        debug!(scanned = report.scanned, stale = report.stale.len(), "scan page done");
        if !full_page {
            break;
        }
    }

    info!(
        scanned = report.scanned,
        stale = report.stale.len(),
        malformed = report.malformed.len(),
        "staleness scan complete"
    );
    Ok(report)
}
