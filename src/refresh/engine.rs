use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::{RefreshConfig, UnavailablePolicy};
use crate::database_ops::store::CatalogStore;
use crate::error::RefreshError;
use crate::model::StockFlag;
use crate::refresh::cascade::DeletionCascade;
use crate::refresh::committer::{BatchCommitter, BatchReceipt};
use crate::refresh::fetcher::{HttpTransport, SnapshotFetcher};
use crate::refresh::merger::plan_merge;
use crate::refresh::pacing::{Sleeper, TokioSleeper};
use crate::refresh::scanner::scan_stale;

/// Counts reported by one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub scanned: usize,
    pub stale: usize,
    /// A history entry was appended. Counted from what the store applied,
    /// so an append dropped by its tail guard counts as unchanged.
    pub updated: usize,
    pub deleted: usize,
    /// Record rewritten, prices unchanged.
    pub skipped_unchanged: usize,
    /// Fetch failures, malformed timestamps and unreadable history.
    pub skipped_errored: usize,
    /// Staged in a batch that failed to commit.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Updated,
    Unchanged,
    Deleted,
}

type Tag = (String, Outcome);

impl RefreshSummary {
    fn record(&mut self, receipt: BatchReceipt<Tag>) {
        for (id, outcome) in receipt.tags {
            match outcome {
                Outcome::Updated if receipt.appended.contains(&id) => self.updated += 1,
                Outcome::Updated | Outcome::Unchanged => self.skipped_unchanged += 1,
                Outcome::Deleted => self.deleted += 1,
            }
        }
    }
}

/// Runs refresh cycles: scan, then fetch, diff and stage each stale
/// product in turn, committing in bounded atomic batches.
pub struct RefreshEngine {
    store: Arc<dyn CatalogStore>,
    fetcher: SnapshotFetcher,
    sleeper: Arc<dyn Sleeper>,
    config: RefreshConfig,
}

impl RefreshEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        fetcher: SnapshotFetcher,
        sleeper: Arc<dyn Sleeper>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            sleeper,
            config,
        }
    }

    /// Production wiring: reqwest transport and tokio timers.
    pub fn from_config(store: Arc<dyn CatalogStore>, config: RefreshConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.user_agent, config.fetch_timeout)
            .context("building page HTTP client")?;
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let fetcher = SnapshotFetcher::new(
            Arc::new(transport),
            sleeper.clone(),
            &config.page_base,
            config.retry,
        )
        .context("invalid PRODUCT_PAGE_BASE")?;
        Ok(Self::new(store, fetcher, sleeper, config))
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    pub fn fetcher(&self) -> &SnapshotFetcher {
        &self.fetcher
    }

    /// One full cycle over every record older than now minus the threshold
    /// (`threshold_override` or the configured default).
    ///
    /// A threshold whose cutoff is not representable is rejected before
    /// anything is read. Per-product failures are counted and skipped. A
    /// failed batch commit ends the cycle; batches committed before it stay
    /// applied and the error carries the partial summary.
    #[instrument(skip(self))]
    pub async fn refresh_stale(
        &self,
        threshold_override: Option<chrono::Duration>,
    ) -> Result<RefreshSummary, RefreshError> {
        let threshold = threshold_override.unwrap_or(self.config.stale_after);
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .ok_or(RefreshError::InvalidThreshold(threshold))?;
        info!(%cutoff, policy = %self.config.unavailable_policy, "refresh cycle starting");

        let report = scan_stale(self.store.as_ref(), cutoff, self.config.scan_page_size)
            .await
            .map_err(RefreshError::Scan)?;

        let mut summary = RefreshSummary {
            scanned: report.scanned,
            stale: report.stale.len(),
            skipped_errored: report.malformed.len(),
            ..RefreshSummary::default()
        };
        let mut committer: BatchCommitter<Tag> =
            BatchCommitter::new(self.store.clone(), self.config.batch_op_limit);

        for (i, record) in report.stale.iter().enumerate() {
            if i > 0 {
                self.sleeper.sleep(self.config.inter_request.sample()).await;
            }

            let snapshot = match self.fetcher.fetch(&record.id).await {
                Ok(s) => s,
                Err(failure) => {
                    warn!(product_id = %record.id, reason = %failure.reason, "fetch failed; skipping");
                    summary.skipped_errored += 1;
                    continue;
                }
            };

            let unavailable = snapshot.stock == StockFlag::OutOfStock;
            let (ops, outcome) =
                if unavailable && self.config.unavailable_policy == UnavailablePolicy::Delete {
                    info!(product_id = %record.id, "product unavailable; deleting");
                    (vec![DeletionCascade::plan(&record.id)], Outcome::Deleted)
                } else {
                    match plan_merge(self.store.as_ref(), &snapshot).await {
                        Ok(plan) if plan.appended => (plan.ops, Outcome::Updated),
                        Ok(plan) => (plan.ops, Outcome::Unchanged),
                        Err(e) => {
                            warn!(product_id = %record.id, error = %e, "history tail unreadable; skipping");
                            summary.skipped_errored += 1;
                            continue;
                        }
                    }
                };

            match committer.stage(ops, (record.id.clone(), outcome)).await {
                Ok(Some(receipt)) => summary.record(receipt),
                Ok(None) => {}
                Err(failure) => {
                    summary.failed += failure.tags.len();
                    return Err(RefreshError::BatchCommit {
                        summary,
                        source: failure.source,
                    });
                }
            }
        }

        match committer.finish().await {
            Ok(Some(receipt)) => summary.record(receipt),
            Ok(None) => {}
            Err(failure) => {
                summary.failed += failure.tags.len();
                return Err(RefreshError::BatchCommit {
                    summary,
                    source: failure.source,
                });
            }
        }

        info!(
            scanned = summary.scanned,
            stale = summary.stale,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped_unchanged = summary.skipped_unchanged,
            skipped_errored = summary.skipped_errored,
            "refresh cycle complete"
        );
        Ok(summary)
    }
}
