use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};

use crate::database_ops::db::Db;
use crate::database_ops::store::{CatalogStore, CommitReport};
use crate::error::StoreError;
use crate::model::{PriceHistoryEntry, StockFlag, StoredRecord, WriteOp};
use crate::normalization::timestamp::{format_timestamp, parse_timestamp};

const RECORD_COLUMNS: &str =
    "id, category, name, image_ref, address, quantity, stock, last_refreshed, embedding_status";

/// Postgres-backed catalog: `products`, `price_history`, `product_vectors`.
#[derive(Clone)]
pub struct PgCatalogStore {
    db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let stock_raw: String = row.try_get("stock")?;
    let stock = stock_raw.parse::<StockFlag>().unwrap_or_else(|e| {
        warn!(product_id = %id, error = %e, "unknown stock flag; treating as in stock");
        StockFlag::InStock
    });
    let embedding_status = row
        .try_get::<Option<String>, _>("embedding_status")?
        .and_then(|s| s.parse().ok());
    Ok(StoredRecord {
        category: row.try_get("category")?,
        name: row.try_get("name")?,
        image_ref: row.try_get("image_ref")?,
        address: row.try_get("address")?,
        quantity: row.try_get("quantity")?,
        stock,
        last_refreshed: row.try_get("last_refreshed")?,
        embedding_status,
        id,
    })
}

fn entry_from_row(row: &PgRow) -> Result<PriceHistoryEntry, StoreError> {
    Ok(PriceHistoryEntry {
        original_price: row.try_get("original_price")?,
        selling_price: row.try_get("selling_price")?,
        recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
    })
}

/// Returns `true` when the op appended a history row.
async fn apply(tx: &mut Transaction<'_, Postgres>, op: &WriteOp) -> Result<bool, StoreError> {
    match op {
        WriteOp::UpdateRecord(u) => {
            // Row lock keeps the read and the conditional write together.
            let current: Option<Option<String>> = sqlx::query_scalar(
                "SELECT last_refreshed FROM products WHERE id = $1 FOR UPDATE",
            )
            .persistent(false)
            .bind(&u.id)
            .fetch_optional(&mut **tx)
            .await?;
            let Some(current) = current else {
                return Ok(false);
            };
            // Unparseable stored values are replaced.
            let advance = current
                .as_deref()
                .and_then(parse_timestamp)
                .map_or(true, |existing| existing <= u.last_refreshed);
            if !advance {
                debug!(product_id = %u.id, "older snapshot; record left as is");
                return Ok(false);
            }
            sqlx::query(
                "UPDATE products SET stock = $2, quantity = $3, last_refreshed = $4 WHERE id = $1",
            )
            .persistent(false)
            .bind(&u.id)
            .bind(u.stock.as_str())
            .bind(&u.quantity)
            .bind(format_timestamp(&u.last_refreshed))
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::AppendHistory { id, entry } => {
            // Shared row lock: a concurrent delete either lands first (row gone,
            // append dropped) or waits for this commit and removes the row too.
            let present: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM products WHERE id = $1 FOR SHARE")
                    .persistent(false)
                    .bind(id)
                    .fetch_optional(&mut **tx)
                    .await?;
            if present.is_none() {
                debug!(product_id = %id, "record gone; history append dropped");
                return Ok(false);
            }
            // Serializes appends per product across overlapping cycles until commit.
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .persistent(false)
                .bind(id)
                .execute(&mut **tx)
                .await?;
            let inserted = sqlx::query(
                "INSERT INTO price_history (product_id, original_price, selling_price, recorded_at)
                 SELECT $1, $2, $3, $4
                 WHERE NOT EXISTS (
                     SELECT 1 FROM (
                         SELECT original_price, selling_price
                         FROM price_history
                         WHERE product_id = $1
                         ORDER BY seq DESC
                         LIMIT 1
                     ) tail
                     WHERE tail.original_price = $2 AND tail.selling_price = $3
                 )",
            )
            .persistent(false)
            .bind(id)
            .bind(entry.original_price)
            .bind(entry.selling_price)
            .bind(entry.recorded_at)
            .execute(&mut **tx)
            .await?;
            return Ok(inserted.rows_affected() == 1);
        }
        WriteOp::SetStock { id, stock } => {
            sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
                .persistent(false)
                .bind(id)
                .bind(stock.as_str())
                .execute(&mut **tx)
                .await?;
        }
        WriteOp::SetEmbeddingStatus {
            id,
            status,
            overwrite,
        } => {
            sqlx::query(
                "UPDATE products SET embedding_status = $2
                 WHERE id = $1 AND ($3 OR embedding_status IS NULL)",
            )
            .persistent(false)
            .bind(id)
            .bind(status.as_str())
            .bind(*overwrite)
            .execute(&mut **tx)
            .await?;
        }
        WriteOp::DeleteProduct { id } => {
            // The record goes first so its row lock orders this against appends.
            for stmt in [
                "DELETE FROM products WHERE id = $1",
                "DELETE FROM price_history WHERE product_id = $1",
                "DELETE FROM product_vectors WHERE product_id = $1",
            ] {
                sqlx::query(stmt)
                    .persistent(false)
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }
    Ok(false)
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn scan_records(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM products
             WHERE ($1::text IS NULL OR id > $1)
             ORDER BY id
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn load_record(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn history_tail(&self, id: &str) -> Result<Option<PriceHistoryEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT original_price, selling_price, recorded_at
             FROM price_history WHERE product_id = $1
             ORDER BY seq DESC LIMIT 1",
        )
        .persistent(false)
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn load_history(&self, id: &str) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT original_price, selling_price, recorded_at
             FROM price_history WHERE product_id = $1
             ORDER BY seq",
        )
        .persistent(false)
        .bind(id)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn has_derived(&self, id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM product_vectors WHERE product_id = $1)",
        )
        .persistent(false)
        .bind(id)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<CommitReport, StoreError> {
        let mut report = CommitReport::default();
        if ops.is_empty() {
            return Ok(report);
        }
        let mut tx = self.db.pool.begin().await?;
        for op in ops {
            if apply(&mut tx, op).await? {
                report.appended.insert(op.product_id().to_string());
            }
        }
        tx.commit().await?;
        Ok(report)
    }
}
