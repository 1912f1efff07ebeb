// Catalog domain types shared by the refresh engine, the stores and the API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalization::price::de_price;
use crate::normalization::timestamp::de_timestamp;

/// Number of partitions a product occupies: record, history, derived data.
pub const PARTITION_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockFlag {
    #[default]
    #[serde(alias = "N")]
    InStock,
    #[serde(alias = "Y")]
    OutOfStock,
}

impl StockFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockFlag::InStock => "in_stock",
            StockFlag::OutOfStock => "out_of_stock",
        }
    }
}

impl fmt::Display for StockFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockFlag {
    type Err = String;

    // Legacy rows carry the ingester's Y/N flag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_stock" | "n" => Ok(StockFlag::InStock),
            "out_of_stock" | "y" => Ok(StockFlag::OutOfStock),
            other => Err(format!("unknown stock flag '{other}'")),
        }
    }
}

/// Status tag owned by the embedding pipeline; the refresh core never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    #[serde(alias = "R")]
    Ready,
    #[serde(alias = "D")]
    Done,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Ready => "ready",
            EmbeddingStatus::Done => "done",
        }
    }
}

impl FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ready" | "r" => Ok(EmbeddingStatus::Ready),
            "done" | "d" => Ok(EmbeddingStatus::Done),
            other => Err(format!("unknown embedding status '{other}'")),
        }
    }
}

/// A product row exactly as persisted. `last_refreshed` is kept raw because
/// legacy writers stored free-form ISO strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    pub image_ref: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub stock: StockFlag,
    pub last_refreshed: Option<String>,
    pub embedding_status: Option<EmbeddingStatus>,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            name: String::new(),
            image_ref: None,
            address: None,
            quantity: String::new(),
            stock: StockFlag::InStock,
            last_refreshed: None,
            embedding_status: None,
        }
    }

    pub fn with_last_refreshed(mut self, raw: impl Into<String>) -> Self {
        self.last_refreshed = Some(raw.into());
        self
    }
}

/// Canonical product record with a parsed refresh timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub id: String,
    pub category: String,
    pub name: String,
    pub image_ref: Option<String>,
    pub address: Option<String>,
    pub quantity: String,
    pub stock: StockFlag,
    pub last_refreshed: DateTime<Utc>,
    pub embedding_status: Option<EmbeddingStatus>,
}

impl ProductRecord {
    pub fn from_stored(stored: StoredRecord, last_refreshed: DateTime<Utc>) -> Self {
        Self {
            id: stored.id,
            category: stored.category,
            name: stored.name,
            image_ref: stored.image_ref,
            address: stored.address,
            quantity: stored.quantity,
            stock: stored.stock,
            last_refreshed,
            embedding_status: stored.embedding_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePair {
    pub original: i64,
    pub selling: i64,
}

/// Point-in-time fetch result, already reconciled: both prices are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub original_price: i64,
    pub selling_price: i64,
    pub quantity: String,
    pub stock: StockFlag,
    pub fetched_at: DateTime<Utc>,
}

impl ProductSnapshot {
    pub fn prices(&self) -> PricePair {
        PricePair {
            original: self.original_price,
            selling: self.selling_price,
        }
    }

    pub fn history_entry(&self) -> PriceHistoryEntry {
        PriceHistoryEntry {
            original_price: self.original_price,
            selling_price: self.selling_price,
            recorded_at: self.fetched_at,
        }
    }
}

/// Immutable once appended. Deserialization accepts the legacy document
/// shape where prices were strings and the timestamp was `last_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    #[serde(deserialize_with = "de_price")]
    pub original_price: i64,
    #[serde(deserialize_with = "de_price")]
    pub selling_price: i64,
    #[serde(alias = "last_updated", alias = "timestamp", deserialize_with = "de_timestamp")]
    pub recorded_at: DateTime<Utc>,
}

impl PriceHistoryEntry {
    pub fn prices(&self) -> PricePair {
        PricePair {
            original: self.original_price,
            selling: self.selling_price,
        }
    }
}

/// Top-level fields a refresh always rewrites.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub stock: StockFlag,
    pub quantity: String,
    pub last_refreshed: DateTime<Utc>,
}

/// One store mutation. Every variant is an idempotent overwrite or a
/// tail-guarded append, so replaying a batch never duplicates state.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    UpdateRecord(RecordUpdate),
    /// Applied only when the stored tail differs from `entry`'s price pair.
    AppendHistory { id: String, entry: PriceHistoryEntry },
    SetStock { id: String, stock: StockFlag },
    /// With `overwrite == false` the status is only written when none is set.
    SetEmbeddingStatus {
        id: String,
        status: EmbeddingStatus,
        overwrite: bool,
    },
    /// Removes the record, its history and its derived data.
    DeleteProduct { id: String },
}

impl WriteOp {
    pub fn product_id(&self) -> &str {
        match self {
            WriteOp::UpdateRecord(u) => &u.id,
            WriteOp::AppendHistory { id, .. }
            | WriteOp::SetStock { id, .. }
            | WriteOp::SetEmbeddingStatus { id, .. }
            | WriteOp::DeleteProduct { id } => id,
        }
    }

    /// Operations this mutation consumes against the store's per-batch ceiling.
    pub fn cost(&self) -> usize {
        match self {
            WriteOp::DeleteProduct { .. } => PARTITION_COUNT,
            _ => 1,
        }
    }
}
