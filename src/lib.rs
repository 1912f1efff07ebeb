//! Catalog price mirror: keeps stored product records fresh by re-fetching
//! their storefront pages, appending price changes to an append-only
//! history and deleting products that disappeared from sale.

pub mod api;
pub mod config;
pub mod database_ops;
pub mod error;
pub mod model;
pub mod normalization;
pub mod refresh;
pub mod tracing;

pub mod util {
    pub mod env;
}

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{RefreshConfig, UnavailablePolicy};
pub use database_ops::store::CatalogStore;
pub use refresh::engine::{RefreshEngine, RefreshSummary};
