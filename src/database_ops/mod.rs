//! Catalog persistence: the store seam, its Postgres and in-process
//! implementations, and maintenance passes built on top of them.

pub mod db;
pub mod embedding;
pub mod memory_store;
pub mod pg_store;
pub mod stock_sweep;
pub mod store;
