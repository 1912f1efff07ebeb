//! Stale-record refresh: scan, fetch, diff, merge, commit.

pub mod cascade;
pub mod change;
pub mod committer;
pub mod engine;
pub mod fetcher;
pub mod merger;
pub mod pacing;
pub mod scanner;
