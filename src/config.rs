use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::refresh::committer::STORE_BATCH_CEILING;
use crate::refresh::pacing::{DelayRange, RetryPolicy};
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_PAGE_BASE: &str = "https://emart.ssg.com/item/itemView.ssg";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// What a refresh does with a product whose page reports it sold out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnavailablePolicy {
    /// Remove the product from every partition.
    #[default]
    Delete,
    /// Keep record and history, flag it out of stock.
    MarkOutOfStock,
}

impl FromStr for UnavailablePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(UnavailablePolicy::Delete),
            "mark" | "mark_out_of_stock" => Ok(UnavailablePolicy::MarkOutOfStock),
            other => Err(format!("unknown unavailable policy '{other}'")),
        }
    }
}

impl fmt::Display for UnavailablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnavailablePolicy::Delete => "delete",
            UnavailablePolicy::MarkOutOfStock => "mark",
        })
    }
}

/// `days` as a staleness threshold, or `None` when the resulting cutoff
/// (now minus the threshold) would fall outside the representable range.
pub fn stale_threshold_days(days: i64) -> Option<chrono::Duration> {
    chrono::Duration::try_days(days)
        .filter(|threshold| chrono::Utc::now().checked_sub_signed(*threshold).is_some())
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub page_base: String,
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub inter_request: DelayRange,
    pub stale_after: chrono::Duration,
    pub scan_page_size: usize,
    pub batch_op_limit: usize,
    pub unavailable_policy: UnavailablePolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            page_base: DEFAULT_PAGE_BASE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            inter_request: DelayRange::from_millis(1000, 3000),
            stale_after: chrono::Duration::days(6),
            scan_page_size: 500,
            batch_op_limit: 450,
            unavailable_policy: UnavailablePolicy::Delete,
        }
    }
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let policy = match env_opt("UNAVAILABLE_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to delete policy");
                UnavailablePolicy::Delete
            }),
            None => d.unavailable_policy,
        };
        let stale_days = env_parse("STALE_AFTER_DAYS", 6i64);
        let stale_after = stale_threshold_days(stale_days).unwrap_or_else(|| {
            tracing::warn!(stale_days, "STALE_AFTER_DAYS out of range; using default");
            d.stale_after
        });
        Self {
            page_base: env_opt("PRODUCT_PAGE_BASE").unwrap_or(d.page_base),
            user_agent: env_opt("SCRAPER_USER_AGENT").unwrap_or(d.user_agent),
            fetch_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS", 15u64)),
            retry: RetryPolicy::new(
                env_parse("RATE_LIMIT_MAX_RETRIES", 10u32),
                Duration::from_millis(env_parse("RATE_LIMIT_BASE_MS", 10_000u64)),
                Duration::from_millis(env_parse("RATE_LIMIT_JITTER_MS", 5_000u64)),
            ),
            inter_request: DelayRange::from_millis(
                env_parse("INTER_REQUEST_MIN_MS", 1000u64),
                env_parse("INTER_REQUEST_MAX_MS", 3000u64),
            ),
            stale_after,
            scan_page_size: env_parse("SCAN_PAGE_SIZE", d.scan_page_size).max(1),
            batch_op_limit: env_parse("BATCH_OP_LIMIT", d.batch_op_limit).min(STORE_BATCH_CEILING),
            unavailable_policy: policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!("delete".parse::<UnavailablePolicy>().unwrap(), UnavailablePolicy::Delete);
        assert_eq!("MARK".parse::<UnavailablePolicy>().unwrap(), UnavailablePolicy::MarkOutOfStock);
        assert!("archive".parse::<UnavailablePolicy>().is_err());
    }

    #[test]
    fn stale_threshold_rejects_unrepresentable_cutoffs() {
        assert_eq!(stale_threshold_days(6), Some(chrono::Duration::days(6)));
        assert_eq!(stale_threshold_days(0), Some(chrono::Duration::zero()));
        assert!(stale_threshold_days(200_000_000).is_none());
        assert!(stale_threshold_days(i64::MAX).is_none());
        assert!(stale_threshold_days(i64::MIN).is_none());
    }

    #[test]
    fn defaults_follow_storefront_limits() {
        let cfg = RefreshConfig::default();
        assert_eq!(cfg.retry.max_retries, 10);
        assert_eq!(cfg.stale_after, chrono::Duration::days(6));
        assert!(cfg.batch_op_limit <= STORE_BATCH_CEILING);
        assert_eq!(cfg.unavailable_policy, UnavailablePolicy::Delete);
    }
}
