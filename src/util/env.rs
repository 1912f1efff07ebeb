//! Environment helpers: dotenv loading once, typed getters and a redacted
//! configuration snapshot for startup logs.
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load `.env` exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Catalog database DSN: `DATABASE_URL`, then `DB_URL`.
pub fn db_url() -> anyhow::Result<String> {
    ["DATABASE_URL", "DB_URL"]
        .into_iter()
        .find_map(env_opt)
        .ok_or_else(|| anyhow::anyhow!("no database URL env vars set (DATABASE_URL)"))
}

fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") {
        return "***".to_string();
    }
    let val_trim = val.trim();

    // Postgres DSNs are redacted whatever the key is called.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }
    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|&k| (k.to_string(), redact_value(k, &env_opt(k).unwrap_or_default())))
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_dsn_credentials_and_secrets() {
        let dsn = redact_value("DATABASE_URL", "postgres://user:pw@db.internal:5432/catalog");
        assert!(!dsn.contains("pw@"));
        assert!(dsn.contains("db.internal"));
        assert_eq!(redact_value("API_SECRET", "hunter2"), "***");
        assert_eq!(redact_value("API_PORT", " 8080 "), "8080");
    }

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("PRICE_MIRROR_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("PRICE_MIRROR_TEST_PARSE", 7u32), 7);
        std::env::set_var("PRICE_MIRROR_TEST_PARSE", " 12 ");
        assert_eq!(env_parse("PRICE_MIRROR_TEST_PARSE", 7u32), 12);
    }
}
