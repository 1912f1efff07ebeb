use anyhow::{Context, Result};
use price_mirror::api::{ApiServer, AppState};
use price_mirror::config::RefreshConfig;
use price_mirror::database_ops::db::Db;
use price_mirror::database_ops::pg_store::PgCatalogStore;
use price_mirror::database_ops::store::CatalogStore;
use price_mirror::refresh::engine::RefreshEngine;
use price_mirror::util::env as env_util;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

/// Periodic refresh loop. The first cycle runs immediately; a failing
/// cycle is logged and the loop keeps going.
fn spawn_scheduler(
    tasks: &mut JoinSet<()>,
    engine: Arc<RefreshEngine>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut runs = 0u64;
        let mut failures = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.recv() => {
                    info!("scheduler: shutdown");
                    break;
                }
            }

            runs += 1;
            let t_run = std::time::Instant::now();
            // Dropping an in-flight cycle keeps every batch it already committed.
            let result = tokio::select! {
                r = engine
                    .refresh_stale(None)
                    .instrument(info_span!("refresh.tick", run = runs)) => r,
                _ = shutdown.recv() => {
                    info!("scheduler: shutdown during cycle");
                    break;
                }
            };
            match result {
                Ok(summary) => info!(
                    elapsed_ms = t_run.elapsed().as_millis() as u64,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    skipped_unchanged = summary.skipped_unchanged,
                    skipped_errored = summary.skipped_errored,
                    "scheduler: cycle complete"
                ),
                Err(e) => {
                    failures += 1;
                    error!(
                        error = %e,
                        partial = ?e.partial_summary(),
                        failures,
                        "scheduler: cycle failed"
                    );
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- env + logging -------------------------------------------------------
    env_util::init_env();
    price_mirror::tracing::init_tracing(price_mirror::tracing::DEFAULT_FILTER)?;
    env_util::preflight_check(
        "price-mirror",
        &["DATABASE_URL", "API_SECRET"],
        &[
            "DATABASE_URL",
            "PRODUCT_PAGE_BASE",
            "STALE_AFTER_DAYS",
            "BATCH_OP_LIMIT",
            "UNAVAILABLE_POLICY",
            "SCHEDULER_ENABLED",
            "REFRESH_INTERVAL_SECS",
            "API_HOST",
            "API_PORT",
        ],
    )?;

    // --- store + engine ------------------------------------------------------
    let config = RefreshConfig::from_env();
    let database_url = env_util::db_url()?;
    let db = Db::connect(&database_url, env_util::env_parse("DB_MAX_CONNS", 5u32))
        .await
        .context("connecting to catalog database")?;
    let store: Arc<dyn CatalogStore> = Arc::new(PgCatalogStore::new(db));
    let engine = Arc::new(RefreshEngine::from_config(store, config)?);
    info!(
        policy = %engine.config().unavailable_policy,
        stale_after_days = engine.config().stale_after.num_days(),
        batch_op_limit = engine.config().batch_op_limit,
        "refresh engine ready"
    );

    // --- scheduler -----------------------------------------------------------
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = JoinSet::new();
    if env_util::env_flag("SCHEDULER_ENABLED", false) {
        let interval_secs = env_util::env_parse("REFRESH_INTERVAL_SECS", 86_400u64);
        info!(interval_secs, "scheduler: enabled");
        spawn_scheduler(&mut tasks, engine.clone(), interval_secs, shutdown_tx.subscribe());
    } else {
        info!("scheduler: disabled (SCHEDULER_ENABLED not set)");
    }

    // --- HTTP trigger API (returns on Ctrl+C) ---------------------------------
    let served = ApiServer::from_env()?.run(AppState::new(engine)).await;

    let _ = shutdown_tx.send(());
    info!("shutdown: stopping {} task(s)", tasks.len());
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "task join error");
        }
    }
    served
}
