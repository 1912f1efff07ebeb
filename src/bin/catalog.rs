use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use price_mirror::config::{stale_threshold_days, RefreshConfig};
use price_mirror::database_ops::db::Db;
use price_mirror::database_ops::embedding::sync_embedding_status;
use price_mirror::database_ops::pg_store::PgCatalogStore;
use price_mirror::database_ops::stock_sweep::mark_stale_out_of_stock;
use price_mirror::database_ops::store::CatalogStore;
use price_mirror::refresh::cascade::DeletionCascade;
use price_mirror::refresh::engine::RefreshEngine;
use price_mirror::refresh::fetcher::{HttpTransport, SnapshotFetcher};
use price_mirror::refresh::pacing::{Sleeper, TokioSleeper};
use price_mirror::util::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "catalog", version, about = "price-mirror admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run one refresh cycle over stale products and print the summary
    Refresh {
        /// Override STALE_AFTER_DAYS for this run
        #[arg(long)]
        stale_after_days: Option<u32>,
    },
    /// Fetch product pages and print the snapshots; the store is not touched
    Fetch {
        /// Product ids; commas and surrounding whitespace are ignored
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print the ordered price history of a product
    History { id: String },
    /// Remove a product from every partition and verify nothing is left
    Delete { id: String },
    /// Flag products not refreshed for N days as out of stock
    MarkStaleOutOfStock {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Align embedding status with the presence of derived vectors
    SyncEmbeddingStatus {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Apply pending SQL migrations
    Migrate {
        #[arg(long, default_value = "./migrations")]
        dir: PathBuf,
    },
}

/// Split, trim and drop empty ids (`"123, 456,"` is two ids).
fn normalize_ids(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|arg| arg.split(','))
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

async fn connect() -> Result<Db> {
    let database_url = env::db_url()?;
    Db::connect(&database_url, env::env_parse("DB_MAX_CONNS", 5u32))
        .await
        .context("connecting to catalog database")
}

async fn connect_store() -> Result<Arc<dyn CatalogStore>> {
    Ok(Arc::new(PgCatalogStore::new(connect().await?)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    price_mirror::tracing::init_tracing(price_mirror::tracing::DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let config = RefreshConfig::from_env();

    match cli.command {
        Commands::Refresh { stale_after_days } => {
            let engine = RefreshEngine::from_config(connect_store().await?, config)?;
            let threshold = stale_after_days
                .map(|days| {
                    stale_threshold_days(i64::from(days))
                        .with_context(|| format!("--stale-after-days {days} is out of range"))
                })
                .transpose()?;
            match engine.refresh_stale(threshold).await {
                Ok(summary) => print_json(&summary)?,
                Err(e) => {
                    if let Some(partial) = e.partial_summary() {
                        print_json(partial)?;
                    }
                    return Err(e).context("refresh cycle failed");
                }
            }
        }
        Commands::Fetch { ids } => {
            let ids = normalize_ids(&ids);
            let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
            let transport = HttpTransport::new(&config.user_agent, config.fetch_timeout)?;
            let fetcher = SnapshotFetcher::new(
                Arc::new(transport),
                sleeper.clone(),
                &config.page_base,
                config.retry,
            )?;
            let mut snapshots = Vec::with_capacity(ids.len());
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    sleeper.sleep(config.inter_request.sample()).await;
                }
                match fetcher.fetch(id).await {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(failure) => warn!(product_id = %id, reason = %failure.reason, "fetch failed"),
                }
            }
            info!(requested = ids.len(), fetched = snapshots.len(), "fetch complete");
            print_json(&snapshots)?;
        }
        Commands::History { id } => {
            let store = connect_store().await?;
            if store.load_record(&id).await?.is_none() {
                bail!("product {id} not found");
            }
            print_json(&store.load_history(&id).await?)?;
        }
        Commands::Delete { id } => {
            let store = connect_store().await?;
            DeletionCascade::delete(store.as_ref(), &id).await?;
            let residue = DeletionCascade::residue(store.as_ref(), &id).await?;
            if !residue.is_clean() {
                bail!("product {id} still referenced after delete: {residue:?}");
            }
            info!(product_id = %id, "delete verified");
        }
        Commands::MarkStaleOutOfStock { days } => {
            let store = connect_store().await?;
            let cutoff = stale_threshold_days(i64::from(days))
                .and_then(|threshold| chrono::Utc::now().checked_sub_signed(threshold))
                .with_context(|| format!("--days {days} is out of range"))?;
            let report =
                mark_stale_out_of_stock(store, cutoff, config.scan_page_size, config.batch_op_limit)
                    .await?;
            print_json(&report)?;
        }
        Commands::SyncEmbeddingStatus { ids } => {
            let store = connect_store().await?;
            let report =
                sync_embedding_status(store, &normalize_ids(&ids), config.batch_op_limit).await?;
            print_json(&report)?;
        }
        Commands::Migrate { dir } => {
            let db = connect().await?;
            let applied = db.run_migrations(&dir).await?;
            info!(applied, dir = %dir.display(), "migrate: done");
        }
    }
    Ok(())
}
