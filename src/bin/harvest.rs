use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use steam_harvest::config::{HarvestConfig, SinkConfig, SNAPSHOT_KEYS};
use steam_harvest::progress::ProgressTracker;
use steam_harvest::records::AppId;
use steam_harvest::sink::{open_existing_sink, open_sink, SinkStats};
use steam_harvest::steam::{CatalogApi, SteamClient};
use steam_harvest::throttle::RequestThrottle;
use steam_harvest::util::{env, logging};
use steam_harvest::Harvester;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Resumable Steam catalog collector")]
struct Cli {
    /// Override the progress state directory (HARVEST_STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Fetch details (and reviews) for every app not yet completed or failed
    Run {
        /// Concurrent workers; 1 runs sequentially
        #[arg(long)]
        workers: Option<usize>,
        /// Only process the first N remaining apps
        #[arg(long)]
        sample: Option<usize>,
        /// Skip review collection
        #[arg(long, default_value_t = false)]
        no_reviews: bool,
        /// Output sink: csv or sqlite
        #[arg(long)]
        sink: Option<String>,
        /// Requests per second across all workers
        #[arg(long)]
        rps: Option<u32>,
    },
    /// Print progress counts and stored record totals
    Status {
        /// Also fetch the catalog and report how many apps remain
        #[arg(long, default_value_t = false)]
        with_catalog: bool,
    },
    /// Clear failed ids so the next run retries them
    ResetFailed {
        /// Only clear these ids (repeatable); clears all when omitted
        #[arg(long = "id")]
        ids: Vec<AppId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    logging::init_tracing("steam_harvest=info,harvest=info")?;

    let cli = Cli::parse();
    let mut cfg = HarvestConfig::from_env()?;
    if let Some(dir) = cli.state_dir {
        cfg = cfg.with_state_dir(dir);
    }

    match cli.command {
        Commands::Run {
            workers,
            sample,
            no_reviews,
            sink,
            rps,
        } => {
            if let Some(n) = workers {
                cfg.workers = n;
            }
            if sample.is_some() {
                cfg.sample = sample;
            }
            if no_reviews {
                cfg.reviews.enabled = false;
            }
            if let Some(kind) = sink {
                cfg.sink = SinkConfig::from_kind(&kind)?;
            }
            if let Some(rps) = rps {
                cfg.rate_limit.requests_per_second = rps;
            }
            cfg.validate()?;
            env::preflight_check("harvest", &[], SNAPSHOT_KEYS)?;

            let throttle = RequestThrottle::new(cfg.rate_limit);
            let api = Arc::new(SteamClient::new(&cfg, throttle)?);
            let sink = open_sink(&cfg).await?;
            let summary = Harvester::new(cfg, api, sink).run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status { with_catalog } => {
            cfg.validate()?;
            let tracker = ProgressTracker::load(cfg.completed_path(), cfg.failed_path(), cfg.batch_flush)?;
            let (store_exists, stats) = match open_existing_sink(&cfg).await? {
                Some(sink) => (true, sink.stats().await?),
                None => (false, SinkStats::default()),
            };
            let mut report = serde_json::json!({
                "state_dir": cfg.state_dir.display().to_string(),
                "sink": cfg.sink.kind(),
                "store_exists": store_exists,
                "completed": tracker.completed_count(),
                "failed": tracker.failed_count(),
                "stored_details": stats.details,
                "stored_reviews": stats.reviews,
            });
            if with_catalog {
                let client = SteamClient::new(&cfg, RequestThrottle::new(cfg.rate_limit))?;
                let catalog = client.app_list().await.context("catalog unavailable")?;
                report["catalog"] = catalog.len().into();
                report["remaining"] = tracker.remaining(&catalog).len().into();
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ResetFailed { ids } => {
            let mut tracker = ProgressTracker::load(cfg.completed_path(), cfg.failed_path(), cfg.batch_flush)?;
            let cleared = tracker.clear_failed(&ids);
            tracker.flush()?;
            info!(
                cleared,
                remaining_failed = tracker.failed_count(),
                "reset-failed: done"
            );
        }
    }
    Ok(())
}
