//! ferry worker binary entry point.
//!
//! Loads configuration from the environment, connects the shared store and
//! the dataset repository, spins the worker pool, and translates SIGINT
//! into the engine's stop broadcast.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ferry_core::config::Config;
use ferry_core::dataset::HttpDatasetRepository;
use ferry_core::engine::{Engine, Shutdown};
use ferry_core::job::spawn_workers;
use ferry_core::kv::RedisStore;
use ferry_core::plugin::PluginRegistry;
use ferry_core::{init_logging, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "ferry-worker", version, about = "Dataset synchronization workers")]
struct Cli {
    /// Increase verbosity (default info; -v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit structured JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Override the configured worker count.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = init_logging(
        cli.verbose.saturating_add(2),
        cli.log_file.as_deref(),
        format,
    ) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let mut config = Config::from_env();
    if let Some(workers) = cli.workers {
        config.num_workers = workers;
    }
    let num_workers = config.num_workers;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = num_workers,
        driver = config.default_driver.as_str(),
        "ferry-worker starting"
    );

    let store = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "connecting to the shared store failed");
            std::process::exit(1);
        }
    };
    let repo = Arc::new(HttpDatasetRepository::new(
        config.dataset_server.clone(),
        config.unblock_key.clone(),
    ));

    // Deployments register their source plugins here; hash-only jobs need
    // none.
    let plugins = PluginRegistry::new();

    let (handle, shutdown) = Shutdown::new_pair();
    let engine = Arc::new(Engine::new(config, store, repo, plugins, shutdown));

    if num_workers == 0 {
        info!("no workers configured, nothing to do");
        return;
    }
    let pool = spawn_workers(Arc::clone(&engine), num_workers);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received, draining workers");
            handle.stop();
        }
    });

    pool.join().await;
    info!("all workers exited");
}
