use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gemvision::{
    config::Config,
    images::ImageFetcher,
    pipeline::{BatchOrchestrator, RunOptions},
    storage::SqliteStorage,
    vision::VisionClient,
};

/// Analyze gemstone inventory photos with a vision model.
#[derive(Debug, Parser)]
#[command(name = "gemvision", version, about)]
struct Cli {
    /// Maximum number of items to process
    #[arg(long)]
    limit: Option<u32>,

    /// Explicit item ids to target (comma-separated)
    #[arg(long, value_delimiter = ',')]
    items: Option<Vec<i64>>,

    /// Wipe prior analysis results for the targets first (irreversible)
    #[arg(long)]
    clear: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.vision.model,
        "Gemvision batch analyzer starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize the image fetcher and vision client
    let fetcher = match ImageFetcher::new(&config.request) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "Failed to initialize image fetcher");
            return Err(e.into());
        }
    };
    let vision = match VisionClient::new(&config.vision, &config.request) {
        Ok(c) => {
            info!(base_url = %config.vision.base_url, "Vision client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize vision client");
            return Err(e.into());
        }
    };

    let orchestrator = BatchOrchestrator::new(storage, fetcher, vision, config.policy.clone());

    let options = RunOptions {
        limit: cli.limit,
        item_ids: cli.items,
        clear: cli.clear,
    };

    let stats = match orchestrator.run(options).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Batch run error");
            return Err(e.into());
        }
    };

    println!("{stats}");

    // Failed items are reported, not fatal; the exit code reflects whether
    // the batch itself ran.
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        gemvision::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        gemvision::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
