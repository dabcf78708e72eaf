use std::sync::Arc;

use bath_core::{BathConfig, Dataset};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use bath_server::http::{start_http_server, HttpState};
use bath_server::subsystems::embedder::LazyEmbedder;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "bath.toml")]
    config: String,

    /// Load and validate config and dataset, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match BathConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging: RUST_LOG wins, otherwise [service] log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Load dataset
    let dataset_path = config.dataset.resolved_path();
    let dataset = match Dataset::load(&dataset_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to load dataset from {}: {}", dataset_path.display(), e);
            std::process::exit(1);
        }
    };

    let embedder = LazyEmbedder::from_config(&config);
    if let Err(e) = dataset.ensure_compatible(embedder.model(), embedder.dimensions()) {
        eprintln!("Dataset does not match the configured embedder: {}", e);
        std::process::exit(1);
    }

    if args.check {
        println!(
            "✅ Dataset OK: {} images, {} ({}-dim)",
            dataset.len(),
            dataset.model,
            dataset.dimensions
        );
        return Ok(());
    }

    let embedder = Arc::new(embedder);

    if config.embedding.preload {
        let preload = Arc::clone(&embedder);
        tokio::spawn(async move {
            if let Err(e) = preload.get().await {
                tracing::warn!("Embedder preload failed, will retry on first query: {}", e);
            }
        });
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
        }
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState {
        dataset: Arc::new(dataset),
        embedder,
        config,
    });

    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
