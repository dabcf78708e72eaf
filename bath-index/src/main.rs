use std::path::PathBuf;

use anyhow::Context;
use bath_core::embeddings::{create_backend, BackendConfig};
use bath_core::BathConfig;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use bath_index::{build_dataset, clean, load_catalog};

/// Build the design-image dataset from the curated catalog.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "bath.toml")]
    config: String,

    /// Catalog JSON exported from the curation sheet
    #[arg(long, default_value = "database.json")]
    catalog: PathBuf,

    /// Directory holding `<style>/images/<file>`
    #[arg(long, default_value = "static")]
    image_root: PathBuf,

    /// Output dataset path (defaults to `[dataset] path`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip records whose image file does not exist under `--image-root`
    #[arg(long)]
    require_files: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match BathConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let rows = load_catalog(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    let (entries, report) = clean(rows, &args.image_root, args.require_files);
    tracing::info!(
        total = report.total,
        kept = report.kept,
        malformed = report.malformed,
        missing_fields = report.missing_fields,
        missing_files = report.missing_files,
        duplicates = report.duplicates,
        "Catalog cleaned"
    );

    let backend_config = BackendConfig::from_settings(&config.embedding);
    let backend = tokio::task::spawn_blocking(move || create_backend(backend_config)).await??;
    tracing::info!(backend = backend.name(), model = backend.model(), "Embedding backend ready");

    let dataset = build_dataset(entries, backend.as_ref()).await?;

    let output = args
        .output
        .unwrap_or_else(|| config.dataset.resolved_path());
    dataset
        .save(&output)
        .with_context(|| format!("writing dataset {}", output.display()))?;

    println!(
        "✅ Wrote {} images ({} skipped) to {}",
        dataset.len(),
        report.skipped(),
        output.display()
    );
    Ok(())
}
