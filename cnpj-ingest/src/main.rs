//! cnpj-ingest - CNPJ open-data ingestion service
//!
//! Two modes share one binary:
//! - default: serve the admin API and run ingestion jobs from its queue
//! - `--once`: run the pipeline synchronously for one release and exit

use anyhow::Result;
use clap::Parser;
use cnpj_ingest::api::{self, AppState};
use cnpj_ingest::db::{self, VersionRegistry};
use cnpj_ingest::jobs::UpdateWorker;
use cnpj_ingest::services::Pipeline;
use cnpj_common::Settings;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cnpj-ingest", about = "Receita Federal CNPJ open-data ingestion")]
struct Args {
    /// Run the pipeline once and exit instead of serving the admin API
    #[arg(long)]
    once: bool,

    /// Target release (YYYY-MM); latest when omitted (only with --once)
    #[arg(long)]
    release: Option<String>,

    /// Re-import even if the registry shows the release completed
    #[arg(long)]
    force: bool,

    /// Listen address for the admin API
    #[arg(long, default_value = "0.0.0.0:8080", env = "CNPJ_LISTEN_ADDR")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting cnpj-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Arc::new(Settings::load()?);
    info!(
        data_dir = %settings.data_dir.display(),
        base_url = %settings.download_base_url,
        "Settings loaded"
    );

    let pool = db::connect_with_retry(&settings).await?;
    db::ensure_schema(&pool).await?;

    let pipeline = Arc::new(Pipeline::new(Arc::clone(&settings), pool.clone())?);

    if args.once {
        let release = pipeline.run(args.release.as_deref(), args.force).await?;
        info!(release, "Database updated");
        return Ok(());
    }

    let state = AppState {
        versions: VersionRegistry::new(pool),
        worker: UpdateWorker::spawn(pipeline),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
