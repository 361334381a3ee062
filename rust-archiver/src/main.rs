use rust_archiver::{ArchiveService, ArchiverConfig, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ArchiverConfig::from_env_or_default();
    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        download_dir = %config.download_dir.display(),
        "Starting rust-archiver"
    );

    let service = ArchiveService::new(config).await?;
    logging_config.start_retention_cleanup(service.cancellation_token());
    service.start();

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    service.shutdown().await;

    Ok(())
}
