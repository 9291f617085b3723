use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use media_vault::{
    config::Config,
    db::Database,
    routes::create_router,
    services::transcode::FfmpegEncoder,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("media-vault v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;

    tokio::fs::create_dir_all(&config.transcode_cache_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", config.transcode_cache_dir.display(), e))?;

    let encoder = Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone(), config.transcode_timeout()));
    let server_address = config.server_address.clone();
    let state = Arc::new(AppState::new(config, db, encoder)?);

    // Surface broken storage configurations at start-up rather than on first request
    match state.storage.get_adapters().await {
        Ok(adapters) => info!("{} storage adapter(s) configured", adapters.len()),
        Err(e) => tracing::warn!("Storage configuration is not usable yet: {}", e),
    }

    let app = create_router(state);

    let listener = TcpListener::bind(&server_address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", server_address, e))?;
    info!("Listening on {}", server_address);

    axum::serve(listener, app).await?;
    Ok(())
}
