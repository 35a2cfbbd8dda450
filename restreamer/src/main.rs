use std::sync::Arc;
use std::time::Instant;

use restreamer::api::{ApiServerConfig, AppState, run_server};
use restreamer::config::AppConfig;
use restreamer::database;
use restreamer::relay::FfmpegLauncher;
use restreamer::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    restreamer::logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let api_config = ApiServerConfig::from_env_or_default();

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:restreamer.db?mode=rwc".to_string());
    let pool = database::init_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    // The relay supervisor is useless without a working ffmpeg.
    let launcher = Arc::new(FfmpegLauncher::new(config.relay.ffmpeg_binary.clone()));
    match launcher.version() {
        Some(version) => tracing::info!("Using {}", version),
        None => anyhow::bail!(
            "ffmpeg binary '{}' is not installed or not accessible",
            config.relay.ffmpeg_binary
        ),
    }

    let container = Arc::new(ServiceContainer::with_collaborators(
        pool,
        config,
        launcher,
        Arc::new(restreamer::ingest::NoopSessionTerminator),
    ));
    container.initialize().await?;

    let state = AppState {
        start_time: Instant::now(),
        manager: container.manager.clone(),
        supervisor: container.supervisor.clone(),
        thumbnails: container.thumbnails.clone(),
        ingest: container.config.ingest.clone(),
    };

    let cancellation_token = container.cancellation_token();
    let server = tokio::spawn(run_server(api_config, state, cancellation_token.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    cancellation_token.cancel();
    server.await??;
    container.shutdown().await?;

    Ok(())
}
