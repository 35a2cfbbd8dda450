//! Service container for dependency injection.
//!
//! The ServiceContainer builds every service with its collaborators, wires
//! the event subscriptions between them, and manages startup recovery and
//! graceful shutdown.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SqlxStreamRepository, StreamRepository};
use crate::events::{HubEvent, HubEventBroadcaster};
use crate::ingest::{IngestGateway, NoopSessionTerminator, SessionRegistry, SessionTerminator};
use crate::manager::StreamManager;
use crate::relay::{FfmpegLauncher, RelayLauncher, RelaySupervisor};
use crate::thumbnail::ThumbnailService;

/// Default event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Application configuration.
    pub config: AppConfig,
    /// Event broadcaster shared between services.
    pub events: HubEventBroadcaster,
    /// Publisher session registry.
    pub sessions: Arc<SessionRegistry>,
    /// Ingest admission gateway.
    pub gateway: Arc<IngestGateway>,
    /// Relay process supervisor.
    pub supervisor: Arc<RelaySupervisor>,
    /// Stream lifecycle manager.
    pub manager: Arc<StreamManager>,
    /// Thumbnail generator.
    pub thumbnails: Arc<ThumbnailService>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a container with the default ffmpeg launcher and no attached
    /// media-server runtime.
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let launcher = Arc::new(FfmpegLauncher::new(config.relay.ffmpeg_binary.clone()));
        Self::with_collaborators(pool, config, launcher, Arc::new(NoopSessionTerminator))
    }

    /// Create a container with explicit process and session collaborators.
    pub fn with_collaborators(
        pool: SqlitePool,
        config: AppConfig,
        launcher: Arc<dyn RelayLauncher>,
        terminator: Arc<dyn SessionTerminator>,
    ) -> Self {
        info!("Initializing service container");

        let repo: Arc<dyn StreamRepository> = Arc::new(SqlxStreamRepository::new(pool.clone()));
        let events = HubEventBroadcaster::with_capacity(DEFAULT_EVENT_CAPACITY);
        let sessions = Arc::new(SessionRegistry::new(terminator));

        let gateway = Arc::new(IngestGateway::new(
            repo.clone(),
            sessions.clone(),
            events.clone(),
            config.ingest.clone(),
        ));

        let supervisor = Arc::new(RelaySupervisor::new(
            launcher,
            repo.clone(),
            events.clone(),
            config.relay.clone(),
            config.ingest.clone(),
        ));

        let manager = Arc::new(StreamManager::new(
            repo,
            supervisor.clone(),
            sessions.clone(),
            config.relay.clone(),
        ));

        let thumbnails = Arc::new(ThumbnailService::new(
            config.thumbnail.clone(),
            config.ingest.clone(),
            config.relay.ffmpeg_binary.clone(),
        ));

        info!("Service container initialized");

        Self {
            pool,
            config,
            events,
            sessions,
            gateway,
            supervisor,
            manager,
            thumbnails,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Run startup recovery and start the event loops.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        let recovered = self.manager.recover_on_startup().await?;
        if recovered > 0 {
            info!("Forced {} streams back to stopped state", recovered);
        }

        self.setup_event_subscriptions();
        self.thumbnails
            .start(self.events.subscribe(), self.cancellation_token.clone());

        // Only now is the front door opened.
        self.gateway.set_accepting(true);

        info!("Services initialized");
        Ok(())
    }

    /// Route hub events into the lifecycle manager.
    fn setup_event_subscriptions(&self) {
        let manager = self.manager.clone();
        let mut receiver = self.events.subscribe();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Hub event handler shutting down");
                        break;
                    }
                    result = receiver.recv() => {
                        match result {
                            Ok(event) => manager.handle_event(event).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Hub event handler lagged, skipped {} events", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down services");

        self.gateway.set_accepting(false);
        self.cancellation_token.cancel();

        let stopped = self.manager.stop_all_streams().await.unwrap_or_else(|e| {
            warn!("Error stopping streams during shutdown: {}", e);
            0
        });
        info!("Stopped {} running streams", stopped);

        // The stream stops above already tore relays down; clear leftovers.
        self.supervisor.stop_all().await;
        self.thumbnails.shutdown().await;

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Subscribe to hub events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }
}
