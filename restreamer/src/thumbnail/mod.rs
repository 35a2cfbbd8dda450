//! Live thumbnail generation.
//!
//! Peripheral consumer of hub events: while a stream is receiving data, a
//! low-priority ffmpeg process keeps a periodically refreshed PNG snapshot
//! of the feed on disk for the dashboard.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, ThumbnailConfig};
use crate::events::HubEvent;

/// Thumbnail generator service.
pub struct ThumbnailService {
    config: ThumbnailConfig,
    ingest: IngestConfig,
    /// ffmpeg binary, shared with the relay supervisor's configuration.
    binary: String,
    /// Kill token per active snapshot process, keyed by stream id.
    processes: Arc<DashMap<String, CancellationToken>>,
}

impl ThumbnailService {
    pub fn new(config: ThumbnailConfig, ingest: IngestConfig, binary: impl Into<String>) -> Self {
        Self {
            config,
            ingest,
            binary: binary.into(),
            processes: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the event loop driving snapshot processes.
    pub fn start(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<HubEvent>,
        cancellation_token: CancellationToken,
    ) {
        if !self.config.enabled {
            info!("Thumbnail generation disabled");
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Thumbnail event loop shutting down");
                        break;
                    }
                    result = events.recv() => {
                        match result {
                            Ok(HubEvent::IngestStarted { stream_id, api_key, .. }) => {
                                service.start_generation(&stream_id, &api_key).await;
                            }
                            Ok(HubEvent::IngestStopped { stream_id, .. }) => {
                                service.stop_generation(&stream_id).await;
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Thumbnail event loop lagged, skipped {} events", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    /// Read the current snapshot for a stream.
    pub async fn get_thumbnail(&self, stream_id: &str) -> Option<Vec<u8>> {
        if !self.config.enabled {
            return None;
        }
        tokio::fs::read(self.thumbnail_path(stream_id)).await.ok()
    }

    /// Kill every snapshot process. Used at shutdown.
    pub async fn shutdown(&self) {
        let stream_ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for stream_id in stream_ids {
            self.stop_generation(&stream_id).await;
        }
    }

    fn thumbnail_path(&self, stream_id: &str) -> PathBuf {
        PathBuf::from(&self.config.dir).join(format!("{}.png", stream_id))
    }

    async fn start_generation(&self, stream_id: &str, api_key: &str) {
        // Replace any process left over from a previous session.
        self.stop_generation(stream_id).await;

        if let Err(e) = tokio::fs::create_dir_all(&self.config.dir).await {
            warn!(stream_id = %stream_id, "Cannot create thumbnails dir: {}", e);
            return;
        }

        let input_url = self.ingest.internal_ingest_url(api_key);
        let output_path = self.thumbnail_path(stream_id);
        let args = snapshot_args(&input_url, self.config.interval_secs, &output_path);

        let mut child = match Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(stream_id = %stream_id, "Failed to spawn thumbnail process: {}", e);
                return;
            }
        };

        info!(stream_id = %stream_id, "Thumbnail generation started");

        let token = CancellationToken::new();
        self.processes.insert(stream_id.to_string(), token.clone());

        let processes = self.processes.clone();
        let id = stream_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        debug!("Thumbnail process already gone: {}", e);
                    }
                    let _ = child.wait().await;
                }
                status = child.wait() => {
                    debug!("Thumbnail process for {} exited: {:?}", id, status.ok());
                }
            }
            processes.remove(&id);
        });
    }

    async fn stop_generation(&self, stream_id: &str) {
        if let Some((_, token)) = self.processes.remove(stream_id) {
            token.cancel();
            info!(stream_id = %stream_id, "Thumbnail generation stopped");
        }
        // The snapshot is only valid while a publisher is connected.
        let _ = tokio::fs::remove_file(self.thumbnail_path(stream_id)).await;
    }
}

/// ffmpeg arguments producing a continuously updated single-frame snapshot.
fn snapshot_args(input_url: &str, interval_secs: u32, output_path: &std::path::Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input_url.to_string(),
        "-vf".to_string(),
        format!("fps=1/{},scale=-1:320", interval_secs),
        "-an".to_string(),
        "-q:v".to_string(),
        "31".to_string(),
        "-f".to_string(),
        "image2".to_string(),
        "-update".to_string(),
        "1".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}
