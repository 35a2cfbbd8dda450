//! Relay process supervisor.
//!
//! Owns one transcoding process per active (stream, destination) pair:
//! spawns them, watches their diagnostic output, restarts crashed ones with
//! bounded exponential backoff, and tears them down on demand. State
//! consequences are published as [`HubEvent`]s; the lifecycle manager is the
//! one that persists them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, RelayConfig};
use crate::database::repositories::StreamRepository;
use crate::database::time;
use crate::domain::{Destination, Stream, StreamState};
use crate::events::{HubEvent, HubEventBroadcaster};

use super::command::build_relay_args;
use super::launcher::RelayLauncher;

/// stderr fragments that mark a failing relay.
const ERROR_MARKERS: [&str; 5] = ["Error", "error", "Invalid", "Unable to", "Failed"];

/// stderr fragment that promotes a relay from connecting to running.
const RUNNING_MARKER: &str = "Stream mapping:";

/// stderr fragment of ffmpeg's periodic progress line.
const PROGRESS_MARKER: &str = "frame=";

/// Composite key of a relay process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayKey {
    pub stream_id: String,
    pub destination_id: String,
}

impl RelayKey {
    pub fn new(stream_id: impl Into<String>, destination_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            destination_id: destination_id.into(),
        }
    }
}

impl std::fmt::Display for RelayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stream_id, self.destination_id)
    }
}

/// Runtime bookkeeping for one relay.
struct RelayHandle {
    started_at: DateTime<Utc>,
    /// Restarts consumed since the relay last reached running.
    restart_count: AtomicU32,
    /// Set once a stop was requested; checked before every kill/respawn so
    /// concurrent stop calls and crash recovery cannot double-fire.
    is_exiting: AtomicBool,
    cancel: CancellationToken,
    /// Epoch ms of the last progress line seen.
    last_heartbeat: AtomicI64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RelayHandle {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            restart_count: AtomicU32::new(0),
            is_exiting: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            last_heartbeat: AtomicI64::new(0),
            monitor: Mutex::new(None),
        }
    }

    fn is_exiting(&self) -> bool {
        self.is_exiting.load(Ordering::SeqCst)
    }

    fn touch_heartbeat(&self) {
        self.last_heartbeat.store(time::now_ms(), Ordering::Relaxed);
    }
}

/// Point-in-time view of a running relay, for the API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelayStatus {
    pub started_at: DateTime<Utc>,
    pub restart_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// The relay process supervisor.
pub struct RelaySupervisor {
    launcher: Arc<dyn RelayLauncher>,
    repo: Arc<dyn StreamRepository>,
    events: HubEventBroadcaster,
    relay_config: RelayConfig,
    ingest_config: IngestConfig,
    relays: Arc<DashMap<RelayKey, Arc<RelayHandle>>>,
}

impl RelaySupervisor {
    pub fn new(
        launcher: Arc<dyn RelayLauncher>,
        repo: Arc<dyn StreamRepository>,
        events: HubEventBroadcaster,
        relay_config: RelayConfig,
        ingest_config: IngestConfig,
    ) -> Self {
        Self {
            launcher,
            repo,
            events,
            relay_config,
            ingest_config,
            relays: Arc::new(DashMap::new()),
        }
    }

    /// Start a relay for one destination of a stream.
    ///
    /// Refuses (returns false) when a relay already exists for the pair.
    pub fn start_relay(&self, stream: &Stream, destination: &Destination) -> bool {
        let key = RelayKey::new(&stream.id, &destination.id);

        let handle = Arc::new(RelayHandle::new());
        match self.relays.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(relay = %key, "Refusing to start relay: process already exists");
                return false;
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(handle.clone());
            }
        }

        let input_url = self.ingest_config.internal_ingest_url(&stream.api_key);
        let args = build_relay_args(&input_url, stream, destination);
        info!(relay = %key, platform = %destination.platform, "Starting relay");

        let runtime = MonitorContext {
            launcher: self.launcher.clone(),
            repo: self.repo.clone(),
            events: self.events.clone(),
            relays: self.relays.clone(),
            config: self.relay_config.clone(),
        };
        let monitor_handle = handle.clone();
        let monitor_key = key.clone();
        let join = tokio::spawn(async move {
            runtime.run(monitor_key, monitor_handle, args).await;
        });
        *handle.monitor.lock() = Some(join);

        true
    }

    /// Stop the relay for one destination.
    ///
    /// Idempotent; returns once the process is fully gone, so a stream stop
    /// that calls this cannot leave a process behind.
    pub async fn stop_relay(&self, stream_id: &str, destination_id: &str) {
        let key = RelayKey::new(stream_id, destination_id);
        let Some((_, handle)) = self.relays.remove(&key) else {
            return;
        };

        if handle.is_exiting.swap(true, Ordering::SeqCst) {
            // Another caller is already tearing this relay down.
            return;
        }

        debug!(relay = %key, "Stopping relay");
        handle.cancel.cancel();

        let join = handle.monitor.lock().take();
        if let Some(join) = join
            && let Err(e) = join.await
        {
            warn!(relay = %key, "Relay monitor task panicked: {}", e);
        }
    }

    /// Stop every relay belonging to a stream.
    pub async fn stop_stream_relays(&self, stream_id: &str) {
        let keys: Vec<RelayKey> = self
            .relays
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.stream_id == stream_id)
            .collect();

        for key in keys {
            self.stop_relay(&key.stream_id, &key.destination_id).await;
        }
    }

    /// Stop everything. Used on shutdown.
    pub async fn stop_all(&self) {
        let keys: Vec<RelayKey> = self.relays.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.stop_relay(&key.stream_id, &key.destination_id).await;
        }
    }

    /// Whether a relay process exists for the pair.
    pub fn is_relay_running(&self, stream_id: &str, destination_id: &str) -> bool {
        self.relays
            .contains_key(&RelayKey::new(stream_id, destination_id))
    }

    /// Number of live relay handles.
    pub fn active_count(&self) -> usize {
        self.relays.len()
    }

    /// Status of a running relay, if any.
    pub fn relay_status(&self, stream_id: &str, destination_id: &str) -> Option<RelayStatus> {
        let key = RelayKey::new(stream_id, destination_id);
        self.relays.get(&key).map(|handle| {
            let heartbeat = handle.last_heartbeat.load(Ordering::Relaxed);
            RelayStatus {
                started_at: handle.started_at,
                restart_count: handle.restart_count.load(Ordering::SeqCst),
                last_heartbeat: (heartbeat > 0).then(|| time::from_ms(heartbeat)),
            }
        })
    }
}

/// Everything a monitor task needs, detached from the supervisor itself.
struct MonitorContext {
    launcher: Arc<dyn RelayLauncher>,
    repo: Arc<dyn StreamRepository>,
    events: HubEventBroadcaster,
    relays: Arc<DashMap<RelayKey, Arc<RelayHandle>>>,
    config: RelayConfig,
}

impl MonitorContext {
    /// Drive one relay through spawn, output watching, and crash recovery
    /// until it is no longer wanted or out of retries.
    async fn run(&self, key: RelayKey, handle: Arc<RelayHandle>, args: Vec<String>) {
        let mut terminal_error: Option<String> = None;

        loop {
            // The world may have changed during a backoff wait; check again
            // immediately before spawning.
            if handle.is_exiting() || handle.cancel.is_cancelled() {
                break;
            }

            let outcome = match self.launcher.launch(&args).await {
                Ok(child) => {
                    self.events.publish(HubEvent::RelayStarted {
                        stream_id: key.stream_id.clone(),
                        destination_id: key.destination_id.clone(),
                        timestamp: Utc::now(),
                    });
                    self.watch_process(&key, &handle, child).await
                }
                Err(e) => {
                    warn!(relay = %key, "Failed to spawn relay: {}", e);
                    ProcessOutcome::Crashed {
                        error: e.to_string(),
                    }
                }
            };

            match outcome {
                ProcessOutcome::Finished => break,
                ProcessOutcome::Crashed { error } => {
                    if handle.is_exiting() || handle.cancel.is_cancelled() {
                        break;
                    }
                    if !self.is_relay_wanted(&key).await {
                        debug!(relay = %key, "Relay no longer wanted, not restarting");
                        break;
                    }

                    let restarts = handle.restart_count.load(Ordering::SeqCst);
                    if restarts >= self.config.max_restarts {
                        warn!(
                            relay = %key,
                            restarts = restarts,
                            "Relay retries exhausted: {}",
                            error
                        );
                        terminal_error = Some(error);
                        break;
                    }

                    let delay = self.config.restart_base_delay * 2u32.pow(restarts);
                    handle.restart_count.store(restarts + 1, Ordering::SeqCst);
                    warn!(
                        relay = %key,
                        attempt = restarts + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Relay crashed, scheduling restart: {}",
                        error
                    );

                    tokio::select! {
                        _ = handle.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // Remove our own map entry unless a stop call already took it.
        self.relays
            .remove_if(&key, |_, entry| Arc::ptr_eq(entry, &handle));

        self.events.publish(HubEvent::RelayStopped {
            stream_id: key.stream_id.clone(),
            destination_id: key.destination_id.clone(),
            error: terminal_error,
            timestamp: Utc::now(),
        });
        info!(relay = %key, "Relay finished");
    }

    /// Watch a spawned process until it exits or is cancelled.
    async fn watch_process(
        &self,
        key: &RelayKey,
        handle: &Arc<RelayHandle>,
        mut child: super::launcher::RelayChild,
    ) -> ProcessOutcome {
        let mut running = false;
        let mut last_error: Option<String> = None;

        loop {
            tokio::select! {
                _ = handle.cancel.cancelled() => {
                    child.kill.cancel();
                    break;
                }
                line = child.stderr.recv() => {
                    match line {
                        Some(line) => {
                            if ERROR_MARKERS.iter().any(|marker| line.contains(marker)) {
                                debug!(relay = %key, "Relay error output: {}", line);
                                last_error = Some(line.clone());
                                self.events.publish(HubEvent::RelayError {
                                    stream_id: key.stream_id.clone(),
                                    destination_id: key.destination_id.clone(),
                                    message: line,
                                    timestamp: Utc::now(),
                                });
                            } else if !running && line.contains(RUNNING_MARKER) {
                                running = true;
                                // A relay that made it to running earns a
                                // fresh retry budget.
                                handle.restart_count.store(0, Ordering::SeqCst);
                                handle.touch_heartbeat();
                                info!(relay = %key, "Relay confirmed running");
                                self.events.publish(HubEvent::RelayRunning {
                                    stream_id: key.stream_id.clone(),
                                    destination_id: key.destination_id.clone(),
                                    timestamp: Utc::now(),
                                });
                            } else if line.contains(PROGRESS_MARKER) {
                                handle.touch_heartbeat();
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Stay responsive to a stop request even while waiting for the exit
        // status to come through.
        let code = tokio::select! {
            code = &mut child.exit => code.unwrap_or(None),
            _ = handle.cancel.cancelled() => {
                child.kill.cancel();
                (&mut child.exit).await.unwrap_or(None)
            }
        };

        if handle.is_exiting() || handle.cancel.is_cancelled() {
            return ProcessOutcome::Finished;
        }

        match code {
            Some(0) => {
                debug!(relay = %key, "Relay process exited cleanly");
                ProcessOutcome::Finished
            }
            other => {
                let error = last_error
                    .unwrap_or_else(|| match other {
                        Some(code) => format!("relay process exited with code {}", code),
                        None => "relay process terminated by signal".to_string(),
                    });
                ProcessOutcome::Crashed { error }
            }
        }
    }

    /// Would the lifecycle manager still want this relay to exist?
    async fn is_relay_wanted(&self, key: &RelayKey) -> bool {
        match self.repo.get_stream(&key.stream_id).await {
            Ok(stream) => {
                stream.state == StreamState::Live
                    && stream
                        .destination(&key.destination_id)
                        .map(|d| d.enabled)
                        .unwrap_or(false)
            }
            Err(e) => {
                warn!(relay = %key, "Stream lookup failed in restart check: {}", e);
                false
            }
        }
    }
}

/// How one spawned process ended.
enum ProcessOutcome {
    /// Clean exit or intentional stop; do not restart.
    Finished,
    /// Abnormal exit; restart policy applies.
    Crashed { error: String },
}
