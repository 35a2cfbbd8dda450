//! Stream lifecycle manager.
//!
//! The single authority over stream and destination state. Commands from
//! the API, session events from the ingest gateway, and process events from
//! the relay supervisor all funnel through here; each one runs inside the
//! owning stream's lock and persists before the lock is released.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::database::repositories::StreamRepository;
use crate::domain::{Destination, DestinationState, Stream, StreamState};
use crate::events::HubEvent;
use crate::ingest::SessionRegistry;
use crate::relay::RelaySupervisor;
use crate::{Error, Result};

use super::locks::StreamLocks;

/// Stream lifecycle manager.
pub struct StreamManager {
    repo: Arc<dyn StreamRepository>,
    supervisor: Arc<RelaySupervisor>,
    sessions: Arc<SessionRegistry>,
    locks: StreamLocks,
    relay_config: RelayConfig,
}

impl StreamManager {
    pub fn new(
        repo: Arc<dyn StreamRepository>,
        supervisor: Arc<RelaySupervisor>,
        sessions: Arc<SessionRegistry>,
        relay_config: RelayConfig,
    ) -> Self {
        Self {
            repo,
            supervisor,
            sessions,
            locks: StreamLocks::new(),
            relay_config,
        }
    }

    // ========== Stream CRUD ==========

    /// Create a new stream with a unique api key.
    pub async fn create_stream(&self, name: &str) -> Result<Stream> {
        if name.trim().is_empty() {
            return Err(Error::validation("stream name cannot be empty"));
        }

        let mut stream = Stream::new(name.trim());
        // The api key must be globally unique; regenerate on collision.
        while self.repo.find_stream_by_api_key(&stream.api_key).await?.is_some() {
            stream.api_key = crate::domain::generate_api_key();
        }

        self.repo.create_stream(&stream).await?;
        info!(stream_id = %stream.id, name = %stream.name, "Created stream");
        Ok(stream)
    }

    pub async fn get_stream(&self, id: &str) -> Result<Stream> {
        self.repo.get_stream(id).await
    }

    pub async fn list_streams(&self) -> Result<Vec<Stream>> {
        self.repo.list_streams().await
    }

    /// Update mutable stream settings. Requires the stream to be stopped.
    pub async fn update_stream(
        &self,
        id: &str,
        name: Option<String>,
        ffmpeg_flags: Option<Option<String>>,
    ) -> Result<Stream> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(id).await?;
        if stream.state != StreamState::Stopped {
            return Err(Error::invalid_state("update stream", stream.state.as_str()));
        }

        if let Some(new_name) = name {
            if new_name.trim().is_empty() {
                return Err(Error::validation("stream name cannot be empty"));
            }
            stream.name = new_name.trim().to_string();
        }
        if let Some(new_flags) = ffmpeg_flags {
            stream.ffmpeg_flags = new_flags;
        }

        self.repo.update_stream(&stream).await?;
        Ok(stream)
    }

    /// Delete a stream. Requires the stream to be stopped.
    pub async fn delete_stream(&self, id: &str) -> Result<()> {
        {
            let lock = self.locks.lock_for(id);
            let _guard = lock.lock().await;

            let stream = self.repo.get_stream(id).await?;
            if stream.state != StreamState::Stopped {
                return Err(Error::invalid_state("delete stream", stream.state.as_str()));
            }

            self.repo.delete_stream(id).await?;
            info!(stream_id = %id, "Deleted stream");
        }
        self.locks.remove(id);
        Ok(())
    }

    // ========== Destination CRUD ==========

    /// Add a destination. Requires the stream to be stopped.
    pub async fn add_destination(&self, stream_id: &str, destination: Destination) -> Result<Stream> {
        validate_destination(&destination)?;

        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Stopped {
            return Err(Error::invalid_state(
                "add destination",
                stream.state.as_str(),
            ));
        }

        stream.destinations.push(destination);
        self.repo.update_stream(&stream).await?;
        Ok(stream)
    }

    /// Update a destination. Requires the stream to be stopped.
    pub async fn update_destination(
        &self,
        stream_id: &str,
        destination_id: &str,
        update: DestinationUpdate,
    ) -> Result<Stream> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Stopped {
            return Err(Error::invalid_state(
                "update destination",
                stream.state.as_str(),
            ));
        }

        let dest = stream
            .destination_mut(destination_id)
            .ok_or_else(|| Error::not_found("Destination", destination_id))?;

        if let Some(platform) = update.platform {
            dest.platform = platform;
        }
        if let Some(server_url) = update.server_url {
            dest.server_url = server_url;
        }
        if let Some(stream_key) = update.stream_key {
            dest.stream_key = stream_key;
        }
        if let Some(enabled) = update.enabled {
            dest.enabled = enabled;
        }
        if let Some(ffmpeg_flags) = update.ffmpeg_flags {
            dest.ffmpeg_flags = ffmpeg_flags;
        }
        validate_destination(dest)?;

        self.repo.update_stream(&stream).await?;
        Ok(stream)
    }

    /// Remove a destination. Requires the stream to be stopped.
    pub async fn remove_destination(&self, stream_id: &str, destination_id: &str) -> Result<Stream> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Stopped {
            return Err(Error::invalid_state(
                "remove destination",
                stream.state.as_str(),
            ));
        }

        let before = stream.destinations.len();
        stream.destinations.retain(|d| d.id != destination_id);
        if stream.destinations.len() == before {
            return Err(Error::not_found("Destination", destination_id));
        }

        self.repo.update_stream(&stream).await?;
        Ok(stream)
    }

    // ========== Lifecycle commands ==========

    /// Arm a stream for ingest.
    pub async fn start_stream(&self, id: &str) -> Result<Stream> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(id).await?;
        stream.begin_waiting()?;
        self.repo.update_stream(&stream).await?;

        info!(stream_id = %id, "Stream armed, waiting for publisher");
        Ok(stream)
    }

    /// Stop a stream. A no-op (not an error) when already stopped.
    ///
    /// By the time this returns, the publisher session has been kicked and
    /// no relay process of the stream is running.
    pub async fn stop_stream(&self, id: &str) -> Result<Stream> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(id).await?;
        if stream.state == StreamState::Stopped {
            return Ok(stream);
        }

        stream.stop();
        // Persist first so the gateway stops admitting the key before the
        // publisher is kicked.
        self.repo.update_stream(&stream).await?;

        self.sessions.kick(id).await;
        self.supervisor.stop_stream_relays(id).await;

        info!(stream_id = %id, "Stream stopped");
        Ok(stream)
    }

    /// Forcibly restart the relay of one destination of a live stream.
    pub async fn restart_destination(&self, stream_id: &str, destination_id: &str) -> Result<()> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Live {
            return Err(Error::invalid_state(
                "restart destination",
                stream.state.as_str(),
            ));
        }
        let destination = stream
            .destination(destination_id)
            .ok_or_else(|| Error::not_found("Destination", destination_id))?;
        if !destination.enabled {
            return Err(Error::validation("destination is disabled"));
        }

        info!(stream_id = %stream_id, destination_id = %destination_id, "Forced relay restart");
        self.supervisor.stop_relay(stream_id, destination_id).await;

        tokio::time::sleep(self.relay_config.settle_delay).await;

        // Re-validate after the wait: a crash-recovery respawn or a state
        // change may have beaten us here.
        let stream = self.repo.get_stream(stream_id).await?;
        let Some(destination) = stream.destination(destination_id) else {
            return Err(Error::not_found("Destination", destination_id));
        };
        if stream.state != StreamState::Live || !destination.enabled {
            debug!(
                stream_id = %stream_id,
                destination_id = %destination_id,
                "Skipping relay restart: stream no longer eligible"
            );
            return Ok(());
        }
        if self.supervisor.is_relay_running(stream_id, destination_id) {
            debug!(
                stream_id = %stream_id,
                destination_id = %destination_id,
                "Skipping relay restart: another path already started it"
            );
            return Ok(());
        }

        self.supervisor.start_relay(&stream, destination);
        Ok(())
    }

    // ========== Event handling ==========

    /// Apply a hub event. Called from the container's event loop.
    pub async fn handle_event(&self, event: HubEvent) {
        let result = match &event {
            HubEvent::IngestStarted { stream_id, .. } => self.on_ingest_started(stream_id).await,
            HubEvent::IngestStopped { stream_id, .. } => self.on_ingest_stopped(stream_id).await,
            HubEvent::RelayStarted {
                stream_id,
                destination_id,
                ..
            } => {
                self.apply_destination_state(stream_id, destination_id, DestinationState::Connecting, None)
                    .await
            }
            HubEvent::RelayRunning {
                stream_id,
                destination_id,
                ..
            } => {
                self.apply_destination_state(stream_id, destination_id, DestinationState::Live, None)
                    .await
            }
            HubEvent::RelayStopped {
                stream_id,
                destination_id,
                error,
                ..
            } => {
                self.apply_destination_state(
                    stream_id,
                    destination_id,
                    DestinationState::Disconnected,
                    error.as_deref(),
                )
                .await
            }
            HubEvent::RelayError {
                stream_id,
                destination_id,
                message,
                ..
            } => self.record_destination_error(stream_id, destination_id, message).await,
        };

        if let Err(e) = result {
            warn!(event = %event.description(), "Failed to apply hub event: {}", e);
        }
    }

    /// The gateway confirmed a publisher; promote Waiting -> Live and fan
    /// out relays.
    async fn on_ingest_started(&self, stream_id: &str) -> Result<()> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Waiting {
            // The gateway validated this before data flowed; a stop command
            // can still have won the race.
            warn!(
                stream_id = %stream_id,
                state = %stream.state,
                "Ignoring publish confirmation in unexpected state"
            );
            return Ok(());
        }

        stream.go_live()?;
        // Only the stream row changed; destinations were already reset when
        // the stream was armed.
        self.repo
            .update_stream_state(stream_id, stream.state, stream.started_at)
            .await?;
        info!(stream_id = %stream_id, "Stream is live");

        // No relay of this stream may exist at this point; clear stragglers
        // before fanning out.
        self.supervisor.stop_stream_relays(stream_id).await;

        let mut started = 0usize;
        for destination in stream.enabled_destinations() {
            if self.supervisor.start_relay(&stream, destination) {
                started += 1;
            }
        }
        info!(
            stream_id = %stream_id,
            started = started,
            total = stream.destinations.len(),
            "Relays started"
        );
        Ok(())
    }

    /// The publisher went away; stop relays and return to Waiting.
    async fn on_ingest_stopped(&self, stream_id: &str) -> Result<()> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let mut stream = self.repo.get_stream(stream_id).await?;
        if stream.state != StreamState::Live {
            // Normal when the stream was stopped administratively first.
            debug!(
                stream_id = %stream_id,
                state = %stream.state,
                "Ignoring publish end in non-live state"
            );
            return Ok(());
        }

        self.supervisor.stop_stream_relays(stream_id).await;

        stream.publish_ended()?;
        self.repo.update_stream(&stream).await?;
        info!(stream_id = %stream_id, "Publisher gone, stream back to waiting");
        Ok(())
    }

    /// Persist a destination state reported by the relay supervisor.
    async fn apply_destination_state(
        &self,
        stream_id: &str,
        destination_id: &str,
        state: DestinationState,
        error: Option<&str>,
    ) -> Result<()> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let stream = match self.repo.get_stream(stream_id).await {
            Ok(stream) => stream,
            // The stream may have been deleted while its last events were
            // still in flight.
            Err(Error::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        // Active destination states only make sense while the stream is
        // live; late events after a stop must not resurrect them.
        if state.is_active() && stream.state != StreamState::Live {
            debug!(
                stream_id = %stream_id,
                destination_id = %destination_id,
                "Dropping stale relay state update"
            );
            return Ok(());
        }

        let current_error = stream
            .destination(destination_id)
            .and_then(|d| d.last_error.clone());
        // A terminal relay error sticks; a plain disconnect keeps whatever
        // was recorded before.
        let recorded_error = error.map(str::to_string).or(current_error);

        match self
            .repo
            .update_destination_state(stream_id, destination_id, state, recorded_error.as_deref())
            .await
        {
            Ok(()) | Err(Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Record a relay error without changing the destination state.
    async fn record_destination_error(
        &self,
        stream_id: &str,
        destination_id: &str,
        message: &str,
    ) -> Result<()> {
        let lock = self.locks.lock_for(stream_id);
        let _guard = lock.lock().await;

        let stream = match self.repo.get_stream(stream_id).await {
            Ok(stream) => stream,
            Err(Error::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(destination) = stream.destination(destination_id) else {
            return Ok(());
        };

        self.repo
            .update_destination_state(stream_id, destination_id, destination.state, Some(message))
            .await
    }

    // ========== Startup / shutdown ==========

    /// Force every stream that survived a previous run back to Stopped.
    ///
    /// A publisher session cannot outlive the process, so rearming streams
    /// automatically would silently reopen ingest; operators restart
    /// explicitly.
    pub async fn recover_on_startup(&self) -> Result<usize> {
        let streams = self.repo.list_streams().await?;
        let mut recovered = 0usize;

        for mut stream in streams {
            if stream.state == StreamState::Stopped {
                continue;
            }
            let lock = self.locks.lock_for(&stream.id);
            let _guard = lock.lock().await;

            warn!(
                stream_id = %stream.id,
                state = %stream.state,
                "Forcing stream back to stopped after restart"
            );
            stream.stop();
            self.repo.update_stream(&stream).await?;
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Stop every running stream. Used at shutdown.
    pub async fn stop_all_streams(&self) -> Result<usize> {
        let streams = self.repo.list_streams().await?;
        let mut stopped = 0usize;
        for stream in streams {
            if stream.state == StreamState::Stopped {
                continue;
            }
            self.stop_stream(&stream.id).await?;
            stopped += 1;
        }
        Ok(stopped)
    }
}

/// Partial update of a destination.
#[derive(Debug, Clone, Default)]
pub struct DestinationUpdate {
    pub platform: Option<crate::domain::Platform>,
    pub server_url: Option<String>,
    pub stream_key: Option<String>,
    pub enabled: Option<bool>,
    /// `Some(None)` clears the flags.
    pub ffmpeg_flags: Option<Option<String>>,
}

fn validate_destination(destination: &Destination) -> Result<()> {
    if destination.server_url.trim().is_empty() {
        return Err(Error::validation("destination server_url cannot be empty"));
    }
    if !destination.server_url.starts_with("rtmp://") && !destination.server_url.starts_with("rtmps://") {
        return Err(Error::validation(
            "destination server_url must be an rtmp:// or rtmps:// URL",
        ));
    }
    if destination.stream_key.trim().is_empty() {
        return Err(Error::validation("destination stream_key cannot be empty"));
    }
    Ok(())
}
