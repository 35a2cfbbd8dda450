//! Stream entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamState;
use crate::Error;
use crate::domain::Destination;

/// A stream instance: one ingest endpoint fanned out to its destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    /// Secret publish credential, embedded in the ingest URL path.
    /// Generated once at creation and never regenerated.
    pub api_key: String,
    pub state: StreamState,
    pub last_error: Option<String>,
    /// Extra transcoder flags applied to every destination's relay.
    pub ffmpeg_flags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub destinations: Vec<Destination>,
}

impl Stream {
    /// Create a new stream with a freshly generated api key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            api_key: generate_api_key(),
            state: StreamState::Stopped,
            last_error: None,
            ffmpeg_flags: None,
            created_at: Utc::now(),
            started_at: None,
            destinations: Vec::new(),
        }
    }

    /// Arm the stream for ingest (`start` command).
    ///
    /// Resets every destination to its default state.
    pub fn begin_waiting(&mut self) -> Result<(), Error> {
        if self.state != StreamState::Stopped {
            return Err(Error::invalid_state("start stream", self.state.as_str()));
        }
        self.state = self.state.transition_to(StreamState::Waiting)?;
        self.last_error = None;
        for dest in &mut self.destinations {
            dest.reset();
        }
        Ok(())
    }

    /// The publisher has been confirmed by the ingest gateway.
    pub fn go_live(&mut self) -> Result<(), Error> {
        self.state = self.state.transition_to(StreamState::Live)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// The publisher disconnected; return to the reconnectable state.
    pub fn publish_ended(&mut self) -> Result<(), Error> {
        self.state = self.state.transition_to(StreamState::Waiting)?;
        self.started_at = None;
        for dest in &mut self.destinations {
            dest.state = crate::domain::DestinationState::Disconnected;
        }
        Ok(())
    }

    /// Stop the stream (`stop` command). Valid from any state.
    pub fn stop(&mut self) {
        self.state = StreamState::Stopped;
        self.started_at = None;
        for dest in &mut self.destinations {
            dest.state = crate::domain::DestinationState::Disconnected;
        }
    }

    /// Look up a destination by id.
    pub fn destination(&self, destination_id: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.id == destination_id)
    }

    /// Look up a destination by id, mutably.
    pub fn destination_mut(&mut self, destination_id: &str) -> Option<&mut Destination> {
        self.destinations.iter_mut().find(|d| d.id == destination_id)
    }

    /// Destinations a `Live` transition should spawn relays for.
    pub fn enabled_destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().filter(|d| d.enabled)
    }
}

/// Generate a random 32-byte hex api key.
///
/// Hex keeps the key free of `/`, which would break ingest path routing.
pub fn generate_api_key() -> String {
    use rand::RngExt;
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}
