//! Destination database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{Destination, DestinationState, Platform};
use crate::{Error, Result};

/// Row of the `destinations` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DestinationDbModel {
    pub id: String,
    pub stream_id: String,
    /// Ordering of the destination within its stream.
    pub position: i64,
    pub platform: String,
    pub server_url: String,
    pub stream_key: String,
    /// Current runtime state (DISCONNECTED, CONNECTING, LIVE).
    pub state: String,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub ffmpeg_flags: Option<String>,
}

impl DestinationDbModel {
    /// Build a row from a domain destination and its list position.
    pub fn from_domain(stream_id: &str, position: usize, dest: &Destination) -> Self {
        Self {
            id: dest.id.clone(),
            stream_id: stream_id.to_string(),
            position: position as i64,
            platform: dest.platform.as_str().to_string(),
            server_url: dest.server_url.clone(),
            stream_key: dest.stream_key.clone(),
            state: dest.state.as_str().to_string(),
            enabled: dest.enabled,
            last_error: dest.last_error.clone(),
            ffmpeg_flags: dest.ffmpeg_flags.clone(),
        }
    }

    /// Convert this row into a domain destination.
    pub fn into_domain(self) -> Result<Destination> {
        let platform = Platform::parse(&self.platform)
            .ok_or_else(|| Error::Other(format!("unknown platform '{}'", self.platform)))?;
        let state = DestinationState::parse(&self.state)
            .ok_or_else(|| Error::Other(format!("unknown destination state '{}'", self.state)))?;

        Ok(Destination {
            id: self.id,
            platform,
            server_url: self.server_url,
            stream_key: self.stream_key,
            state,
            enabled: self.enabled,
            last_error: self.last_error,
            ffmpeg_flags: self.ffmpeg_flags,
        })
    }
}
