//! Stream database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;
use crate::domain::{Stream, StreamState};
use crate::{Error, Result};

use super::DestinationDbModel;

/// Row of the `streams` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StreamDbModel {
    pub id: String,
    pub name: String,
    pub api_key: String,
    /// Current lifecycle state (STOPPED, WAITING, LIVE).
    pub state: String,
    pub last_error: Option<String>,
    pub ffmpeg_flags: Option<String>,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) when the current publish began.
    pub started_at: Option<i64>,
    /// Unix epoch milliseconds (UTC) when last updated.
    pub updated_at: i64,
}

impl StreamDbModel {
    /// Build a row from a domain stream (destinations are stored separately).
    pub fn from_domain(stream: &Stream) -> Self {
        Self {
            id: stream.id.clone(),
            name: stream.name.clone(),
            api_key: stream.api_key.clone(),
            state: stream.state.as_str().to_string(),
            last_error: stream.last_error.clone(),
            ffmpeg_flags: stream.ffmpeg_flags.clone(),
            created_at: time::to_ms(stream.created_at),
            started_at: stream.started_at.map(time::to_ms),
            updated_at: time::now_ms(),
        }
    }

    /// Reassemble a domain stream from this row and its destination rows.
    pub fn into_domain(self, destinations: Vec<DestinationDbModel>) -> Result<Stream> {
        let state = StreamState::parse(&self.state)
            .ok_or_else(|| Error::Other(format!("unknown stream state '{}'", self.state)))?;

        let destinations = destinations
            .into_iter()
            .map(DestinationDbModel::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Ok(Stream {
            id: self.id,
            name: self.name,
            api_key: self.api_key,
            state,
            last_error: self.last_error,
            ffmpeg_flags: self.ffmpeg_flags,
            created_at: time::from_ms(self.created_at),
            started_at: self.started_at.map(time::from_ms),
            destinations,
        })
    }
}
