//! API request/response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Destination, DestinationState, Platform, Stream, StreamState};
use crate::relay::RelayStatus;

/// Request to create a stream.
#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub name: String,
}

/// Request to update a stream.
#[derive(Debug, Deserialize)]
pub struct UpdateStreamRequest {
    pub name: Option<String>,
    /// Present-but-null clears the flags.
    #[serde(default, with = "double_option")]
    pub ffmpeg_flags: Option<Option<String>>,
}

/// Request to add a destination.
#[derive(Debug, Deserialize)]
pub struct CreateDestinationRequest {
    pub platform: Platform,
    pub server_url: String,
    pub stream_key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub ffmpeg_flags: Option<String>,
}

/// Request to update a destination.
#[derive(Debug, Deserialize)]
pub struct UpdateDestinationRequest {
    pub platform: Option<Platform>,
    pub server_url: Option<String>,
    pub stream_key: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default, with = "double_option")]
    pub ffmpeg_flags: Option<Option<String>>,
}

fn default_true() -> bool {
    true
}

/// Stream representation returned to API clients.
#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub id: String,
    pub name: String,
    pub state: StreamState,
    /// Full ingest URL including the api key; shown to the stream's owner
    /// so they can paste it into their encoder.
    pub ingest_url: String,
    pub last_error: Option<String>,
    pub ffmpeg_flags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub destinations: Vec<DestinationResponse>,
}

impl StreamResponse {
    pub fn from_domain(stream: &Stream, ingest_url: String) -> Self {
        Self {
            id: stream.id.clone(),
            name: stream.name.clone(),
            state: stream.state,
            ingest_url,
            last_error: stream.last_error.clone(),
            ffmpeg_flags: stream.ffmpeg_flags.clone(),
            created_at: stream.created_at,
            started_at: stream.started_at,
            destinations: stream
                .destinations
                .iter()
                .map(DestinationResponse::from_domain)
                .collect(),
        }
    }
}

/// Destination representation returned to API clients.
#[derive(Debug, Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub platform: Platform,
    pub server_url: String,
    /// Masked: only the last four characters of the secret are shown.
    pub stream_key: String,
    pub state: DestinationState,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub ffmpeg_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayStatus>,
}

impl DestinationResponse {
    pub fn from_domain(dest: &Destination) -> Self {
        Self {
            id: dest.id.clone(),
            platform: dest.platform,
            server_url: dest.server_url.clone(),
            stream_key: mask_secret(&dest.stream_key),
            state: dest.state,
            enabled: dest.enabled,
            last_error: dest.last_error.clone(),
            ffmpeg_flags: dest.ffmpeg_flags.clone(),
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Option<RelayStatus>) -> Self {
        self.relay = relay;
        self
    }
}

/// Mask a secret, keeping only the last four characters.
fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &secret[secret.len() - 4..])
    }
}

/// Serde helper distinguishing an absent field from an explicit null.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefgh"), "****efgh");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn test_destination_response_masks_key() {
        let dest = Destination::new(Platform::Twitch, "rtmp://live.twitch.tv/app", "super-secret-key");
        let response = DestinationResponse::from_domain(&dest);
        assert!(!response.stream_key.contains("super-secret"));
        assert!(response.stream_key.ends_with("-key"));
    }
}
