//! Relay destination entity.

use serde::{Deserialize, Serialize};

use super::DestinationState;

/// External platforms a stream can be relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Twitch,
    Facebook,
    CustomRtmp,
}

impl Platform {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Twitch => "twitch",
            Self::Facebook => "facebook",
            Self::CustomRtmp => "custom_rtmp",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "youtube" => Some(Self::Youtube),
            "twitch" => Some(Self::Twitch),
            "facebook" => Some(Self::Facebook),
            "custom_rtmp" => Some(Self::CustomRtmp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured relay target belonging to a single stream.
///
/// `id` is unique within the owning stream only. The `stream_key` is a
/// secret and must never appear in logs; `Debug` redacts it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub platform: Platform,
    pub server_url: String,
    pub stream_key: String,
    pub state: DestinationState,
    pub enabled: bool,
    pub last_error: Option<String>,
    /// Extra transcoder flags, whitespace-tokenized. Values containing
    /// spaces are not supported.
    pub ffmpeg_flags: Option<String>,
}

impl Destination {
    /// Create a new destination in its default state.
    pub fn new(platform: Platform, server_url: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            server_url: server_url.into(),
            stream_key: stream_key.into(),
            state: DestinationState::Disconnected,
            enabled: true,
            last_error: None,
            ffmpeg_flags: None,
        }
    }

    /// The full RTMP publish target, `server_url/stream_key`.
    pub fn output_url(&self) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), self.stream_key)
    }

    /// Reset runtime state back to default.
    pub fn reset(&mut self) {
        self.state = DestinationState::Disconnected;
        self.last_error = None;
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("server_url", &self.server_url)
            .field("stream_key", &"<redacted>")
            .field("state", &self.state)
            .field("enabled", &self.enabled)
            .field("last_error", &self.last_error)
            .field("ffmpeg_flags", &self.ffmpeg_flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_destination() {
        let dest = Destination::new(Platform::Twitch, "rtmp://live.twitch.tv/app", "key-123");
        assert_eq!(dest.state, DestinationState::Disconnected);
        assert!(dest.enabled);
        assert!(dest.last_error.is_none());
    }

    #[test]
    fn test_output_url() {
        let dest = Destination::new(Platform::Youtube, "rtmp://a.rtmp.youtube.com/live2/", "abcd");
        assert_eq!(dest.output_url(), "rtmp://a.rtmp.youtube.com/live2/abcd");
    }

    #[test]
    fn test_debug_redacts_stream_key() {
        let dest = Destination::new(Platform::Youtube, "rtmp://a.rtmp.youtube.com/live2", "secret");
        let rendered = format!("{:?}", dest);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_reset() {
        let mut dest = Destination::new(Platform::CustomRtmp, "rtmp://example.com/live", "k");
        dest.state = DestinationState::Live;
        dest.last_error = Some("broken pipe".to_string());
        dest.reset();
        assert_eq!(dest.state, DestinationState::Disconnected);
        assert!(dest.last_error.is_none());
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("twitch"), Some(Platform::Twitch));
        assert_eq!(Platform::parse("custom_rtmp"), Some(Platform::CustomRtmp));
        assert_eq!(Platform::parse("dailymotion"), None);
    }
}
