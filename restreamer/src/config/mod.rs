//! Application configuration.
//!
//! All settings come from environment variables (loaded from `.env` via
//! dotenvy in `main`), falling back to defaults suitable for local use.

use std::time::Duration;

/// Ingest (RTMP front door) configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Port the hosting RTMP media server listens on.
    pub rtmp_port: u16,
    /// Public base URL shown to stream owners, e.g. `rtmp://example.com:1935`.
    pub public_url: String,
    /// Mount root under which publishers push, e.g. `/ingest`.
    pub mount_root: String,
    /// Mount root under which external viewers request playback, e.g. `/watch`.
    pub watch_root: String,
    /// Shared secret required from non-loopback playback sessions.
    pub playback_secret: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rtmp_port: 1935,
            public_url: "rtmp://127.0.0.1:1935".to_string(),
            mount_root: "/ingest".to_string(),
            watch_root: "/watch".to_string(),
            playback_secret: String::new(),
        }
    }
}

impl IngestConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars: `RTMP_PORT`, `RTMP_PUBLIC_URL`, `RTMP_MOUNT_ROOT`,
    /// `RTMP_WATCH_ROOT`, `RTMP_PLAYBACK_SECRET`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("RTMP_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.rtmp_port = parsed;
        }

        if let Ok(url) = std::env::var("RTMP_PUBLIC_URL")
            && !url.trim().is_empty()
        {
            config.public_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(root) = std::env::var("RTMP_MOUNT_ROOT")
            && !root.trim().is_empty()
        {
            config.mount_root = normalize_mount_root(&root);
        }

        if let Ok(root) = std::env::var("RTMP_WATCH_ROOT")
            && !root.trim().is_empty()
        {
            config.watch_root = normalize_mount_root(&root);
        }

        if let Ok(secret) = std::env::var("RTMP_PLAYBACK_SECRET") {
            config.playback_secret = secret;
        }

        config
    }

    /// The ingest URL a publisher for `api_key` should push to.
    pub fn public_ingest_url(&self, api_key: &str) -> String {
        format!("{}{}/{}", self.public_url, self.mount_root, api_key)
    }

    /// The loopback URL relays and thumbnailers read the feed from.
    pub fn internal_ingest_url(&self, api_key: &str) -> String {
        format!(
            "rtmp://127.0.0.1:{}{}/{}",
            self.rtmp_port, self.mount_root, api_key
        )
    }
}

/// Relay supervisor configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// ffmpeg binary path.
    pub ffmpeg_binary: String,
    /// Maximum automatic restarts per relay after a crash.
    pub max_restarts: u32,
    /// Base backoff delay; doubles with each restart.
    pub restart_base_delay: Duration,
    /// Delay between stop and start in a forced destination restart.
    pub settle_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            max_restarts: 3,
            restart_base_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl RelayConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars: `FFMPEG_BINARY`, `RELAY_MAX_RESTARTS`,
    /// `RELAY_RESTART_BASE_DELAY_MS`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(binary) = std::env::var("FFMPEG_BINARY")
            && !binary.trim().is_empty()
        {
            config.ffmpeg_binary = binary;
        }

        if let Ok(max) = std::env::var("RELAY_MAX_RESTARTS")
            && let Ok(parsed) = max.parse::<u32>()
        {
            config.max_restarts = parsed;
        }

        if let Ok(delay) = std::env::var("RELAY_RESTART_BASE_DELAY_MS")
            && let Ok(parsed) = delay.parse::<u64>()
        {
            config.restart_base_delay = Duration::from_millis(parsed);
        }

        config
    }
}

/// Thumbnail generator configuration.
#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    /// Disable the generator entirely.
    pub enabled: bool,
    /// Directory snapshots are written to.
    pub dir: String,
    /// Seconds between snapshot updates.
    pub interval_secs: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "./thumbnails".to_string(),
            interval_secs: 2,
        }
    }
}

impl ThumbnailConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars: `THUMBNAILS_DISABLED`, `THUMBNAILS_DIR`,
    /// `THUMBNAILS_INTERVAL_SECS`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(disabled) = std::env::var("THUMBNAILS_DISABLED") {
            config.enabled = !matches!(disabled.as_str(), "1" | "true" | "yes");
        }

        if let Ok(dir) = std::env::var("THUMBNAILS_DIR")
            && !dir.trim().is_empty()
        {
            config.dir = dir;
        }

        if let Ok(interval) = std::env::var("THUMBNAILS_INTERVAL_SECS")
            && let Ok(parsed) = interval.parse::<u32>()
        {
            config.interval_secs = parsed.max(1);
        }

        config
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub relay: RelayConfig,
    pub thumbnail: ThumbnailConfig,
}

impl AppConfig {
    /// Load the full configuration from the environment.
    pub fn from_env_or_default() -> Self {
        Self {
            ingest: IngestConfig::from_env_or_default(),
            relay: RelayConfig::from_env_or_default(),
            thumbnail: ThumbnailConfig::from_env_or_default(),
        }
    }
}

/// Ensure a mount root has exactly one leading and no trailing slash.
fn normalize_mount_root(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    format!("/{}", trimmed)
}
