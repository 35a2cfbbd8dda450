//! Publisher session tracking.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

/// Hook back into the hosting media server to drop a session.
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    async fn terminate(&self, session_id: &str);
}

/// Terminator that does nothing. Used until a media-server runtime is
/// attached, and in tests.
pub struct NoopSessionTerminator;

#[async_trait]
impl SessionTerminator for NoopSessionTerminator {
    async fn terminate(&self, session_id: &str) {
        debug!(session_id = %session_id, "No session terminator attached");
    }
}

/// Maps each stream to its active publisher session.
///
/// Written only by the ingest gateway's publish hooks; read by the lifecycle
/// manager when a stream is stopped administratively.
pub struct SessionRegistry {
    sessions: DashMap<String, String>,
    terminator: Arc<dyn SessionTerminator>,
}

impl SessionRegistry {
    pub fn new(terminator: Arc<dyn SessionTerminator>) -> Self {
        Self {
            sessions: DashMap::new(),
            terminator,
        }
    }

    /// Record the active publisher session for a stream.
    pub fn register(&self, stream_id: &str, session_id: &str) {
        if let Some(previous) = self
            .sessions
            .insert(stream_id.to_string(), session_id.to_string())
        {
            warn!(
                stream_id = %stream_id,
                previous_session = %previous,
                "Replacing an existing publisher session mapping"
            );
        }
    }

    /// Drop the mapping for a stream, if any.
    pub fn remove(&self, stream_id: &str) -> Option<String> {
        self.sessions.remove(stream_id).map(|(_, session)| session)
    }

    /// Look up the active session for a stream.
    pub fn session_for(&self, stream_id: &str) -> Option<String> {
        self.sessions.get(stream_id).map(|entry| entry.clone())
    }

    /// Forcibly terminate the publisher of a stream, if one is connected.
    pub async fn kick(&self, stream_id: &str) {
        if let Some(session_id) = self.remove(stream_id) {
            debug!(stream_id = %stream_id, session_id = %session_id, "Kicking publisher session");
            self.terminator.terminate(&session_id).await;
        }
    }

    /// Number of active publisher sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
