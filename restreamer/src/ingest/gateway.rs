//! Ingest session gateway.
//!
//! Admission control for the RTMP sessions delivered by the hosting
//! media-server runtime. The gateway implements [`SessionHooks`]; the
//! runtime calls each hook and must honor the returned decision before
//! letting a session proceed.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::database::repositories::StreamRepository;
use crate::domain::StreamState;
use crate::events::{HubEvent, HubEventBroadcaster};

use super::path::extract_routing_key;
use super::session::SessionRegistry;

/// Accept/reject decision for connect and publish hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Decision for playback hooks. On accept the session must be served from
/// `play_path` instead of the path it requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayDecision {
    Accept { play_path: String },
    Reject,
}

/// Session lifecycle hooks the hosting media server invokes.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn on_pre_connect(&self, session_id: &str, app: Option<&str>) -> Admission;
    async fn on_pre_publish(&self, session_id: &str, path: &str) -> Admission;
    async fn on_post_publish(&self, session_id: &str, path: &str) -> Admission;
    async fn on_done_publish(&self, session_id: &str, path: &str);
    async fn on_pre_play(
        &self,
        session_id: &str,
        path: &str,
        params: &HashMap<String, String>,
        peer: IpAddr,
    ) -> PlayDecision;
}

/// The gateway: resolves routing keys against stream state and tracks the
/// publisher session per stream.
pub struct IngestGateway {
    repo: Arc<dyn StreamRepository>,
    sessions: Arc<SessionRegistry>,
    events: HubEventBroadcaster,
    config: IngestConfig,
    /// Startup gate: connections are refused until the lifecycle manager has
    /// finished recovery.
    accepting: AtomicBool,
}

impl IngestGateway {
    pub fn new(
        repo: Arc<dyn StreamRepository>,
        sessions: Arc<SessionRegistry>,
        events: HubEventBroadcaster,
        config: IngestConfig,
    ) -> Self {
        Self {
            repo,
            sessions,
            events,
            config,
            accepting: AtomicBool::new(false),
        }
    }

    /// Open or close the front door.
    pub fn set_accepting(&self, enabled: bool) {
        self.accepting.store(enabled, Ordering::SeqCst);
        info!(enabled = enabled, "Ingest gateway accept state changed");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Resolve a publish path to a stream currently in `Waiting`.
    ///
    /// This is the primary admission check; any failure is a rejection, not
    /// an error.
    async fn resolve_waiting_stream(&self, path: &str) -> Option<crate::domain::Stream> {
        let key = extract_routing_key(path, &self.config.mount_root)?;

        let stream = match self.repo.find_stream_by_api_key(key).await {
            Ok(found) => found?,
            Err(e) => {
                warn!(error = %e, "Stream lookup failed during admission");
                return None;
            }
        };

        if stream.state != StreamState::Waiting {
            debug!(
                stream_id = %stream.id,
                state = %stream.state,
                "Rejected publish: stream is not waiting"
            );
            return None;
        }

        Some(stream)
    }
}

#[async_trait]
impl SessionHooks for IngestGateway {
    async fn on_pre_connect(&self, session_id: &str, app: Option<&str>) -> Admission {
        if !self.is_accepting() {
            debug!(session_id = %session_id, "Rejected connect: gateway not accepting");
            return Admission::Reject;
        }

        match app {
            Some(app) if !app.is_empty() => Admission::Accept,
            _ => {
                debug!(session_id = %session_id, "Rejected connect: no application given");
                Admission::Reject
            }
        }
    }

    async fn on_pre_publish(&self, session_id: &str, path: &str) -> Admission {
        match self.resolve_waiting_stream(path).await {
            Some(stream) => {
                debug!(
                    session_id = %session_id,
                    stream_id = %stream.id,
                    "Publish admitted"
                );
                Admission::Accept
            }
            None => Admission::Reject,
        }
    }

    async fn on_post_publish(&self, session_id: &str, path: &str) -> Admission {
        // Re-validate: the hosting library may reach this hook even for a
        // session that was already rejected in pre-publish.
        let Some(stream) = self.resolve_waiting_stream(path).await else {
            return Admission::Reject;
        };

        self.sessions.register(&stream.id, session_id);
        info!(stream_id = %stream.id, session_id = %session_id, "Publisher confirmed, data flowing");

        self.events.publish(HubEvent::IngestStarted {
            stream_id: stream.id.clone(),
            api_key: stream.api_key.clone(),
            timestamp: Utc::now(),
        });

        Admission::Accept
    }

    async fn on_done_publish(&self, _session_id: &str, path: &str) {
        let Some(key) = extract_routing_key(path, &self.config.mount_root) else {
            return;
        };

        let stream = match self.repo.find_stream_by_api_key(key).await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                debug!("Done-publish for unknown routing key");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Stream lookup failed in done-publish");
                return;
            }
        };

        self.sessions.remove(&stream.id);
        info!(stream_id = %stream.id, "Publisher disconnected");

        self.events.publish(HubEvent::IngestStopped {
            stream_id: stream.id,
            timestamp: Utc::now(),
        });
    }

    async fn on_pre_play(
        &self,
        session_id: &str,
        path: &str,
        params: &HashMap<String, String>,
        peer: IpAddr,
    ) -> PlayDecision {
        // Internal consumers (relays, thumbnailers) pull over loopback and
        // are trusted as-is.
        if peer.is_loopback() {
            return PlayDecision::Accept {
                play_path: path.to_string(),
            };
        }

        let Some(stream_id) = extract_routing_key(path, &self.config.watch_root) else {
            debug!(session_id = %session_id, "Rejected play: bad watch path");
            return PlayDecision::Reject;
        };

        let secret_ok = !self.config.playback_secret.is_empty()
            && params.get("secret").map(String::as_str) == Some(self.config.playback_secret.as_str());
        if !secret_ok {
            warn!(session_id = %session_id, "Rejected play: missing or wrong secret");
            return PlayDecision::Reject;
        }

        let stream = match self.repo.get_stream(stream_id).await {
            Ok(stream) => stream,
            Err(_) => {
                debug!(session_id = %session_id, "Rejected play: unknown stream");
                return PlayDecision::Reject;
            }
        };

        if stream.state != StreamState::Live {
            debug!(
                session_id = %session_id,
                stream_id = %stream.id,
                "Rejected play: stream is not live"
            );
            return PlayDecision::Reject;
        }

        // Viewers are redirected to the internal feed; the raw ingest
        // credential never appears in anything they requested.
        PlayDecision::Accept {
            play_path: format!("{}/{}", self.config.mount_root, stream.api_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxStreamRepository;
    use crate::domain::{Destination, Platform, Stream};
    use crate::ingest::NoopSessionTerminator;
    use crate::testing::memory_pool;
    use std::net::Ipv4Addr;

    async fn setup(stream_state: StreamState) -> (IngestGateway, Stream) {
        let pool = memory_pool().await;
        let repo = Arc::new(SqlxStreamRepository::new(pool));

        let mut stream = Stream::new("gated");
        stream.state = stream_state;
        stream
            .destinations
            .push(Destination::new(Platform::Twitch, "rtmp://live.twitch.tv/app", "key"));
        repo.create_stream(&stream).await.unwrap();

        let mut config = IngestConfig::default();
        config.playback_secret = "hunter2".to_string();

        let gateway = IngestGateway::new(
            repo,
            Arc::new(SessionRegistry::new(Arc::new(NoopSessionTerminator))),
            HubEventBroadcaster::new(),
            config,
        );
        gateway.set_accepting(true);
        (gateway, stream)
    }

    fn remote_peer() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))
    }

    fn loopback_peer() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn test_pre_connect_requires_accepting_and_app() {
        let (gateway, _) = setup(StreamState::Waiting).await;

        assert_eq!(gateway.on_pre_connect("s1", Some("ingest")).await, Admission::Accept);
        assert_eq!(gateway.on_pre_connect("s1", None).await, Admission::Reject);
        assert_eq!(gateway.on_pre_connect("s1", Some("")).await, Admission::Reject);

        gateway.set_accepting(false);
        assert_eq!(gateway.on_pre_connect("s1", Some("ingest")).await, Admission::Reject);
    }

    #[tokio::test]
    async fn test_pre_publish_admits_waiting_stream() {
        let (gateway, stream) = setup(StreamState::Waiting).await;
        let path = format!("/ingest/{}", stream.api_key);
        assert_eq!(gateway.on_pre_publish("s1", &path).await, Admission::Accept);
    }

    #[tokio::test]
    async fn test_pre_publish_rejects_non_waiting_stream() {
        let (gateway, stream) = setup(StreamState::Stopped).await;
        let path = format!("/ingest/{}", stream.api_key);
        assert_eq!(gateway.on_pre_publish("s1", &path).await, Admission::Reject);
    }

    #[tokio::test]
    async fn test_pre_publish_rejects_unknown_key_and_bad_root() {
        let (gateway, stream) = setup(StreamState::Waiting).await;

        assert_eq!(
            gateway.on_pre_publish("s1", "/ingest/not-a-key").await,
            Admission::Reject
        );
        let wrong_root = format!("/other/{}", stream.api_key);
        assert_eq!(gateway.on_pre_publish("s1", &wrong_root).await, Admission::Reject);
        assert_eq!(gateway.on_pre_publish("s1", "/ingest/").await, Admission::Reject);
    }

    #[tokio::test]
    async fn test_post_publish_registers_session_and_emits() {
        let (gateway, stream) = setup(StreamState::Waiting).await;
        let mut events = gateway.events.subscribe();
        let path = format!("/ingest/{}", stream.api_key);

        assert_eq!(gateway.on_post_publish("session-1", &path).await, Admission::Accept);
        assert_eq!(
            gateway.sessions.session_for(&stream.id).as_deref(),
            Some("session-1")
        );

        match events.try_recv().unwrap() {
            HubEvent::IngestStarted { stream_id, api_key, .. } => {
                assert_eq!(stream_id, stream.id);
                assert_eq!(api_key, stream.api_key);
            }
            other => panic!("expected IngestStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_done_publish_clears_session_and_emits() {
        let (gateway, stream) = setup(StreamState::Waiting).await;
        let path = format!("/ingest/{}", stream.api_key);
        gateway.on_post_publish("session-1", &path).await;

        let mut events = gateway.events.subscribe();
        gateway.on_done_publish("session-1", &path).await;

        assert!(gateway.sessions.session_for(&stream.id).is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            HubEvent::IngestStopped { .. }
        ));
    }

    #[tokio::test]
    async fn test_done_publish_unknown_key_is_noop() {
        let (gateway, _) = setup(StreamState::Waiting).await;
        let mut events = gateway.events.subscribe();
        gateway.on_done_publish("session-1", "/ingest/unknown").await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pre_play_loopback_bypasses_checks() {
        let (gateway, _) = setup(StreamState::Stopped).await;
        let decision = gateway
            .on_pre_play("s1", "/ingest/whatever", &HashMap::new(), loopback_peer())
            .await;
        assert_eq!(
            decision,
            PlayDecision::Accept {
                play_path: "/ingest/whatever".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_pre_play_requires_secret() {
        let (gateway, stream) = setup(StreamState::Live).await;
        let path = format!("/watch/{}", stream.id);

        let decision = gateway
            .on_pre_play("s1", &path, &HashMap::new(), remote_peer())
            .await;
        assert_eq!(decision, PlayDecision::Reject);

        let mut params = HashMap::new();
        params.insert("secret".to_string(), "wrong".to_string());
        let decision = gateway.on_pre_play("s1", &path, &params, remote_peer()).await;
        assert_eq!(decision, PlayDecision::Reject);
    }

    #[tokio::test]
    async fn test_pre_play_rewrites_to_internal_feed() {
        let (gateway, stream) = setup(StreamState::Live).await;
        let path = format!("/watch/{}", stream.id);
        let mut params = HashMap::new();
        params.insert("secret".to_string(), "hunter2".to_string());

        let decision = gateway.on_pre_play("s1", &path, &params, remote_peer()).await;
        assert_eq!(
            decision,
            PlayDecision::Accept {
                play_path: format!("/ingest/{}", stream.api_key)
            }
        );
    }

    #[tokio::test]
    async fn test_pre_play_rejects_non_live_stream() {
        let (gateway, stream) = setup(StreamState::Waiting).await;
        let path = format!("/watch/{}", stream.id);
        let mut params = HashMap::new();
        params.insert("secret".to_string(), "hunter2".to_string());

        let decision = gateway.on_pre_play("s1", &path, &params, remote_peer()).await;
        assert_eq!(decision, PlayDecision::Reject);
    }
}
