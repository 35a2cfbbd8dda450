//! Integration tests for the restreaming hub.
//!
//! These run the real service container against an in-memory SQLite
//! database, with relay processes played back by the scripted launcher
//! instead of ffmpeg.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use restreamer::Error;
use restreamer::config::AppConfig;
use restreamer::domain::{Destination, DestinationState, Platform, StreamState};
use restreamer::ingest::{Admission, NoopSessionTerminator, SessionHooks, SessionTerminator};
use restreamer::services::ServiceContainer;
use restreamer::testing::{ProcessScript, ScriptedLauncher, memory_pool};

/// Container wired with a scripted launcher and test-friendly timings.
async fn setup(launcher: Arc<ScriptedLauncher>) -> ServiceContainer {
    setup_with_terminator(launcher, Arc::new(NoopSessionTerminator)).await
}

async fn setup_with_terminator(
    launcher: Arc<ScriptedLauncher>,
    terminator: Arc<dyn SessionTerminator>,
) -> ServiceContainer {
    let pool = memory_pool().await;

    let mut config = AppConfig::default();
    config.relay.max_restarts = 2;
    config.relay.restart_base_delay = Duration::from_millis(10);
    config.relay.settle_delay = Duration::from_millis(10);
    config.thumbnail.enabled = false;

    let container = ServiceContainer::with_collaborators(pool, config, launcher, terminator);
    container.initialize().await.expect("container init failed");
    container
}

fn test_destination() -> Destination {
    Destination::new(Platform::CustomRtmp, "rtmp://example.com/live", "secret-key")
}

/// Poll until `condition` holds or a couple of seconds pass.
async fn wait_until<F>(mut condition: F, what: &str)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Drive a stream through start + publisher confirmation.
async fn go_live(container: &ServiceContainer, stream_id: &str) {
    container.manager.start_stream(stream_id).await.unwrap();

    let stream = container.manager.get_stream(stream_id).await.unwrap();
    let path = format!("/ingest/{}", stream.api_key);
    assert_eq!(
        container.gateway.on_post_publish("session-1", &path).await,
        Admission::Accept
    );

    let manager = &container.manager;
    wait_until(
        async || {
            manager.get_stream(stream_id).await.unwrap().state == StreamState::Live
        },
        "stream to go live",
    )
    .await;
}

#[tokio::test]
async fn test_stop_is_idempotent_from_stopped() {
    let container = setup(ScriptedLauncher::new(ProcessScript::healthy())).await;
    let stream = container.manager.create_stream("idle").await.unwrap();

    let result = container.manager.stop_stream(&stream.id).await.unwrap();
    assert_eq!(result.state, StreamState::Stopped);

    let again = container.manager.stop_stream(&stream.id).await.unwrap();
    assert_eq!(again.state, StreamState::Stopped);
}

#[tokio::test]
async fn test_start_requires_stopped_state() {
    let container = setup(ScriptedLauncher::new(ProcessScript::healthy())).await;
    let stream = container.manager.create_stream("armed").await.unwrap();

    container.manager.start_stream(&stream.id).await.unwrap();

    let err = container.manager.start_stream(&stream.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let stream = container.manager.get_stream(&stream.id).await.unwrap();
    assert_eq!(stream.state, StreamState::Waiting);
}

#[tokio::test]
async fn test_destination_changes_require_stopped_stream() {
    let container = setup(ScriptedLauncher::new(ProcessScript::healthy())).await;
    let stream = container.manager.create_stream("locked").await.unwrap();
    let stream = container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();
    let dest_id = stream.destinations[0].id.clone();

    container.manager.start_stream(&stream.id).await.unwrap();

    let err = container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let err = container
        .manager
        .remove_destination(&stream.id, &dest_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let unchanged = container.manager.get_stream(&stream.id).await.unwrap();
    assert_eq!(unchanged.destinations.len(), 1);
    assert_eq!(unchanged.destinations[0].id, dest_id);
}

#[tokio::test]
async fn test_add_then_remove_round_trips() {
    let container = setup(ScriptedLauncher::new(ProcessScript::healthy())).await;
    let stream = container.manager.create_stream("round trip").await.unwrap();

    let with_dest = container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();
    assert_eq!(with_dest.destinations.len(), 1);

    let after = container
        .manager
        .remove_destination(&stream.id, &with_dest.destinations[0].id)
        .await
        .unwrap();
    assert!(after.destinations.is_empty());
}

#[tokio::test]
async fn test_publish_confirmation_starts_one_relay_per_enabled_destination() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("fan out").await.unwrap();
    container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();
    let mut disabled = test_destination();
    disabled.enabled = false;
    container
        .manager
        .add_destination(&stream.id, disabled)
        .await
        .unwrap();

    go_live(&container, &stream.id).await;

    wait_until(
        async || launcher.launch_count() == 1,
        "exactly one relay launch",
    )
    .await;
    assert_eq!(container.supervisor.active_count(), 1);

    // The relay reads the internal feed and writes to the destination.
    let args = launcher.recorded_args();
    let live = container.manager.get_stream(&stream.id).await.unwrap();
    assert!(args[0].iter().any(|a| a.contains(&live.api_key)));
    assert_eq!(args[0].last().unwrap(), "rtmp://example.com/live/secret-key");

    container.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publisher_disconnect_returns_stream_to_waiting() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("bounce").await.unwrap();
    container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();

    go_live(&container, &stream.id).await;
    let live = container.manager.get_stream(&stream.id).await.unwrap();

    let path = format!("/ingest/{}", live.api_key);
    container.gateway.on_done_publish("session-1", &path).await;

    let manager = &container.manager;
    wait_until(
        async || manager.get_stream(&stream.id).await.unwrap().state == StreamState::Waiting,
        "stream back to waiting",
    )
    .await;

    let supervisor = &container.supervisor;
    wait_until(
        async || supervisor.active_count() == 0,
        "relays torn down",
    )
    .await;

    let after = container.manager.get_stream(&stream.id).await.unwrap();
    assert_eq!(after.destinations[0].state, DestinationState::Disconnected);

    // Ready for a reconnect without operator action.
    assert_eq!(
        container.gateway.on_pre_publish("session-2", &path).await,
        Admission::Accept
    );
}

#[tokio::test]
async fn test_crashing_relay_is_restarted_then_gives_up() {
    let launcher = ScriptedLauncher::new(ProcessScript::crash(1));
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("crashy").await.unwrap();
    container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();

    go_live(&container, &stream.id).await;

    // Initial attempt + 2 restarts, then the supervisor gives up.
    wait_until(async || launcher.launch_count() == 3, "three launches").await;

    let manager = &container.manager;
    let stream_id = stream.id.clone();
    wait_until(
        async || {
            let stream = manager.get_stream(&stream_id).await.unwrap();
            stream.destinations[0].state == DestinationState::Disconnected
                && stream.destinations[0].last_error.is_some()
        },
        "destination to carry the terminal error",
    )
    .await;

    // No further automatic attempts.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.launch_count(), 3);
    assert_eq!(container.supervisor.active_count(), 0);

    // The stream itself stays live; only the destination failed.
    let stream = container.manager.get_stream(&stream.id).await.unwrap();
    assert_eq!(stream.state, StreamState::Live);
}

#[tokio::test]
async fn test_stop_wins_over_crash_restart() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    launcher.push_script(ProcessScript::crash(1));
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("raced").await.unwrap();
    container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();

    go_live(&container, &stream.id).await;
    wait_until(async || launcher.launch_count() >= 1, "first launch").await;

    // The crash is in flight; stop the stream while the supervisor is
    // deciding/backing off.
    let stopped = container.manager.stop_stream(&stream.id).await.unwrap();
    assert_eq!(stopped.state, StreamState::Stopped);

    // After stop() has returned, no relay process may be running, and no
    // late respawn may appear either.
    assert_eq!(container.supervisor.active_count(), 0);
    let launches = launcher.launch_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.launch_count(), launches);
}

#[tokio::test]
async fn test_restart_destination_requires_live_stream() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("cold").await.unwrap();
    let stream = container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();

    let err = container
        .manager
        .restart_destination(&stream.id, &stream.destinations[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn test_restart_destination_replaces_relay() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup(launcher.clone()).await;

    let stream = container.manager.create_stream("kicked").await.unwrap();
    let stream = container
        .manager
        .add_destination(&stream.id, test_destination())
        .await
        .unwrap();
    let dest_id = stream.destinations[0].id.clone();

    go_live(&container, &stream.id).await;
    wait_until(async || launcher.launch_count() == 1, "initial relay").await;

    container
        .manager
        .restart_destination(&stream.id, &dest_id)
        .await
        .unwrap();

    wait_until(async || launcher.launch_count() == 2, "replacement relay").await;
    assert!(container.supervisor.is_relay_running(&stream.id, &dest_id));

    container.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_kicks_publisher_session() {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder(AtomicUsize);

    #[async_trait]
    impl SessionTerminator for Recorder {
        async fn terminate(&self, _session_id: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let terminator = Arc::new(Recorder(AtomicUsize::new(0)));
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup_with_terminator(launcher, terminator.clone()).await;

    let stream = container.manager.create_stream("kickable").await.unwrap();
    go_live(&container, &stream.id).await;

    container.manager.stop_stream(&stream.id).await.unwrap();
    assert_eq!(terminator.0.load(Ordering::SeqCst), 1);

    // A stopped stream no longer admits its publisher.
    let stream = container.manager.get_stream(&stream.id).await.unwrap();
    let path = format!("/ingest/{}", stream.api_key);
    assert_eq!(
        container.gateway.on_pre_publish("session-3", &path).await,
        Admission::Reject
    );
}

#[tokio::test]
async fn test_recovery_forces_streams_back_to_stopped() {
    let pool = memory_pool().await;
    let mut config = AppConfig::default();
    config.thumbnail.enabled = false;

    // Simulate a previous run that died while a stream was live.
    {
        let repo = restreamer::database::repositories::SqlxStreamRepository::new(pool.clone());
        use restreamer::database::repositories::StreamRepository;
        let mut stream = restreamer::domain::Stream::new("survivor");
        stream.state = StreamState::Live;
        repo.create_stream(&stream).await.unwrap();
    }

    let container = ServiceContainer::with_collaborators(
        pool,
        config,
        ScriptedLauncher::new(ProcessScript::healthy()),
        Arc::new(NoopSessionTerminator),
    );
    container.initialize().await.unwrap();

    let streams = container.manager.list_streams().await.unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].state, StreamState::Stopped);
}

#[tokio::test]
async fn test_external_play_rejected_without_configured_secret() {
    let launcher = ScriptedLauncher::new(ProcessScript::healthy());
    let container = setup(launcher).await;

    let stream = container.manager.create_stream("watched").await.unwrap();
    go_live(&container, &stream.id).await;

    // External viewers need the shared secret; with the default empty
    // secret config, everything external is rejected.
    let decision = container
        .gateway
        .on_pre_play(
            "viewer-1",
            &format!("/watch/{}", stream.id),
            &HashMap::new(),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
        )
        .await;
    assert_eq!(decision, restreamer::ingest::PlayDecision::Reject);
}
