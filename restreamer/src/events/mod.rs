//! Hub events.
//!
//! In-process publish/subscribe decoupling the ingest gateway, the stream
//! lifecycle manager, the relay supervisor, and peripheral consumers such as
//! the thumbnail generator. Delivery is at-most-once per subscriber: a
//! lagging receiver drops the oldest events rather than blocking publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events flowing between the hub's components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HubEvent {
    /// A publisher session was confirmed; data is flowing in.
    IngestStarted {
        stream_id: String,
        api_key: String,
        timestamp: DateTime<Utc>,
    },
    /// The publisher session ended.
    IngestStopped {
        stream_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A relay process was spawned for a destination.
    RelayStarted {
        stream_id: String,
        destination_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The relay process confirmed an active stream mapping.
    RelayRunning {
        stream_id: String,
        destination_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The relay process is gone and no restart is scheduled.
    RelayStopped {
        stream_id: String,
        destination_id: String,
        /// Terminal error, present when the process died and its retry
        /// budget is exhausted (or it failed with no retry applicable).
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The relay process logged a failure without exiting.
    RelayError {
        stream_id: String,
        destination_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    /// The stream this event belongs to.
    pub fn stream_id(&self) -> &str {
        match self {
            HubEvent::IngestStarted { stream_id, .. }
            | HubEvent::IngestStopped { stream_id, .. }
            | HubEvent::RelayStarted { stream_id, .. }
            | HubEvent::RelayRunning { stream_id, .. }
            | HubEvent::RelayStopped { stream_id, .. }
            | HubEvent::RelayError { stream_id, .. } => stream_id,
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            HubEvent::IngestStarted { stream_id, .. } => {
                format!("stream {} started receiving data", stream_id)
            }
            HubEvent::IngestStopped { stream_id, .. } => {
                format!("stream {} stopped receiving data", stream_id)
            }
            HubEvent::RelayStarted {
                stream_id,
                destination_id,
                ..
            } => format!("relay {}/{} spawned", stream_id, destination_id),
            HubEvent::RelayRunning {
                stream_id,
                destination_id,
                ..
            } => format!("relay {}/{} confirmed running", stream_id, destination_id),
            HubEvent::RelayStopped {
                stream_id,
                destination_id,
                error,
                ..
            } => match error {
                Some(e) => format!("relay {}/{} stopped: {}", stream_id, destination_id, e),
                None => format!("relay {}/{} stopped", stream_id, destination_id),
            },
            HubEvent::RelayError {
                stream_id,
                destination_id,
                message,
                ..
            } => format!("relay {}/{} error: {}", stream_id, destination_id, message),
        }
    }
}

/// Broadcaster for hub events.
pub struct HubEventBroadcaster {
    sender: broadcast::Sender<HubEvent>,
}

impl HubEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Publish a hub event. Absence of subscribers is not an error.
    pub fn publish(&self, event: HubEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HubEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HubEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
