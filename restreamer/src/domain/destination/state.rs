//! Destination (relay target) state machine.

use serde::{Deserialize, Serialize};

/// Runtime states of a relay destination.
///
/// A destination may only be `Connecting` or `Live` while its owning stream
/// is `Live`; the lifecycle manager resets every destination to
/// `Disconnected` whenever the stream leaves that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationState {
    /// No relay process exists for this destination.
    #[default]
    Disconnected,
    /// A relay process was spawned but has not confirmed data flow yet.
    Connecting,
    /// The relay process reported an active stream mapping.
    Live,
}

impl DestinationState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Live => "LIVE",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISCONNECTED" => Some(Self::Disconnected),
            "CONNECTING" => Some(Self::Connecting),
            "LIVE" => Some(Self::Live),
            _ => None,
        }
    }

    /// Whether a relay process is expected to exist for this destination.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Live)
    }
}

impl std::fmt::Display for DestinationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
