//! Stream state machine.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a stream.
///
/// The machine is cyclic: `Stopped -> Waiting -> Live -> Waiting -> ...`,
/// with `stop` collapsing any state back to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    /// Not accepting ingest; relays are down.
    #[default]
    Stopped,
    /// Armed: the ingest gateway will admit a publisher with the right key.
    Waiting,
    /// A publisher is delivering data; relays are running.
    Live,
}

impl StreamState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Waiting => "WAITING",
            Self::Live => "LIVE",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(Self::Stopped),
            "WAITING" => Some(Self::Waiting),
            "LIVE" => Some(Self::Live),
            _ => None,
        }
    }

    /// Whether the stream is armed or actively publishing.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Waiting | Self::Live)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: StreamState) -> bool {
        use StreamState::*;

        match (self, target) {
            (from, to) if from == &to => true,

            // start command
            (Stopped, Waiting) => true,

            // publish confirmed / publish ended
            (Waiting, Live) => true,
            (Live, Waiting) => true,

            // stop command from anywhere
            (_, Stopped) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: StreamState) -> Result<StreamState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_state(
                format!("transition to {}", target.as_str()),
                self.as_str(),
            ))
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for state in [StreamState::Stopped, StreamState::Waiting, StreamState::Live] {
            assert_eq!(StreamState::parse(state.as_str()), Some(state));
        }
        assert_eq!(StreamState::parse("invalid"), None);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(StreamState::Stopped.can_transition_to(StreamState::Waiting));
        assert!(StreamState::Waiting.can_transition_to(StreamState::Live));
        assert!(StreamState::Live.can_transition_to(StreamState::Waiting));
        assert!(StreamState::Live.can_transition_to(StreamState::Stopped));
        assert!(StreamState::Waiting.can_transition_to(StreamState::Stopped));
    }

    #[test]
    fn test_invalid_transitions() {
        // Live is only reachable through Waiting (a confirmed publisher).
        assert!(!StreamState::Stopped.can_transition_to(StreamState::Live));
    }

    #[test]
    fn test_same_state_is_allowed() {
        assert!(StreamState::Waiting.can_transition_to(StreamState::Waiting));
    }

    #[test]
    fn test_transition_to_error() {
        let result = StreamState::Stopped.transition_to(StreamState::Live);
        assert!(result.is_err());
    }

    #[test]
    fn test_is_running() {
        assert!(!StreamState::Stopped.is_running());
        assert!(StreamState::Waiting.is_running());
        assert!(StreamState::Live.is_running());
    }
}
