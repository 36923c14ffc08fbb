// Copyright 2025 ResumableStream (https://github.com/resumable-stream)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Session lifecycle state machine.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a streaming session.
///
/// `Empty` encodes as the empty string; an absent state register always
/// reads as `Empty`, so a deleted session and a fresh one are
/// indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session exists for the key.
    Empty,
    /// Admission granted, production task not yet confirmed running.
    Starting,
    /// Production task is actively draining its source.
    Generating,
    /// End sentinel appended, awaiting cleanup.
    Ended,
    /// A reader acknowledged reaching the end.
    Done,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Empty
    }
}

impl SessionState {
    /// Wire encoding used by the state register.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Empty => "",
            SessionState::Starting => "starting",
            SessionState::Generating => "generating",
            SessionState::Ended => "ended",
            SessionState::Done => "done",
        }
    }

    /// A production attempt is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Generating)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Every path goes through `Ended`; a session that is `Starting` or
    /// `Generating` can never be re-entered for a new attempt.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Empty, Starting)
                | (Starting, Generating)
                | (Generating, Ended)
                | (Ended, Done)
                | (Ended, Starting)
                | (Done, Starting)
                | (Done, Empty)
        )
    }
}

impl std::str::FromStr for SessionState {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(SessionState::Empty),
            "starting" => Ok(SessionState::Starting),
            "generating" => Ok(SessionState::Generating),
            "ended" => Ok(SessionState::Ended),
            "done" => Ok(SessionState::Done),
            other => Err(StreamError::InvalidState(other.to_string())),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        for state in [
            SessionState::Empty,
            SessionState::Starting,
            SessionState::Generating,
            SessionState::Ended,
            SessionState::Done,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_state_rejected() {
        assert!("streaming".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_active_states() {
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Generating.is_active());
        assert!(!SessionState::Empty.is_active());
        assert!(!SessionState::Ended.is_active());
        assert!(!SessionState::Done.is_active());
    }

    #[test]
    fn test_no_transition_bypasses_ended() {
        assert!(!SessionState::Generating.can_advance_to(SessionState::Done));
        assert!(!SessionState::Starting.can_advance_to(SessionState::Ended));
        assert!(!SessionState::Generating.can_advance_to(SessionState::Starting));
    }

    #[test]
    fn test_lifecycle_path() {
        use SessionState::*;
        let path = [Empty, Starting, Generating, Ended, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        // finished sessions may be re-admitted
        assert!(Ended.can_advance_to(Starting));
        assert!(Done.can_advance_to(Starting));
    }
}
