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

//! Events emitted to stream readers.

use serde::{Deserialize, Serialize};

/// One event delivered to a stream reader.
///
/// A stream invocation that reaches a terminal state emits exactly one
/// `End` or `Error` event, preceded by any number of `Message` events.
/// Serializes to the `{event, id?, data}` shape expected by SSE-style
/// transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// One chunk of payload with its log id.
    Message { id: String, data: String },
    /// The session's log reached its end sentinel.
    End,
    /// The stream terminated abnormally (e.g. admission rejected).
    Error { data: String },
}

impl StreamEvent {
    /// Build a message event.
    pub fn message(id: impl Into<String>, data: impl Into<String>) -> Self {
        StreamEvent::Message {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let event = StreamEvent::message("3", "hello");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "message", "id": "3", "data": "hello"})
        );
    }

    #[test]
    fn test_end_shape() {
        let json = serde_json::to_value(StreamEvent::End).unwrap();
        assert_eq!(json, serde_json::json!({"event": "end"}));
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::End.is_terminal());
        assert!(StreamEvent::Error {
            data: "too many attempts".to_string()
        }
        .is_terminal());
        assert!(!StreamEvent::message("0", "a").is_terminal());
    }
}
