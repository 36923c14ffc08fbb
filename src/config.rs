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

//! Configuration for stream engine behavior
//!
//! Provides the knobs recognized by the engine: the end-sentinel value,
//! admission limiting, follow-wait bounds, and cleanup timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reserved chunk value marking the logical end of a session's log.
pub const DEFAULT_END_MARKER: &str = "[END]";

/// Engine configuration shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Chunk value treated as the end sentinel. Never emitted as a
    /// message; producers must not use it as payload.
    pub end_marker: String,

    /// Maximum production attempts per session within `attempt_window`.
    pub attempt_limit: u32,

    /// Rolling window for the attempt counter. The counter key expires
    /// after this duration; deletion of the session also resets it.
    pub attempt_window: Duration,

    /// Upper bound on one blocking `read_from` slice while following a
    /// live log.
    pub follow_timeout: Duration,

    /// How long a reader keeps following a session that stays active but
    /// produces nothing before giving up silently.
    pub stall_ceiling: Duration,

    /// Poll interval of the cleanup waiter.
    pub cleanup_poll_interval: Duration,

    /// Grace window granted to slow readers before the session records
    /// are deleted unconditionally.
    pub cleanup_ceiling: Duration,

    /// Maximum chunks fetched per backend read.
    pub read_batch: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            end_marker: DEFAULT_END_MARKER.to_string(),
            attempt_limit: 5,
            attempt_window: Duration::from_secs(60),
            follow_timeout: Duration::from_secs(3),
            stall_ceiling: Duration::from_secs(30),
            cleanup_poll_interval: Duration::from_secs(1),
            cleanup_ceiling: Duration::from_secs(10),
            read_batch: 10,
        }
    }
}

/// Connection and key namespace settings for the Redis backend.
///
/// Each session owns three keys, all suffixed by the session key: the
/// append log (a Redis stream), the state register, and the time-limited
/// attempt counter. They are deleted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for the append log.
    pub stream_prefix: String,
    /// Key prefix for the state register.
    pub state_prefix: String,
    /// Key prefix for the attempt counter.
    pub attempt_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            stream_prefix: "stream:session".to_string(),
            state_prefix: "state:session".to_string(),
            attempt_prefix: "attempts:session".to_string(),
        }
    }
}

impl RedisConfig {
    /// Config pointing at the given URL with default key prefixes.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}
