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

//! Resumable Stream
//!
//! Delivers a long-running, chunked event stream (e.g. incremental text
//! generation) to one or more readers. A reader that disconnects and
//! reconnects resumes exactly where it left off, without restarting or
//! duplicating the underlying production work.
//!
//! A session is keyed by an opaque string, has at most one active
//! producer, and may be observed by any number of concurrent readers,
//! each holding its own resume cursor. Two backends are provided: an
//! in-process one for single instances and a Redis one for horizontally
//! scaled deployments.
//!
//! ```no_run
//! use futures::StreamExt;
//! use resumable_stream::{ContentSource, StreamerConfig, Streamer};
//!
//! # async fn demo() {
//! let streamer = Streamer::in_memory(StreamerConfig::default());
//! let source = ContentSource::from_iter(vec!["hello", " ", "world"]);
//! let mut events = Box::pin(streamer.stream("chat-42", Some(source), "0"));
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod source;
pub mod state;

pub use backend::memory::MemoryBackend;
pub use backend::redis::RedisBackend;
pub use backend::{StoredChunk, StreamBackend};
pub use config::{RedisConfig, StreamerConfig, DEFAULT_END_MARKER};
pub use engine::Streamer;
pub use error::{StreamError, StreamResult};
pub use event::StreamEvent;
pub use source::ContentSource;
pub use state::SessionState;
