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

//! Storage backend contract.
//!
//! Every backend exposes the same primitives over one session: an
//! append-only log, a bounded read from a cursor, an atomically updatable
//! state register, a windowed attempt counter, and log/session removal.
//! The engine is written only against this trait.

pub mod memory;
pub mod redis;

use crate::error::StreamResult;
use crate::state::SessionState;
use async_trait::async_trait;
use std::time::Duration;

/// One stored chunk with its backend-assigned log id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// Strictly increasing id within the session's log.
    pub id: String,
    /// Opaque payload. The end sentinel travels as ordinary chunk data.
    pub data: String,
}

/// Storage and notification primitive backing the stream engine.
#[async_trait]
pub trait StreamBackend: Send + Sync + 'static {
    /// Append a chunk and return its assigned id. Never overwrites; safe
    /// to call concurrently with reads.
    async fn append(&self, session: &str, data: &str) -> StreamResult<String>;

    /// Return up to `batch` chunks strictly after `cursor`, blocking up to
    /// `timeout` if none are available yet. Returns as soon as new chunks
    /// arrive; an empty vec means the wait timed out.
    ///
    /// `None` denotes the beginning of the log; `Some(id)` is the id of
    /// the last chunk already consumed. The two are distinct even when a
    /// backend assigns `"0"` as a real chunk id.
    async fn read_from(
        &self,
        session: &str,
        cursor: Option<&str>,
        batch: usize,
        timeout: Duration,
    ) -> StreamResult<Vec<StoredChunk>>;

    /// Read the state register. Absent sessions read as `Empty`.
    async fn get_state(&self, session: &str) -> StreamResult<SessionState>;

    /// Overwrite the state register.
    async fn set_state(&self, session: &str, state: SessionState) -> StreamResult<()>;

    /// Atomically set the register to `to` iff its current value is one of
    /// `from`. Returns whether the transition was applied. Concurrent
    /// admission races are decided by this primitive.
    async fn try_transition(
        &self,
        session: &str,
        from: &[SessionState],
        to: SessionState,
    ) -> StreamResult<bool>;

    /// Atomically increment the windowed attempt counter, creating it with
    /// the window as its lifetime if absent. Returns whether the
    /// pre-increment count was still under `limit`.
    async fn increment_attempt(
        &self,
        session: &str,
        limit: u32,
        window: Duration,
    ) -> StreamResult<bool>;

    /// Remove the session's log and attempt counter while leaving the
    /// state register untouched. Used when a finished session is taken
    /// over for a fresh generation: the register holds `Starting` for the
    /// whole takeover, never passing through `Empty`.
    async fn reset(&self, session: &str) -> StreamResult<()>;

    /// Remove the session's log, state register, and attempt counter as
    /// one unit. Idempotent.
    async fn delete(&self, session: &str) -> StreamResult<()>;

    /// As `delete`, but only while the state register still reads `Ended`
    /// or `Done`. Returns whether deletion happened. A session re-admitted
    /// during the cleanup grace window is left untouched.
    async fn delete_if_finished(&self, session: &str) -> StreamResult<bool>;
}
