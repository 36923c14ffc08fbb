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

//! In-process backend.
//!
//! Single-instance, lost on restart. Followers are woken through a
//! per-session `Notify` so new chunks are observed without polling delay.
//! Chunk ids are decimal log indices; a cursor holds the last-consumed id.

use crate::backend::{StoredChunk, StreamBackend};
use crate::error::{StreamError, StreamResult};
use crate::state::SessionState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

#[derive(Default)]
struct SessionSlot {
    chunks: Vec<String>,
    state: SessionState,
    attempts: u32,
    attempts_reset_at: Option<std::time::Instant>,
    notify: Arc<Notify>,
}

/// Backend keeping all session records in process memory.
pub struct MemoryBackend {
    sessions: DashMap<String, SessionSlot>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Number of live sessions, for tests and introspection.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn wakeup_handle(&self, session: &str) -> Arc<Notify> {
        self.sessions
            .entry(session.to_string())
            .or_default()
            .notify
            .clone()
    }

    /// Drop the slot again if nothing ever touched it beyond parking a
    /// reader on its wakeup handle: no chunks, no state, no live attempt
    /// counter. Keeps arbitrary reader-named keys from accumulating.
    fn remove_if_vacant(&self, session: &str) {
        self.sessions.remove_if(session, |_, slot| {
            let counter_live = slot.attempts > 0
                && slot
                    .attempts_reset_at
                    .map_or(false, |reset_at| std::time::Instant::now() < reset_at);
            slot.chunks.is_empty() && slot.state == SessionState::Empty && !counter_live
        });
    }

    fn chunks_after(&self, session: &str, start: usize, batch: usize) -> Vec<StoredChunk> {
        self.sessions
            .get(session)
            .map(|slot| {
                slot.chunks
                    .iter()
                    .enumerate()
                    .skip(start)
                    .take(batch)
                    .map(|(id, data)| StoredChunk {
                        id: id.to_string(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a last-consumed-id cursor into the first log index to deliver.
///
/// `None` denotes the beginning; `Some(id)` is the id of the last chunk
/// already consumed, so delivery resumes at the next index. Id `"0"` is a
/// real chunk here, which is why "beginning" is not spelled as a cursor
/// value.
fn parse_cursor(cursor: Option<&str>) -> StreamResult<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .map(|last| last + 1)
            .map_err(|_| StreamError::InvalidCursor(raw.to_string())),
    }
}

#[async_trait]
impl StreamBackend for MemoryBackend {
    async fn append(&self, session: &str, data: &str) -> StreamResult<String> {
        let (id, notify) = {
            let mut slot = self.sessions.entry(session.to_string()).or_default();
            slot.chunks.push(data.to_string());
            (slot.chunks.len() - 1, slot.notify.clone())
        };
        notify.notify_waiters();
        Ok(id.to_string())
    }

    async fn read_from(
        &self,
        session: &str,
        cursor: Option<&str>,
        batch: usize,
        timeout: Duration,
    ) -> StreamResult<Vec<StoredChunk>> {
        let start = parse_cursor(cursor)?;
        let deadline = Instant::now() + timeout;
        loop {
            // Register the waiter before checking the log, so an append
            // landing between the check and the wait is not missed.
            let notify = self.wakeup_handle(session);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let chunks = self.chunks_after(session, start, batch);
            if !chunks.is_empty() {
                return Ok(chunks);
            }
            if timeout_at(deadline, notified).await.is_err() {
                self.remove_if_vacant(session);
                return Ok(Vec::new());
            }
        }
    }

    async fn get_state(&self, session: &str) -> StreamResult<SessionState> {
        Ok(self
            .sessions
            .get(session)
            .map(|slot| slot.state)
            .unwrap_or_default())
    }

    async fn set_state(&self, session: &str, state: SessionState) -> StreamResult<()> {
        self.sessions.entry(session.to_string()).or_default().state = state;
        Ok(())
    }

    async fn try_transition(
        &self,
        session: &str,
        from: &[SessionState],
        to: SessionState,
    ) -> StreamResult<bool> {
        // Avoid resurrecting a deleted session unless Empty is acceptable.
        if !self.sessions.contains_key(session) && !from.contains(&SessionState::Empty) {
            return Ok(false);
        }
        let mut slot = self.sessions.entry(session.to_string()).or_default();
        if from.contains(&slot.state) {
            slot.state = to;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn increment_attempt(
        &self,
        session: &str,
        limit: u32,
        window: Duration,
    ) -> StreamResult<bool> {
        let mut slot = self.sessions.entry(session.to_string()).or_default();
        let now = std::time::Instant::now();
        match slot.attempts_reset_at {
            Some(reset_at) if now < reset_at => {}
            _ => {
                slot.attempts = 0;
                slot.attempts_reset_at = Some(now + window);
            }
        }
        let under = slot.attempts < limit;
        slot.attempts += 1;
        Ok(under)
    }

    async fn reset(&self, session: &str) -> StreamResult<()> {
        if let Some(mut slot) = self.sessions.get_mut(session) {
            slot.chunks.clear();
            slot.attempts = 0;
            slot.attempts_reset_at = None;
        }
        Ok(())
    }

    async fn delete(&self, session: &str) -> StreamResult<()> {
        if let Some((_, slot)) = self.sessions.remove(session) {
            // Release any follower still parked on the old log.
            slot.notify.notify_waiters();
        }
        Ok(())
    }

    async fn delete_if_finished(&self, session: &str) -> StreamResult<bool> {
        let removed = self.sessions.remove_if(session, |_, slot| {
            matches!(slot.state, SessionState::Ended | SessionState::Done)
        });
        match removed {
            Some((_, slot)) => {
                slot.notify.notify_waiters();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
