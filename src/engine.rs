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

//! Stream engine.
//!
//! Orchestrates the session lifecycle: admission control for starting
//! production at most once, cursor-based replay of stored chunks, bounded
//! follow of live production, and the cleanup waiter that bounds resource
//! lifetime after a session ends.

use crate::backend::memory::MemoryBackend;
use crate::backend::redis::RedisBackend;
use crate::backend::StreamBackend;
use crate::config::{RedisConfig, StreamerConfig};
use crate::error::StreamResult;
use crate::event::StreamEvent;
use crate::source::ContentSource;
use crate::state::SessionState;
use async_stream::try_stream;
use futures::Stream;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of a production start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// This attempt won; a production task was spawned.
    Admitted,
    /// A production task is already running; attach as a follower.
    AlreadyRunning,
    /// Attempt limit exceeded within the window.
    Rejected,
}

/// Engine delivering resumable chunked event streams over a backend.
///
/// A session has at most one active producer but any number of concurrent
/// readers, each holding its own resume cursor. Readers that disconnect
/// simply drop their stream; production keeps running to completion and a
/// later `stream` call with the last acknowledged cursor reattaches.
pub struct Streamer<B: StreamBackend> {
    backend: Arc<B>,
    config: Arc<StreamerConfig>,
}

impl<B: StreamBackend> Clone for Streamer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }
}

impl Streamer<MemoryBackend> {
    /// Engine over the in-process backend.
    pub fn in_memory(config: StreamerConfig) -> Self {
        Self::new(MemoryBackend::new(), config)
    }
}

impl Streamer<RedisBackend> {
    /// Engine over the Redis backend.
    pub async fn redis(redis: RedisConfig, config: StreamerConfig) -> StreamResult<Self> {
        Ok(Self::new(RedisBackend::connect(redis).await?, config))
    }
}

impl<B: StreamBackend> Streamer<B> {
    pub fn new(backend: B, config: StreamerConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
        }
    }

    /// Direct access to the backend, mainly for tests and admin tooling.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Attach to `session` at `cursor` and stream events until terminal.
    ///
    /// With a `source`, this call also competes to start production; the
    /// compare-and-set to `Starting` happens inside admission, before the
    /// first event is yielded, so no readiness sleep is needed. Without a
    /// source the caller is a pure reader.
    ///
    /// The stream yields any number of `Message` events followed by at
    /// most one `End` or `Error`. Termination without a terminal event
    /// means the session went quiet without ending; callers should treat
    /// it as "retry later". Backend failures surface as `Err` items and
    /// are not retried internally.
    pub fn stream(
        &self,
        session: impl Into<String>,
        source: Option<ContentSource>,
        cursor: impl Into<String>,
    ) -> impl Stream<Item = StreamResult<StreamEvent>> + Send + 'static {
        let backend = self.backend.clone();
        let config = self.config.clone();
        let session = session.into();
        // Callers pass "" or "0" for "from the beginning"; internally the
        // beginning is None so it can never collide with a real chunk id.
        let cursor = cursor.into();
        let mut cursor = if cursor.is_empty() || cursor == "0" {
            None
        } else {
            Some(cursor)
        };

        try_stream! {
            let mut rejected = false;
            if let Some(source) = source {
                let admission = try_admit(&backend, &config, &session, source).await?;
                tracing::debug!(session = %session, ?admission, "admission decided");
                rejected = admission == Admission::Rejected;
            }

            if rejected {
                yield StreamEvent::Error {
                    data: "too many attempts".to_string(),
                };
            } else {
                let mut idle_since = Instant::now();
                'follow: loop {
                    let chunks = backend
                        .read_from(
                            &session,
                            cursor.as_deref(),
                            config.read_batch,
                            config.follow_timeout,
                        )
                        .await?;

                    if chunks.is_empty() {
                        let state = backend.get_state(&session).await?;
                        if !state.is_active() {
                            tracing::debug!(session = %session, state = ?state, "follow ended without sentinel");
                            break 'follow;
                        }
                        if idle_since.elapsed() >= config.stall_ceiling {
                            tracing::warn!(session = %session, "session stalled in generation, detaching reader");
                            break 'follow;
                        }
                        continue;
                    }

                    idle_since = Instant::now();
                    for chunk in chunks {
                        if chunk.data == config.end_marker {
                            yield StreamEvent::End;
                            break 'follow;
                        }
                        cursor = Some(chunk.id.clone());
                        yield StreamEvent::Message {
                            id: chunk.id,
                            data: chunk.data,
                        };
                    }
                }

                // Acknowledge so the cleanup waiter can delete early. Only
                // meaningful from Ended; a no-op for a session still running
                // or already gone.
                if let Err(err) = backend
                    .try_transition(&session, &[SessionState::Ended], SessionState::Done)
                    .await
                {
                    tracing::warn!(session = %session, error = %err, "failed to acknowledge end");
                }
            }
        }
    }
}

/// Decide whether this attempt may start production.
///
/// Every attempt consumes one slot of the windowed counter, winner
/// included, so with limit L the (L+1)-th start attempt inside the window
/// is rejected. Under the limit, the attempt races a compare-and-set to
/// `Starting`; losers attach to the running production.
async fn try_admit<B: StreamBackend>(
    backend: &Arc<B>,
    config: &Arc<StreamerConfig>,
    session: &str,
    source: ContentSource,
) -> StreamResult<Admission> {
    let under_limit = backend
        .increment_attempt(session, config.attempt_limit, config.attempt_window)
        .await?;
    if !under_limit {
        tracing::warn!(session = %session, limit = config.attempt_limit, "attempt limit exceeded");
        return Ok(Admission::Rejected);
    }

    // Taking over a finished session starts a fresh log generation: the
    // previous log ends with a sentinel and must not grow further. The
    // register stays `Starting` throughout; only the log and counter are
    // cleared, so no rival can slip in through an `Empty` window.
    if backend
        .try_transition(
            session,
            &[SessionState::Ended, SessionState::Done],
            SessionState::Starting,
        )
        .await?
    {
        backend.reset(session).await?;
        spawn_production(backend, config, session, source);
        return Ok(Admission::Admitted);
    }

    if backend
        .try_transition(session, &[SessionState::Empty], SessionState::Starting)
        .await?
    {
        spawn_production(backend, config, session, source);
        return Ok(Admission::Admitted);
    }

    Ok(Admission::AlreadyRunning)
}

fn spawn_production<B: StreamBackend>(
    backend: &Arc<B>,
    config: &Arc<StreamerConfig>,
    session: &str,
    source: ContentSource,
) {
    let backend = backend.clone();
    let config = config.clone();
    let session = session.to_string();
    tokio::spawn(async move {
        run_production(backend, config, session, source).await;
    });
}

/// Drain `source` into the session's log, decoupled from any reader.
///
/// Finalization runs on every exit path: the end sentinel is appended and
/// the session marked `Ended` even when the source fails partway, so a
/// session never stays `Generating` forever.
async fn run_production<B: StreamBackend>(
    backend: Arc<B>,
    config: Arc<StreamerConfig>,
    session: String,
    mut source: ContentSource,
) {
    if let Err(err) = backend.set_state(&session, SessionState::Generating).await {
        tracing::warn!(session = %session, error = %err, "failed to mark session generating");
    }

    let mut produced = 0u64;
    loop {
        match source.next_chunk().await {
            None => break,
            Some(Ok(chunk)) => {
                if let Err(err) = backend.append(&session, &chunk).await {
                    tracing::warn!(session = %session, error = %err, "append failed, ending production");
                    break;
                }
                produced += 1;
            }
            Some(Err(err)) => {
                tracing::warn!(session = %session, error = %err, "content source failed");
                break;
            }
        }
    }

    if let Err(err) = backend.append(&session, &config.end_marker).await {
        tracing::warn!(session = %session, error = %err, "failed to append end sentinel");
    }
    if let Err(err) = backend.set_state(&session, SessionState::Ended).await {
        tracing::warn!(session = %session, error = %err, "failed to mark session ended");
    }
    tracing::debug!(session = %session, produced, "production finished");

    run_cleanup(backend, config, session).await;
}

/// Bounded wait for a reader acknowledgement, then deletion.
///
/// Polls for `Done` up to the ceiling, exiting early once observed, and
/// deletes the session records. Deletion is always owned by this waiter;
/// readers only acknowledge. A session re-admitted during the grace
/// window is left alone.
async fn run_cleanup<B: StreamBackend>(
    backend: Arc<B>,
    config: Arc<StreamerConfig>,
    session: String,
) {
    let deadline = Instant::now() + config.cleanup_ceiling;
    loop {
        match backend.get_state(&session).await {
            Ok(SessionState::Done) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(session = %session, error = %err, "cleanup state poll failed");
            }
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let nap = config.cleanup_poll_interval.min(deadline - now);
        tokio::time::sleep(nap).await;
    }

    // The guard is atomic in the backend: a session re-admitted after the
    // grace window, even between here and the delete, is left alone.
    match backend.delete_if_finished(&session).await {
        Ok(true) => tracing::debug!(session = %session, "session deleted"),
        Ok(false) => tracing::debug!(session = %session, "session re-admitted, skipping delete"),
        Err(err) => tracing::warn!(session = %session, error = %err, "failed to delete session"),
    }
}
