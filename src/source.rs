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

//! Content sources drained by the production task.
//!
//! A source is an explicit tagged union chosen at the call site: a
//! blocking iterator (bridged onto the blocking pool one item at a time)
//! or an asynchronous stream. The production task treats both uniformly.

use crate::error::{StreamError, StreamResult};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

/// A finite or infinite sequence of chunks to append to a session's log.
pub enum ContentSource {
    /// Blocking iterator. Each `next()` runs on the blocking pool so a
    /// slow producer cannot stall the async runtime.
    Sync(Box<dyn Iterator<Item = StreamResult<String>> + Send + 'static>),
    /// Asynchronous stream of chunks.
    Async(BoxStream<'static, StreamResult<String>>),
}

impl ContentSource {
    /// Source backed by an in-memory or lazily computed iterator.
    pub fn from_iter<I, S>(iter: I) -> Self
    where
        I: IntoIterator<Item = S> + Send + 'static,
        I::IntoIter: Send + 'static,
        S: Into<String>,
    {
        ContentSource::Sync(Box::new(
            iter.into_iter().map(|s| -> StreamResult<String> { Ok(s.into()) }),
        ))
    }

    /// Source backed by a fallible blocking iterator.
    pub fn from_try_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = StreamResult<String>> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        ContentSource::Sync(Box::new(iter.into_iter()))
    }

    /// Source backed by an asynchronous stream.
    pub fn from_stream<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<String>,
    {
        ContentSource::Async(
            stream
                .map(|s| -> StreamResult<String> { Ok(s.into()) })
                .boxed(),
        )
    }

    /// Source backed by a fallible asynchronous stream.
    pub fn from_try_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamResult<String>> + Send + 'static,
    {
        ContentSource::Async(stream.boxed())
    }

    /// Pull the next chunk, suspending rather than blocking the runtime.
    ///
    /// A panic inside a sync iterator surfaces as a `Source` error so the
    /// caller can still finalize the session.
    pub(crate) async fn next_chunk(&mut self) -> Option<StreamResult<String>> {
        match self {
            ContentSource::Async(stream) => stream.next().await,
            ContentSource::Sync(slot) => {
                let mut iter = std::mem::replace(slot, Box::new(std::iter::empty()));
                match tokio::task::spawn_blocking(move || {
                    let item = iter.next();
                    (item, iter)
                })
                .await
                {
                    Ok((item, iter)) => {
                        *slot = iter;
                        item
                    }
                    Err(err) => Some(Err(StreamError::Source(format!(
                        "source iterator panicked: {err}"
                    )))),
                }
            }
        }
    }
}

impl std::fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Sync(_) => f.write_str("ContentSource::Sync"),
            ContentSource::Async(_) => f.write_str("ContentSource::Async"),
        }
    }
}
