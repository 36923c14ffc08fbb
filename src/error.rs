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

//! Streaming error types

use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while streaming or talking to a backend
#[derive(Debug, Error)]
pub enum StreamError {
    /// Backend storage error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Resume cursor could not be decoded by the backend
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// State register held a value outside the closed state set
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Content source failed while producing
    #[error("Source error: {0}")]
    Source(String),
}
