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

//! Redis backend.
//!
//! Durable across processes and suitable for horizontally scaled readers
//! and writers. The log is a Redis stream (`XADD`/`XREAD BLOCK`), the
//! state register a plain string key mutated through a compare-and-set
//! script, and the attempt counter an `INCR` key that expires with the
//! admission window. Cursors are native stream ids.

use crate::backend::{StoredChunk, StreamBackend};
use crate::config::RedisConfig;
use crate::error::StreamResult;
use crate::state::SessionState;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

/// Idle blocking-read connections kept for reuse. Beyond this, surplus
/// connections are simply dropped on check-in.
const READ_POOL_MAX: usize = 16;

/// Sets KEYS[1] to ARGV[1] iff its current value (absent reads as "") is
/// one of ARGV[2..]. Returns 1 when the transition was applied.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur == false then cur = '' end
for i = 2, #ARGV do
    if cur == ARGV[i] then
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
    end
end
return 0
"#;

/// Increments KEYS[1], giving it a lifetime of ARGV[1] milliseconds when
/// newly created. Returns the post-increment count.
const ATTEMPT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Deletes KEYS[1..3] iff the state in KEYS[2] is one of ARGV[1..].
/// Returns 1 when the keys were deleted.
const GUARDED_DELETE_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[2])
if cur == false then return 0 end
for i = 1, #ARGV do
    if cur == ARGV[i] then
        redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
        return 1
    end
end
return 0
"#;

/// Backend persisting sessions in Redis.
pub struct RedisBackend {
    client: Client,
    conn: ConnectionManager,
    read_pool: Mutex<Vec<MultiplexedConnection>>,
    config: RedisConfig,
    cas_script: Script,
    attempt_script: Script,
    guarded_delete_script: Script,
}

impl RedisBackend {
    /// Connect to the configured Redis instance.
    pub async fn connect(config: RedisConfig) -> StreamResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            read_pool: Mutex::new(Vec::new()),
            config,
            cas_script: Script::new(CAS_SCRIPT),
            attempt_script: Script::new(ATTEMPT_SCRIPT),
            guarded_delete_script: Script::new(GUARDED_DELETE_SCRIPT),
        })
    }

    fn log_key(&self, session: &str) -> String {
        format!("{}:{}", self.config.stream_prefix, session)
    }

    fn state_key(&self, session: &str) -> String {
        format!("{}:{}", self.config.state_prefix, session)
    }

    fn attempt_key(&self, session: &str) -> String {
        format!("{}:{}", self.config.attempt_prefix, session)
    }

    async fn checkout_read_conn(&self) -> StreamResult<MultiplexedConnection> {
        if let Some(conn) = self.read_pool.lock().pop() {
            return Ok(conn);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn checkin_read_conn(&self, conn: MultiplexedConnection) {
        let mut pool = self.read_pool.lock();
        if pool.len() < READ_POOL_MAX {
            pool.push(conn);
        }
    }

    /// Number of blocking-read connections currently parked for reuse.
    pub fn idle_read_connections(&self) -> usize {
        self.read_pool.lock().len()
    }
}

#[async_trait]
impl StreamBackend for RedisBackend {
    async fn append(&self, session: &str, data: &str) -> StreamResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(self.log_key(session), "*", &[("data", data)])
            .await?;
        Ok(id)
    }

    async fn read_from(
        &self,
        session: &str,
        cursor: Option<&str>,
        batch: usize,
        timeout: Duration,
    ) -> StreamResult<Vec<StoredChunk>> {
        // XREAD returns entries strictly after the given id, and "0" sorts
        // before every XADD-assigned id, so it reads as "the beginning".
        let cursor = cursor.unwrap_or("0");
        let options = StreamReadOptions::default()
            .count(batch)
            .block(timeout.as_millis() as usize);
        // XREAD BLOCK stalls its connection for the whole wait, so it must
        // not share the multiplexed command connection. Idle connections
        // are pooled rather than re-dialed per poll.
        let mut conn = self.checkout_read_conn().await?;
        let reply: StreamReadReply = conn
            .xread_options(&[self.log_key(session)], &[cursor], &options)
            .await?;
        self.checkin_read_conn(conn);

        let mut chunks = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let data: String = entry.get("data").unwrap_or_default();
                chunks.push(StoredChunk {
                    id: entry.id.clone(),
                    data,
                });
            }
        }
        Ok(chunks)
    }

    async fn get_state(&self, session: &str) -> StreamResult<SessionState> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.state_key(session)).await?;
        match value {
            None => Ok(SessionState::Empty),
            Some(raw) => raw.parse(),
        }
    }

    async fn set_state(&self, session: &str, state: SessionState) -> StreamResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.state_key(session), state.as_str()).await?;
        Ok(())
    }

    async fn try_transition(
        &self,
        session: &str,
        from: &[SessionState],
        to: SessionState,
    ) -> StreamResult<bool> {
        let mut conn = self.conn.clone();
        let mut call = self.cas_script.key(self.state_key(session));
        call.arg(to.as_str());
        for state in from {
            call.arg(state.as_str());
        }
        let applied: i64 = call.invoke_async(&mut conn).await?;
        Ok(applied == 1)
    }

    async fn increment_attempt(
        &self,
        session: &str,
        limit: u32,
        window: Duration,
    ) -> StreamResult<bool> {
        let mut conn = self.conn.clone();
        let mut call = self.attempt_script.key(self.attempt_key(session));
        call.arg(window.as_millis() as u64);
        let count: i64 = call.invoke_async(&mut conn).await?;
        Ok(count <= i64::from(limit))
    }

    async fn reset(&self, session: &str) -> StreamResult<()> {
        let mut conn = self.conn.clone();
        let keys = [self.log_key(session), self.attempt_key(session)];
        let _: () = conn.del(&keys).await?;
        Ok(())
    }

    async fn delete(&self, session: &str) -> StreamResult<()> {
        let mut conn = self.conn.clone();
        let keys = [
            self.log_key(session),
            self.state_key(session),
            self.attempt_key(session),
        ];
        let _: () = conn.del(&keys).await?;
        Ok(())
    }

    async fn delete_if_finished(&self, session: &str) -> StreamResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .guarded_delete_script
            .key(self.log_key(session))
            .key(self.state_key(session))
            .key(self.attempt_key(session))
            .arg(SessionState::Ended.as_str())
            .arg(SessionState::Done.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
