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

//! End-to-end streaming behavior over the in-process backend.

use futures::{Stream, StreamExt};
use resumable_stream::{
    ContentSource, SessionState, StreamBackend, StreamEvent, StreamResult, Streamer,
    StreamerConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> StreamerConfig {
    StreamerConfig {
        follow_timeout: Duration::from_millis(50),
        stall_ceiling: Duration::from_millis(500),
        cleanup_poll_interval: Duration::from_millis(10),
        cleanup_ceiling: Duration::from_millis(100),
        ..StreamerConfig::default()
    }
}

async fn collect(
    stream: impl Stream<Item = StreamResult<StreamEvent>> + Send,
) -> Vec<StreamEvent> {
    Box::pin(stream)
        .map(|item| item.expect("backend error"))
        .collect()
        .await
}

#[tokio::test]
async fn test_replay_from_beginning() {
    let streamer = Streamer::in_memory(fast_config());
    let source = ContentSource::from_iter(vec!["a", "b"]);

    let events = collect(streamer.stream("chat", Some(source), "0")).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::message("0", "a"),
            StreamEvent::message("1", "b"),
            StreamEvent::End,
        ]
    );
}

#[tokio::test]
async fn test_slow_source_delivers_each_chunk_once() {
    // Chunks arrive slower than the follow timeout, so every poll cycle
    // re-reads from the cursor. The first chunk's id must not be
    // re-delivered when the cursor holds it.
    let streamer = Streamer::in_memory(fast_config());
    let source = ContentSource::from_stream(futures::stream::iter(0..3).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        format!("tick-{i}")
    }));

    let events = collect(streamer.stream("slow", Some(source), "0")).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::message("0", "tick-0"),
            StreamEvent::message("1", "tick-1"),
            StreamEvent::message("2", "tick-2"),
            StreamEvent::End,
        ]
    );
}

#[tokio::test]
async fn test_resume_skips_consumed_chunks() {
    let streamer = Streamer::in_memory(fast_config());
    let backend = streamer.backend();
    for data in ["a", "b", "c"] {
        backend.append("chat", data).await.unwrap();
    }
    backend.append("chat", "[END]").await.unwrap();
    backend.set_state("chat", SessionState::Ended).await.unwrap();

    let events = collect(streamer.stream("chat", None, "1")).await;

    assert_eq!(
        events,
        vec![StreamEvent::message("2", "c"), StreamEvent::End]
    );
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let streamer = Streamer::in_memory(fast_config());
    let backend = streamer.backend();
    for data in ["a", "b", "c"] {
        backend.append("chat", data).await.unwrap();
    }
    backend.append("chat", "[END]").await.unwrap();
    backend.set_state("chat", SessionState::Ended).await.unwrap();

    let first = collect(streamer.stream("chat", None, "")).await;
    let second = collect(streamer.stream("chat", None, "")).await;

    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
}

#[tokio::test]
async fn test_ids_strictly_increasing_and_gap_free() {
    let streamer = Streamer::in_memory(fast_config());
    let chunks: Vec<String> = (0..50).map(|i| format!("c{i}")).collect();
    let source = ContentSource::from_iter(chunks);

    let events = collect(streamer.stream("bulk", Some(source), "0")).await;

    let ids: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message { id, .. } => Some(id.parse().unwrap()),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 50);
    for (expected, id) in ids.iter().enumerate() {
        assert_eq!(*id, expected as u64);
    }
    assert_eq!(events.last(), Some(&StreamEvent::End));
}

#[tokio::test]
async fn test_concurrent_readers_single_production() {
    let streamer = Streamer::in_memory(fast_config());
    let pulls = Arc::new(AtomicUsize::new(0));

    let counted_source = |pulls: Arc<AtomicUsize>| {
        ContentSource::from_stream(futures::stream::iter(vec!["a", "b", "c"]).then(
            move |chunk| {
                let pulls = pulls.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    pulls.fetch_add(1, Ordering::SeqCst);
                    chunk
                }
            },
        ))
    };

    let first = streamer.stream("shared", Some(counted_source(pulls.clone())), "0");
    let second = streamer.stream("shared", Some(counted_source(pulls.clone())), "0");

    let (first, second) = tokio::join!(collect(first), collect(second));

    assert_eq!(first, second);
    assert_eq!(first.last(), Some(&StreamEvent::End));
    assert_eq!(
        first
            .iter()
            .filter(|e| matches!(e, StreamEvent::Message { .. }))
            .count(),
        3
    );
    // exactly one production task drained a source
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_takeover_of_ended_session_keeps_single_production() {
    let streamer = Streamer::in_memory(fast_config());
    let backend = streamer.backend();
    backend.append("reuse", "stale").await.unwrap();
    backend.append("reuse", "[END]").await.unwrap();
    backend.set_state("reuse", SessionState::Ended).await.unwrap();

    let pulls = Arc::new(AtomicUsize::new(0));
    let counted_source = |pulls: Arc<AtomicUsize>| {
        ContentSource::from_stream(futures::stream::iter(vec!["x", "y", "z"]).then(
            move |chunk| {
                let pulls = pulls.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    pulls.fetch_add(1, Ordering::SeqCst);
                    chunk
                }
            },
        ))
    };

    // both attempts race to take over the finished session; the register
    // must never pass through Empty, so exactly one may win
    let first = streamer.stream("reuse", Some(counted_source(pulls.clone())), "0");
    let second = streamer.stream("reuse", Some(counted_source(pulls.clone())), "0");
    let (first, second) = tokio::join!(collect(first), collect(second));

    assert_eq!(first.last(), Some(&StreamEvent::End));
    assert_eq!(second.last(), Some(&StreamEvent::End));
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_attempt_limit_rejects_surplus_starters() {
    let config = StreamerConfig {
        attempt_limit: 2,
        ..fast_config()
    };
    let streamer = Streamer::in_memory(config);
    let pending = || ContentSource::from_stream(futures::stream::pending::<String>());

    // first attempt wins admission; production hangs on its source
    let s1 = streamer.stream("busy", Some(pending()), "0");
    tokio::pin!(s1);
    let poll = tokio::time::timeout(Duration::from_millis(100), s1.next()).await;
    assert!(poll.is_err(), "winner should be waiting for chunks");

    // second attempt attaches as a follower, no error event
    let s2 = streamer.stream("busy", Some(pending()), "0");
    tokio::pin!(s2);
    let poll = tokio::time::timeout(Duration::from_millis(100), s2.next()).await;
    assert!(poll.is_err(), "follower should be waiting, not rejected");

    // third attempt exceeds the limit
    let s3 = streamer.stream("busy", Some(pending()), "0");
    tokio::pin!(s3);
    let event = tokio::time::timeout(Duration::from_millis(200), s3.next())
        .await
        .expect("rejection should be immediate")
        .expect("stream should yield an event")
        .expect("admission rejection is an event, not an Err");
    assert_eq!(
        event,
        StreamEvent::Error {
            data: "too many attempts".to_string()
        }
    );
    let end = tokio::time::timeout(Duration::from_millis(100), s3.next()).await;
    assert!(end.expect("stream should close after error").is_none());
}

#[tokio::test]
async fn test_reader_disconnect_then_resume() {
    let streamer = Streamer::in_memory(fast_config());
    let source = ContentSource::from_stream(futures::stream::iter(0..5).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        format!("chunk-{i}")
    }));

    // first reader consumes two chunks and disconnects
    let mut events = Box::pin(streamer.stream("resume", Some(source), "0"));
    let mut last_id = String::new();
    for _ in 0..2 {
        match events.next().await {
            Some(Ok(StreamEvent::Message { id, .. })) => last_id = id,
            other => panic!("expected message, got {other:?}"),
        }
    }
    drop(events);

    // a new reader resumes from the acknowledged cursor, no new production
    let tail = collect(streamer.stream("resume", None, last_id)).await;
    let payloads: Vec<&str> = tail
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message { data, .. } => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec!["chunk-2", "chunk-3", "chunk-4"]);
    assert_eq!(tail.last(), Some(&StreamEvent::End));
}

#[tokio::test]
async fn test_cleanup_deletes_within_ceiling_without_readers() {
    let streamer = Streamer::in_memory(fast_config());
    let source = ContentSource::from_iter(vec!["a"]);

    // poll once to drive admission, then abandon the reader
    let events = streamer.stream("orphan", Some(source), "0");
    tokio::pin!(events);
    let _ = tokio::time::timeout(Duration::from_millis(20), events.next()).await;
    drop(events);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        streamer.backend().get_state("orphan").await.unwrap(),
        SessionState::Empty
    );
    assert_eq!(streamer.backend().session_count(), 0);
}

#[tokio::test]
async fn test_acknowledged_end_triggers_early_cleanup() {
    let config = StreamerConfig {
        cleanup_ceiling: Duration::from_secs(5),
        ..fast_config()
    };
    let streamer = Streamer::in_memory(config);
    let source = ContentSource::from_iter(vec!["a", "b"]);

    let events = collect(streamer.stream("acked", Some(source), "0")).await;
    assert_eq!(events.last(), Some(&StreamEvent::End));

    // far sooner than the 5s ceiling
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(streamer.backend().session_count(), 0);
}

#[tokio::test]
async fn test_failing_source_still_terminates_cleanly() {
    let streamer = Streamer::in_memory(fast_config());
    let source = ContentSource::from_try_stream(futures::stream::iter(vec![
        Ok("partial".to_string()),
        Err(resumable_stream::StreamError::Source(
            "model connection dropped".to_string(),
        )),
    ]));

    let events = collect(streamer.stream("flaky", Some(source), "0")).await;

    // the failure is not re-exposed; readers see the log end normally
    assert_eq!(
        events,
        vec![StreamEvent::message("0", "partial"), StreamEvent::End]
    );
}

#[tokio::test]
async fn test_pure_reader_on_missing_session_exits_silently() {
    let streamer = Streamer::in_memory(fast_config());

    let events = collect(streamer.stream("ghost", None, "0")).await;

    assert!(events.is_empty());
    // reading a missing session must not leave a record behind
    assert_eq!(streamer.backend().session_count(), 0);
}

#[tokio::test]
async fn test_session_key_reusable_after_cleanup() {
    let streamer = Streamer::in_memory(fast_config());

    let first = collect(streamer.stream(
        "recycled",
        Some(ContentSource::from_iter(vec!["old"])),
        "0",
    ))
    .await;
    assert_eq!(first.last(), Some(&StreamEvent::End));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(streamer.backend().session_count(), 0);

    let second = collect(streamer.stream(
        "recycled",
        Some(ContentSource::from_iter(vec!["new"])),
        "0",
    ))
    .await;
    // brand-new log: ids restart from zero
    assert_eq!(
        second,
        vec![StreamEvent::message("0", "new"), StreamEvent::End]
    );
}
