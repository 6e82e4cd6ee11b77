//! Event Log (spec §4.I) — an append-only, replayable per-stream event log
//! backing resumable SSE/transport connections.

use std::sync::Arc;

use bridgemcp_core::ids::random_event_tail;
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, Op, key};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SEPARATOR: char = '|';
const CLEANUP_BATCH_SIZE: usize = 10;

fn stream_key(stream_id: &str, event_id: &str) -> Key {
    key(&["events", "stream", stream_id, event_id])
}

fn stream_prefix(stream_id: &str) -> Key {
    key(&["events", "stream", stream_id])
}

fn stream_metadata_key(stream_id: &str) -> Key {
    key(&["events", "stream_metadata", stream_id])
}

/// Encodes a millisecond timestamp in base36 (spec §4.I wire format).
fn base36_encode(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 alphabet is ASCII")
}

fn base36_decode(s: &str) -> Option<u64> {
    let mut n: u64 = 0;
    for c in s.chars() {
        let digit = c.to_digit(36)?;
        n = n.checked_mul(36)?.checked_add(digit as u64)?;
    }
    Some(n)
}

/// Parses `{stream_id}|{base36(now_ms)}|{8-char random}` into its parts.
fn parse_event_id(event_id: &str) -> Option<(&str, u64)> {
    let mut parts = event_id.splitn(3, SEPARATOR);
    let stream_id = parts.next()?;
    let ts = parts.next()?;
    let _tail = parts.next()?;
    let ts = base36_decode(ts)?;
    Some((stream_id, ts))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEvent {
    event_id: String,
    timestamp_ms: u64,
    message: Value,
}

/// Per-stream summary kept alongside the event rows (spec §6's
/// `[events, stream_metadata, <stream_id>]` key): the most recent event id
/// and timestamp, and a running count, refreshed on every `store_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamMetadata {
    last_event_id: String,
    last_timestamp_ms: u64,
    event_count: u64,
}

pub struct EventLog {
    kv: Arc<KvStore>,
    clock: SharedClock,
}

impl EventLog {
    pub fn new(kv: Arc<KvStore>, clock: SharedClock) -> Self {
        Self { kv, clock }
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_unix_ms().max(0) as u64
    }

    /// Commits one KV write for `message` under `stream_id`, returning the
    /// newly minted event id, then refreshes the stream's `stream_metadata`
    /// summary (last event id/timestamp, running count) as a second,
    /// best-effort write.
    #[tracing::instrument(skip(self, message))]
    pub fn store_event(&self, stream_id: &str, message: Value) -> Result<String> {
        let timestamp_ms = self.now_ms();
        let event_id = format!("{stream_id}{SEPARATOR}{}{SEPARATOR}{}", base36_encode(timestamp_ms), random_event_tail());
        let stored = StoredEvent {
            event_id: event_id.clone(),
            timestamp_ms,
            message,
        };
        self.kv.set(
            &stream_key(stream_id, &event_id),
            serde_json::to_value(&stored).map_err(encode_err)?,
            None,
        )?;

        let event_count = match self.kv.get(&stream_metadata_key(stream_id))? {
            Some(v) => serde_json::from_value::<StreamMetadata>(v).map_err(decode_err)?.event_count + 1,
            None => 1,
        };
        let metadata = StreamMetadata {
            last_event_id: event_id.clone(),
            last_timestamp_ms: timestamp_ms,
            event_count,
        };
        self.kv
            .set(&stream_metadata_key(stream_id), serde_json::to_value(&metadata).map_err(encode_err)?, None)?;

        Ok(event_id)
    }

    /// Replays every event in the stream derived from `last_event_id`'s
    /// prefix that is strictly after it, in timestamp order, invoking `send`
    /// for each. Returns the stream id, or `""` if `last_event_id` is
    /// malformed or its cursor cannot be found (spec §4.I: a no-op, not an
    /// error, so a stale or unknown cursor cannot itself abort a resume).
    #[tracing::instrument(skip(self, send))]
    pub fn replay_events_after<F>(&self, last_event_id: &str, mut send: F) -> Result<String>
    where
        F: FnMut(&str, &Value) -> Result<()>,
    {
        let Some((stream_id, cursor_ts)) = parse_event_id(last_event_id) else {
            return Ok(String::new());
        };

        let rows = self.kv.list_by_prefix(&stream_prefix(stream_id))?;
        let mut events: Vec<StoredEvent> = rows
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v).map_err(decode_err))
            .collect::<Result<_>>()?;

        if !events.iter().any(|e| e.event_id == last_event_id) {
            return Ok(String::new());
        }

        events.sort_by_key(|e| e.timestamp_ms);
        for event in &events {
            let after_cursor = event.timestamp_ms > cursor_ts
                || (event.timestamp_ms == cursor_ts && event.event_id.as_str() > last_event_id);
            if after_cursor {
                send(&event.event_id, &event.message)?;
            }
        }

        Ok(stream_id.to_string())
    }

    /// Deletes the oldest entries beyond `keep_count`, in batches of ten
    /// committed atomically per batch (spec §4.I).
    #[tracing::instrument(skip(self))]
    pub fn cleanup_old_events(&self, stream_id: &str, keep_count: usize) -> Result<usize> {
        let rows = self.kv.list_by_prefix(&stream_prefix(stream_id))?;
        let mut events: Vec<(Key, StoredEvent)> = rows
            .into_iter()
            .map(|(k, v)| serde_json::from_value(v).map_err(decode_err).map(|e| (k, e)))
            .collect::<Result<_>>()?;
        events.sort_by_key(|(_, e)| e.timestamp_ms);

        if events.len() <= keep_count {
            return Ok(0);
        }
        let to_delete = &events[..events.len() - keep_count];
        let mut deleted = 0;
        for chunk in to_delete.chunks(CLEANUP_BATCH_SIZE) {
            let ops = chunk.iter().map(|(k, _)| Op::delete(k.clone())).collect::<Vec<_>>();
            self.kv
                .atomic_commit(ops)
                .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "cleanup old events", CommitErr(e)))?;
            deleted += chunk.len();
        }
        Ok(deleted)
    }
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode event", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode event", e)
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?}")]
struct CommitErr(bridgemcp_kv::CommitError);
