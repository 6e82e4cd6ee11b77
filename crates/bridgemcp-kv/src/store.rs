//! The KV Store contract (spec §4.A).
//!
//! `Get`, `Set`, `Delete`, `ListByPrefix`, and `AtomicCommit` — backed by an
//! embedded `sled::Db` for in-process, durable, sub-millisecond point reads.
//! The contract is intentionally narrow: no cross-prefix joins, no query
//! language, just ordered tuple keys and all-or-nothing multi-key commits.

use std::time::Duration;

use bridgemcp_core::time::{Clock, SharedClock, system_clock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::{self, Key};

/// A single operation inside an [`KvStore::atomic_commit`] batch.
#[derive(Debug, Clone)]
pub enum Op {
    Set {
        key: Key,
        value: Value,
        ttl: Option<Duration>,
    },
    Delete {
        key: Key,
    },
}

impl Op {
    pub fn set(key: Key, value: Value) -> Self {
        Op::Set { key, value, ttl: None }
    }

    pub fn set_with_ttl(key: Key, value: Value, ttl: Duration) -> Self {
        Op::Set {
            key,
            value,
            ttl: Some(ttl),
        }
    }

    pub fn delete(key: Key) -> Self {
        Op::Delete { key }
    }
}

/// Raised when an [`KvStore::atomic_commit`] fails. No keys named in the
/// batch are mutated.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit conflict, no keys were mutated")]
    Conflict,
    #[error("storage unavailable: {0}")]
    Storage(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: Value,
    /// Unix seconds after which this entry is considered absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

fn envelope_bytes(value: &Value, ttl: Option<Duration>, clock: &dyn Clock) -> bridgemcp_core::Result<Vec<u8>> {
    let expires_at = ttl.map(|d| clock.now_unix() + d.as_secs() as i64);
    let env = Envelope {
        value: value.clone(),
        expires_at,
    };
    serde_json::to_vec(&env)
        .map_err(|e| bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::Internal, "encode kv value", e))
}

fn decode_envelope(bytes: &[u8], clock: &dyn Clock) -> bridgemcp_core::Result<Option<Value>> {
    let env: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::Internal, "decode kv value", e))?;
    if let Some(exp) = env.expires_at {
        if clock.now_unix() >= exp {
            return Ok(None);
        }
    }
    Ok(Some(env.value))
}

/// An in-process durable ordered key-value store.
pub struct KvStore {
    db: sled::Db,
    clock: SharedClock,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

impl KvStore {
    /// Opens (or creates) a durable store at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> bridgemcp_core::Result<Self> {
        let db = sled::open(path).map_err(|e| {
            bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::StorageUnavailable, "open kv store", e)
        })?;
        Ok(Self { db, clock: system_clock() })
    }

    /// An ephemeral in-memory store, for tests.
    pub fn temporary() -> bridgemcp_core::Result<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(|e| {
            bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::StorageUnavailable, "open temp kv store", e)
        })?;
        Ok(Self { db, clock: system_clock() })
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    #[tracing::instrument(skip(self))]
    pub fn get(&self, key: &Key) -> bridgemcp_core::Result<Option<Value>> {
        let encoded = keys::encode(key);
        match self.db.get(&encoded).map_err(storage_err)? {
            Some(bytes) => decode_envelope(&bytes, self.clock.as_ref()),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, value))]
    pub fn set(&self, key: &Key, value: Value, ttl: Option<Duration>) -> bridgemcp_core::Result<()> {
        let encoded = keys::encode(key);
        let bytes = envelope_bytes(&value, ttl, self.clock.as_ref())?;
        self.db.insert(encoded, bytes).map_err(storage_err)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&self, key: &Key) -> bridgemcp_core::Result<()> {
        let encoded = keys::encode(key);
        self.db.remove(encoded).map_err(storage_err)?;
        Ok(())
    }

    /// Inclusive-of-prefix range scan, ordered by key bytes ascending.
    #[tracing::instrument(skip(self))]
    pub fn list_by_prefix(&self, prefix: &Key) -> bridgemcp_core::Result<Vec<(Key, Value)>> {
        let encoded_prefix = keys::encode(prefix);
        let mut out = Vec::new();
        for item in self.db.scan_prefix(&encoded_prefix) {
            let (k, v) = item.map_err(storage_err)?;
            if let Some(value) = decode_envelope(&v, self.clock.as_ref())? {
                out.push((keys::decode(&k), value));
            }
        }
        Ok(out)
    }

    /// Applies every op in `ops` atomically: all succeed, or none are
    /// mutated. Conflicts (e.g. a concurrent writer beat this commit through
    /// sled's internal CAS loop) return [`CommitError::Conflict`].
    #[tracing::instrument(skip(self, ops))]
    pub fn atomic_commit(&self, ops: Vec<Op>) -> std::result::Result<(), CommitError> {
        let clock = self.clock.clone();
        let result = self
            .db
            .transaction(move |tx| {
                for op in &ops {
                    match op {
                        Op::Set { key, value, ttl } => {
                            let encoded = keys::encode(key);
                            let bytes = envelope_bytes(value, *ttl, clock.as_ref())
                                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e))?;
                            tx.insert(encoded, bytes)?;
                        }
                        Op::Delete { key } => {
                            let encoded = keys::encode(key);
                            tx.remove(encoded)?;
                        }
                    }
                }
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(sled::transaction::TransactionError::Abort(_)) => Err(CommitError::Conflict),
            Err(sled::transaction::TransactionError::Storage(e)) => Err(CommitError::Storage(e.to_string())),
        }
    }

    /// Sweeps expired entries under `prefix`. Best-effort; called
    /// periodically by the Transport Manager at boot per SPEC_FULL §3.
    pub fn cleanup_expired(&self, prefix: &Key) -> bridgemcp_core::Result<usize> {
        let mut removed = 0;
        let encoded_prefix = keys::encode(prefix);
        let mut to_remove = Vec::new();
        for item in self.db.scan_prefix(&encoded_prefix) {
            let (k, v) = item.map_err(storage_err)?;
            let env: Envelope = serde_json::from_slice(&v).map_err(|e| {
                bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::Internal, "decode kv value", e)
            })?;
            if let Some(exp) = env.expires_at {
                if self.clock.now_unix() >= exp {
                    to_remove.push(k);
                }
            }
        }
        for k in to_remove {
            self.db.remove(k).map_err(storage_err)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn storage_err(e: sled::Error) -> bridgemcp_core::Error {
    bridgemcp_core::Error::with_source(bridgemcp_core::ErrorKind::StorageUnavailable, "kv store I/O error", e)
}
