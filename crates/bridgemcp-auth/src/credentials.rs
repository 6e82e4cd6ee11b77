//! Credential Store (spec §4.B) — encrypted-at-rest* persistence of
//! third-party OAuth credentials, indexed by `(user, provider)`.
//!
//! \* Encryption-at-rest is delegated to the KV layer's backing storage; this
//! module's contract is the read/write/expiry semantics, not the cipher.

use std::sync::Arc;
use std::time::Duration;

use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, Op, key};
use serde::{Deserialize, Serialize};

use crate::types::ThirdPartyCredentials;

fn primary_key(provider_id: &str, user_id: &str) -> Key {
    key(&["creds", provider_id, user_id])
}

fn index_key(user_id: &str, provider_id: &str) -> Key {
    key(&["creds", "by_user", user_id, provider_id])
}

fn index_prefix(user_id: &str) -> Key {
    key(&["creds", "by_user", user_id])
}

/// Secondary-index row value (spec §4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    provider_id: String,
    stored_at: i64,
    expires_at: i64,
}

/// Encrypted persistence of third-party OAuth credentials.
pub struct CredentialStore {
    kv: Arc<KvStore>,
    clock: SharedClock,
    refresh_buffer: Duration,
}

impl CredentialStore {
    pub fn new(kv: Arc<KvStore>, clock: SharedClock, refresh_buffer: Duration) -> Self {
        Self {
            kv,
            clock,
            refresh_buffer,
        }
    }

    /// Writes both the primary and `by_user` index keys in a single atomic
    /// commit. On update, preserves the original `stored_at`.
    #[tracing::instrument(skip(self, creds))]
    pub fn store(
        &self,
        user_id: &str,
        provider_id: &str,
        mut creds: ThirdPartyCredentials,
    ) -> Result<()> {
        let now = self.clock.now_unix();
        let pkey = primary_key(provider_id, user_id);
        if let Some(existing) = self.read_raw(provider_id, user_id)? {
            creds.stored_at = existing.stored_at;
        } else {
            creds.stored_at = now;
        }

        let index = IndexEntry {
            provider_id: provider_id.to_string(),
            stored_at: creds.stored_at,
            expires_at: creds.expires_at,
        };

        let ops = vec![
            Op::set(pkey, serde_json::to_value(&creds).map_err(encode_err)?),
            Op::set(
                index_key(user_id, provider_id),
                serde_json::to_value(&index).map_err(encode_err)?,
            ),
        ];
        self.kv
            .atomic_commit(ops)
            .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "store credentials", CommitErr(e)))
    }

    /// Returns `None` when the credential is absent *or* its expiry is
    /// within the refresh buffer (spec §4.B). Best-effort touches
    /// `last_used_at` on a hit.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, user_id: &str, provider_id: &str) -> Result<Option<ThirdPartyCredentials>> {
        let Some(mut creds) = self.read_raw(provider_id, user_id)? else {
            return Ok(None);
        };
        let now = self.clock.now_unix();
        if creds.expires_at <= now + self.refresh_buffer.as_secs() as i64 {
            return Ok(None);
        }
        creds.last_used_at = now;
        let pkey = primary_key(provider_id, user_id);
        // Best-effort: failing to record last_used_at must not fail the read.
        let _ = self
            .kv
            .set(&pkey, serde_json::to_value(&creds).unwrap_or_default(), None);
        Ok(Some(creds))
    }

    /// Reads the stored credential ignoring the refresh buffer — used by
    /// callers (like the OAuth Consumer) that need the refresh token even
    /// when the access token itself is considered stale.
    #[tracing::instrument(skip(self))]
    pub fn raw(&self, user_id: &str, provider_id: &str) -> Result<Option<ThirdPartyCredentials>> {
        self.read_raw(provider_id, user_id)
    }

    fn read_raw(&self, provider_id: &str, user_id: &str) -> Result<Option<ThirdPartyCredentials>> {
        let pkey = primary_key(provider_id, user_id);
        match self.kv.get(&pkey)? {
            Some(v) => Ok(Some(serde_json::from_value(v).map_err(decode_err)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&self, user_id: &str, provider_id: &str) -> Result<()> {
        let ops = vec![
            Op::delete(primary_key(provider_id, user_id)),
            Op::delete(index_key(user_id, provider_id)),
        ];
        self.kv
            .atomic_commit(ops)
            .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "delete credentials", CommitErr(e)))
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_all_for_user(&self, user_id: &str) -> Result<usize> {
        let rows = self.kv.list_by_prefix(&index_prefix(user_id))?;
        let mut ops = Vec::new();
        for (_, v) in &rows {
            let entry: IndexEntry = serde_json::from_value(v.clone()).map_err(decode_err)?;
            ops.push(Op::delete(primary_key(&entry.provider_id, user_id)));
            ops.push(Op::delete(index_key(user_id, &entry.provider_id)));
        }
        let count = rows.len();
        if !ops.is_empty() {
            self.kv
                .atomic_commit(ops)
                .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "delete all for user", CommitErr(e)))?;
        }
        Ok(count)
    }

    /// Walks the `by_user` index for every credential expiring within
    /// `buffer` of now, across all users. Index-only; never touches the
    /// primary rows.
    #[tracing::instrument(skip(self))]
    pub fn list_expiring(&self, buffer: Duration) -> Result<Vec<(String, String)>> {
        let rows = self.kv.list_by_prefix(&key(&["creds", "by_user"]))?;
        let threshold = self.clock.now_unix() + buffer.as_secs() as i64;
        let mut out = Vec::new();
        for (k, v) in rows {
            let entry: IndexEntry = serde_json::from_value(v).map_err(decode_err)?;
            if entry.expires_at <= threshold {
                // k = [creds, by_user, user_id, provider_id]
                if let Some(user_id) = k.get(2) {
                    out.push((user_id.clone(), entry.provider_id));
                }
            }
        }
        Ok(out)
    }

    /// Deletes every credential whose expiry has already passed.
    #[tracing::instrument(skip(self))]
    pub fn cleanup_expired(&self) -> Result<usize> {
        let rows = self.kv.list_by_prefix(&key(&["creds", "by_user"]))?;
        let now = self.clock.now_unix();
        let mut ops = Vec::new();
        let mut count = 0;
        for (k, v) in rows {
            let entry: IndexEntry = serde_json::from_value(v).map_err(decode_err)?;
            if entry.expires_at <= now {
                if let Some(user_id) = k.get(2) {
                    ops.push(Op::delete(primary_key(&entry.provider_id, user_id)));
                    ops.push(Op::delete(index_key(user_id, &entry.provider_id)));
                    count += 1;
                }
            }
        }
        if !ops.is_empty() {
            self.kv
                .atomic_commit(ops)
                .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "cleanup expired", CommitErr(e)))?;
        }
        Ok(count)
    }
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode credential record", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode credential record", e)
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?}")]
struct CommitErr(bridgemcp_kv::CommitError);
