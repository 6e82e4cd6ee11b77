//! Session Persistence (spec §4.J) — durable session descriptors surviving
//! a process restart, indexed by `(session_id)` and `(user_id, session_id)`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, Op, key};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANONYMOUS: &str = "anonymous";

fn primary_key(session_id: &str) -> Key {
    key(&["transport", "session", session_id])
}

fn index_key(user_id: &str, session_id: &str) -> Key {
    key(&["transport", "session_by_user", user_id, session_id])
}

fn index_prefix(user_id: &str) -> Key {
    key(&["transport", "session_by_user", user_id])
}

fn all_sessions_prefix() -> Key {
    key(&["transport", "session"])
}

/// Which transport this session was opened on, per the Transport Manager's
/// construction-time choice (spec §4.K).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Http,
    Stdio,
}

/// A persisted session descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: i64,
    pub last_active_at: i64,
    pub active: bool,
}

pub struct SessionStore {
    kv: Arc<KvStore>,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(kv: Arc<KvStore>, clock: SharedClock) -> Self {
        Self { kv, clock }
    }

    /// Writes the primary record and the `session_by_user` index record in
    /// one atomic commit (spec §4.J); sessions with no `user_id` index under
    /// the literal `"anonymous"` user per spec §6's key layout.
    #[tracing::instrument(skip(self, metadata))]
    pub fn persist_session(
        &self,
        session_id: &str,
        transport: TransportKind,
        user_id: Option<String>,
        metadata: Option<Value>,
    ) -> Result<()> {
        let now = self.clock.now_unix();
        let info = SessionInfo {
            session_id: session_id.to_string(),
            transport,
            user_id: user_id.clone(),
            metadata,
            created_at: now,
            last_active_at: now,
            active: true,
        };

        let index_user = user_id.as_deref().unwrap_or(ANONYMOUS);
        let ops = vec![
            Op::set(primary_key(session_id), serde_json::to_value(&info).map_err(encode_err)?),
            Op::set(index_key(index_user, session_id), serde_json::json!(true)),
        ];
        self.kv
            .atomic_commit(ops)
            .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "persist session", CommitErr(e)))
    }

    #[tracing::instrument(skip(self))]
    pub fn update_activity(&self, session_id: &str) -> Result<()> {
        let Some(mut info) = self.get_info(session_id)? else {
            return Err(Error::new(ErrorKind::InvalidRequest, "unknown session"));
        };
        info.last_active_at = self.clock.now_unix();
        self.kv
            .set(&primary_key(session_id), serde_json::to_value(&info).map_err(encode_err)?, None)
    }

    #[tracing::instrument(skip(self))]
    pub fn mark_inactive(&self, session_id: &str) -> Result<()> {
        let Some(mut info) = self.get_info(session_id)? else {
            return Ok(());
        };
        info.active = false;
        self.kv
            .set(&primary_key(session_id), serde_json::to_value(&info).map_err(encode_err)?, None)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        match self.kv.get(&primary_key(session_id))? {
            Some(v) => Ok(Some(serde_json::from_value(v).map_err(decode_err)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn get_user_sessions(&self, user_id: &str) -> Result<Vec<SessionInfo>> {
        let rows = self.kv.list_by_prefix(&index_prefix(user_id))?;
        let mut out = Vec::with_capacity(rows.len());
        for (k, _) in rows {
            if let Some(session_id) = k.last() {
                if let Some(info) = self.get_info(session_id)? {
                    out.push(info);
                }
            }
        }
        Ok(out)
    }

    #[tracing::instrument(skip(self))]
    pub fn get_active_sessions(&self) -> Result<Vec<SessionInfo>> {
        let rows = self.kv.list_by_prefix(&all_sessions_prefix())?;
        let mut out = Vec::new();
        for (_, v) in rows {
            let info: SessionInfo = serde_json::from_value(v).map_err(decode_err)?;
            if info.active {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Deletes every session (primary + `by_user` index) whose `last_active_at`
    /// is older than `max_age`.
    #[tracing::instrument(skip(self))]
    pub fn cleanup_old_sessions(&self, max_age: Duration) -> Result<usize> {
        let rows = self.kv.list_by_prefix(&all_sessions_prefix())?;
        let threshold = self.clock.now_unix() - max_age.as_secs() as i64;
        let mut ops = Vec::new();
        let mut count = 0;
        for (_, v) in rows {
            let info: SessionInfo = serde_json::from_value(v).map_err(decode_err)?;
            if info.last_active_at < threshold {
                ops.push(Op::delete(primary_key(&info.session_id)));
                let index_user = info.user_id.as_deref().unwrap_or(ANONYMOUS);
                ops.push(Op::delete(index_key(index_user, &info.session_id)));
                count += 1;
            }
        }
        if !ops.is_empty() {
            self.kv
                .atomic_commit(ops)
                .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "cleanup old sessions", CommitErr(e)))?;
        }
        Ok(count)
    }
}

/// Reconstructs and reconnects a transport for one restored session. The
/// implementation owns inserting the transport into the live map — that
/// insertion cannot be deferred to the caller, because a client reconnect
/// can race the first post-restart message (spec §4.J).
#[async_trait]
pub trait SessionRestorer: Send + Sync {
    async fn restore(&self, info: &SessionInfo) -> Result<()>;
}

/// Walks every active session and asks `restorer` to reconstruct and
/// reconnect it, registering a close handler that marks it inactive on
/// disconnect (spec §4.J). Returns the number of sessions restored.
#[tracing::instrument(skip(store, restorer))]
pub async fn restore_sessions(store: &SessionStore, restorer: &dyn SessionRestorer) -> Result<usize> {
    let active = store.get_active_sessions()?;
    let mut restored = 0;
    for info in &active {
        restorer.restore(info).await?;
        restored += 1;
    }
    Ok(restored)
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode session", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode session", e)
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?}")]
struct CommitErr(bridgemcp_kv::CommitError);
