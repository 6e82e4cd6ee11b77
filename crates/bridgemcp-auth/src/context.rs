//! Request Context (spec §4.M) — a scoped, read-through identity handle.
//!
//! Implemented as an explicit [`Context`] value that can be threaded as a
//! function parameter (matching how the teacher's
//! `turbomcp-server::context::RequestContext` is built and passed down the
//! handler stack), plus a `tokio::task_local!` scope —
//! [`execute_with_auth_context`] — for the one boundary (spec §4.L) where the
//! HTTP transport needs to hand identity to downstream code without
//! threading a parameter through every layer. The task-local is the scoping
//! primitive, never a shared mutable global: each Tokio task gets its own
//! binding, so concurrent requests on the HTTP transport cannot bleed
//! identities into each other.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bridgemcp_core::time::SharedClock;
use serde_json::Value;

/// The identity and claims bound to one authorized MCP request.
#[derive(Debug, Clone)]
pub struct Context {
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    metadata: HashMap<String, Value>,
    started_at: i64,
    clock: SharedClock,
}

impl Context {
    pub fn new(client_id: String, user_id: String, scopes: Vec<String>, clock: SharedClock) -> Self {
        let started_at = clock.now_unix();
        Self {
            client_id,
            user_id,
            scopes,
            metadata: HashMap::new(),
            started_at,
            clock,
        }
    }

    /// Reads a metadata value previously set with [`Context::update_metadata`].
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn has_all_scopes(&self, required: &[&str]) -> bool {
        required.iter().all(|s| self.has_scope(s))
    }

    /// Wall-clock time elapsed since this context was created.
    pub fn duration(&self) -> Duration {
        let elapsed = (self.clock.now_unix() - self.started_at).max(0);
        Duration::from_secs(elapsed as u64)
    }

    pub fn update_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

tokio::task_local! {
    static CURRENT: Context;
}

/// Runs `f` with `ctx` bound as the current task-local context. Nested calls
/// restore the outer context on return, since `tokio::task_local!` scopes
/// are themselves stack-like within one task.
pub async fn execute_with_auth_context<F, Fut, T>(ctx: Context, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    CURRENT.scope(ctx, f()).await
}

/// Reads the current task-local context, if any. Outside a scope (or on a
/// task that never entered one), this is "no context" — `None`, never a
/// stale value from an unrelated request.
pub fn current() -> Option<Context> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}
