//! Wires components A-M into one bootable gateway, following the shape of
//! the teacher's `turbomcp-server::server` module: a single builder function
//! that returns a ready-to-run handle plus whatever background tasks it
//! spawned.

use std::sync::Arc;

use async_trait::async_trait;
use bridgemcp_auth::config::ConsumerConfig;
use bridgemcp_auth::{
    ApiClient, AuthService, AuthorizationHandler, ClientRegistry, ConsumerSessionBinding, CredentialStore,
    GenericAdapter, OAuthConsumer, OAuthProvider, TokenManager,
};
use bridgemcp_core::time::{system_clock, SharedClock};
use bridgemcp_core::Result;
use bridgemcp_http::AppState;
use bridgemcp_kv::KvStore;
use bridgemcp_transport::{
    restore_sessions, EventLog, SessionInfo, SessionRestorer, SessionStore, TransportChoice, TransportConfig,
    TransportManager, TransportManagerConfig,
};

use crate::config::ServerConfig;

/// A fully wired gateway: the Axum state handlers need, plus the handles a
/// long-running process uses to supervise itself.
pub struct Server {
    pub state: AppState,
    pub kv: Arc<KvStore>,
    pub clock: SharedClock,
    pub transport_config: TransportConfig,
}

/// Startup-only session restorer: a restart cannot reopen a client's HTTP
/// or STDIO socket by itself, so this just records that the session is
/// known and leaves it to the client to reconnect with the same id (spec
/// §4.J — reconstruction is the restorer's job; here that job is a no-op
/// because there is no live socket to hand back yet).
struct LoggingRestorer;

#[async_trait]
impl SessionRestorer for LoggingRestorer {
    async fn restore(&self, info: &SessionInfo) -> Result<()> {
        tracing::info!(session_id = %info.session_id, transport = ?info.transport, "restored session descriptor");
        Ok(())
    }
}

/// Builds every component from `config`, opening the KV store, then
/// restoring persisted sessions and spawning the periodic cleanup sweep
/// (spec §3: `CleanupExpired`, `CleanupOldEvents`, `CleanupOldSessions`).
pub async fn bootstrap(config: ServerConfig) -> anyhow::Result<Server> {
    let clock = system_clock();
    let kv = Arc::new(match &config.kv.data_dir {
        Some(dir) => KvStore::open(dir)?,
        None => KvStore::temporary()?,
    });

    let clients = Arc::new(ClientRegistry::new(
        kv.clone(),
        clock.clone(),
        config.auth.clients.clone(),
        config.auth.require_https_redirects,
    ));
    let tokens = Arc::new(TokenManager::new(kv.clone(), clock.clone(), clients.clone(), config.auth.tokens.clone()));
    let authorize = Arc::new(AuthorizationHandler::new(
        kv.clone(),
        clock.clone(),
        clients.clone(),
        tokens.clone(),
        config.auth.tokens.authorization_code_ttl,
    ));
    let provider = Arc::new(OAuthProvider::new(tokens.clone(), authorize.clone(), clock.clone()));

    let credentials = Arc::new(CredentialStore::new(kv.clone(), clock.clone(), config.auth.credentials.refresh_buffer));
    let (consumer, auth_service, api_client) =
        build_consumer(&config.auth.consumer, kv.clone(), clock.clone(), credentials.clone())?;

    let events = Arc::new(EventLog::new(kv.clone(), clock.clone()));
    let sessions = Arc::new(SessionStore::new(kv.clone(), clock.clone()));
    let transport = Arc::new(TransportManager::new(TransportManagerConfig {
        transport: config.transport.choice,
        oauth_enabled: config.transport.oauth_enabled,
        oauth_provider_available: consumer.is_some(),
    })?);

    restore_sessions(&sessions, &LoggingRestorer).await?;
    spawn_cleanup_sweep(sessions.clone(), events.clone(), credentials, config.transport.clone());

    let state = AppState {
        provider,
        authorize,
        clients,
        consumer,
        auth_service,
        api_client,
        events,
        sessions,
        transport,
        config: Arc::new(config.http.clone()),
    };

    Ok(Server {
        state,
        kv,
        clock,
        transport_config: config.transport,
    })
}

/// `ConsumerConfig::client_id` empty means no upstream provider is
/// configured — session binding stays off and a valid MCP token alone
/// authorizes a request (spec §4.H).
fn build_consumer(
    config: &ConsumerConfig,
    kv: Arc<KvStore>,
    clock: SharedClock,
    credentials: Arc<CredentialStore>,
) -> anyhow::Result<(Option<Arc<OAuthConsumer>>, Option<Arc<dyn AuthService>>, Option<Arc<dyn ApiClient>>)> {
    if config.client_id.is_empty() {
        return Ok((None, None, None));
    }

    let adapter: Arc<dyn bridgemcp_auth::ThirdPartyAdapter> = Arc::new(GenericAdapter::new(config)?);
    let consumer = Arc::new(OAuthConsumer::new(
        kv,
        clock,
        credentials.clone(),
        adapter.clone(),
        config.provider_id.clone(),
        config.use_pkce,
        config.authorization_request_ttl,
    ));

    let binding = Arc::new(ConsumerSessionBinding::new(credentials, adapter, config.provider_id.clone()));
    let auth_service: Arc<dyn AuthService> = binding.clone();
    let api_client: Arc<dyn ApiClient> = binding;

    Ok((Some(consumer), Some(auth_service), Some(api_client)))
}

fn spawn_cleanup_sweep(
    sessions: Arc<SessionStore>,
    events: Arc<EventLog>,
    credentials: Arc<CredentialStore>,
    config: TransportConfig,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.cleanup_interval);
        loop {
            interval.tick().await;
            match sessions.cleanup_old_sessions(config.session_max_age) {
                Ok(removed) if removed > 0 => tracing::info!(removed, "cleaned up stale sessions"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "session cleanup failed"),
            }
            if let Ok(active) = sessions.get_active_sessions() {
                for info in active {
                    if let Err(e) = events.cleanup_old_events(&info.session_id, config.event_retention_count) {
                        tracing::warn!(error = %e, session_id = %info.session_id, "event log cleanup failed");
                    }
                }
            }
            match credentials.cleanup_expired() {
                Ok(removed) if removed > 0 => tracing::info!(removed, "cleaned up expired credentials"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "credential cleanup failed"),
            }
        }
    });
}

/// STDIO serve loop: reads framed JSON-RPC lines from stdin, persists a
/// session descriptor, logs each message to the Event Log, and writes an
/// acknowledgement to stdout. STDIO is a single local, trusted connection
/// (spec §4.K), so it runs outside the HTTP authentication middleware.
pub async fn serve_stdio(server: Server) -> anyhow::Result<()> {
    use bridgemcp_transport::{StdioTransport, TransportKind};

    let transport = StdioTransport::new(tokio::io::stdin(), tokio::io::stdout());
    transport.connect();
    let session_id = bridgemcp_core::ids::random_state();
    server.state.sessions.persist_session(&session_id, TransportKind::Stdio, None, None)?;

    while let Some(message) = transport.receive().await? {
        server.state.events.store_event(&session_id, message.clone())?;
        server.state.sessions.update_activity(&session_id)?;
        let id = message.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let reply = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": { "authenticated": false } });
        server.state.events.store_event(&session_id, reply.clone())?;
        transport.send(&reply).await?;
    }

    server.state.sessions.mark_inactive(&session_id)?;
    transport.disconnect();
    Ok(())
}

/// HTTP serve loop: binds `http.bind_addr` and runs the Axum router built
/// by `bridgemcp_http::build_router` (spec §4.L).
pub async fn serve_http(server: Server) -> anyhow::Result<()> {
    let addr = server.state.config.bind_addr.clone();
    let router = bridgemcp_http::build_router(server.state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "bridgemcp-server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn serve(server: Server) -> anyhow::Result<()> {
    match server.transport_config.choice {
        TransportChoice::Http => serve_http(server).await,
        TransportChoice::Stdio => serve_stdio(server).await,
    }
}
