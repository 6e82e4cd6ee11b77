//! `POST /mcp` and `GET /mcp` (spec §4.L, §6) — JSON-RPC 2.0 framing plus a
//! resumable SSE stream backed by the Event Log. Method dispatch for actual
//! MCP tools/resources is outside spec.md's thirteen components; this
//! handler's job is the transport and session-binding envelope around
//! whatever engine an embedder plugs in, so it replies with a minimal
//! acknowledgement that reflects the authenticated identity.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use bridgemcp_auth::current;
use bridgemcp_transport::TransportKind;
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error_response::ApiError;
use crate::state::AppState;

const SESSION_HEADER: &str = "Mcp-Session-Id";

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[tracing::instrument(skip(state, headers, body))]
pub async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let ctx = current();
    let session_id = session_id_from(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());

    if state.sessions.get_info(&session_id)?.is_none() {
        state
            .sessions
            .persist_session(&session_id, TransportKind::Http, ctx.as_ref().map(|c| c.user_id.clone()), None)?;
    } else {
        state.sessions.update_activity(&session_id)?;
    }

    let request_id = body.get("id").cloned().unwrap_or(Value::Null);
    let message = json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "result": {
            "authenticated": ctx.is_some(),
            "client_id": ctx.as_ref().map(|c| c.client_id.clone()),
            "user_id": ctx.as_ref().map(|c| c.user_id.clone()),
        },
    });

    state.events.store_event(&session_id, message.clone())?;
    state.transport.record_request();

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = axum::http::HeaderValue::from_str(&session_id) {
        response_headers.insert(SESSION_HEADER, value);
    }
    Ok((response_headers, Json(message)))
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct McpSseQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Resumable SSE stream. A `Last-Event-ID` header replays every event
/// strictly after the given cursor (spec §4.I) before the connection
/// settles into keep-alives.
#[tracing::instrument(skip(state, headers))]
pub async fn mcp_sse(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<McpSseQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = query.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let last_event_id = headers.get("Last-Event-Id").and_then(|v| v.to_str().ok()).map(str::to_string);

    let mut replayed = Vec::new();
    if let Some(cursor) = &last_event_id {
        let _ = state.events.replay_events_after(cursor, |event_id, message| {
            replayed.push(Event::default().id(event_id).data(message.to_string()));
            Ok(())
        });
    }

    let connected_event = state
        .events
        .store_event(&session_id, json!({ "type": "connected", "session_id": session_id }))
        .map(|event_id| Event::default().id(event_id).event("connected").data(session_id.clone()));

    replayed.extend(connected_event);
    let stream = stream::iter(replayed.into_iter().map(Ok));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgemcp_auth::config::{ClientRegistryConfig, TokenConfig};
    use bridgemcp_auth::{AuthorizationHandler, ClientRegistry, OAuthProvider, TokenManager};
    use bridgemcp_core::time::SharedClock;
    use bridgemcp_kv::KvStore;
    use bridgemcp_transport::{EventLog, SessionStore, TransportChoice, TransportManager, TransportManagerConfig};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn harness() -> AppState {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock: SharedClock = bridgemcp_core::time::system_clock();
        let clients = Arc::new(ClientRegistry::new(kv.clone(), clock.clone(), ClientRegistryConfig::default(), true));
        let tokens = Arc::new(TokenManager::new(kv.clone(), clock.clone(), clients.clone(), TokenConfig::default()));
        let authorize = Arc::new(AuthorizationHandler::new(
            kv.clone(),
            clock.clone(),
            clients.clone(),
            tokens.clone(),
            StdDuration::from_secs(600),
        ));
        let provider = Arc::new(OAuthProvider::new(tokens, authorize.clone(), clock.clone()));
        let transport = Arc::new(
            TransportManager::new(TransportManagerConfig {
                transport: TransportChoice::Http,
                oauth_enabled: false,
                oauth_provider_available: false,
            })
            .unwrap(),
        );

        AppState {
            provider,
            authorize,
            clients,
            consumer: None,
            auth_service: None,
            api_client: None,
            events: Arc::new(EventLog::new(kv.clone(), clock.clone())),
            sessions: Arc::new(SessionStore::new(kv, clock)),
            transport,
            config: Arc::new(crate::state::HttpConfig::default()),
        }
    }

    #[tokio::test]
    async fn mcp_post_persists_a_new_session_and_echoes_its_id() {
        let state = harness();
        let (headers, Json(body)) = mcp_post(State(state.clone()), HeaderMap::new(), Json(json!({"id": 7})))
            .await
            .unwrap();

        let session_id = headers.get(SESSION_HEADER).unwrap().to_str().unwrap().to_string();
        assert!(state.sessions.get_info(&session_id).unwrap().is_some());
        assert_eq!(body["id"], json!(7));
        assert_eq!(body["result"]["authenticated"], json!(false));
    }

    #[tokio::test]
    async fn mcp_post_reuses_a_session_id_supplied_by_the_client() {
        let state = harness();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, "sess-123".parse().unwrap());
        mcp_post(State(state.clone()), headers, Json(json!({"id": 1}))).await.unwrap();
        assert!(state.sessions.get_info("sess-123").unwrap().is_some());

        let mut headers2 = HeaderMap::new();
        headers2.insert(SESSION_HEADER, "sess-123".parse().unwrap());
        let (out_headers, _) = mcp_post(State(state.clone()), headers2, Json(json!({"id": 2}))).await.unwrap();
        assert_eq!(out_headers.get(SESSION_HEADER).unwrap().to_str().unwrap(), "sess-123");
    }
}
