//! Authentication middleware (spec §4.L) — bearer extraction, validation
//! via the OAuth Provider coordinator, and request-context annotation.
//! Mounted only on the router's protected route group; the endpoint access
//! policy itself (which paths skip auth) lives in `router.rs`.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bridgemcp_auth::{execute_with_auth_context, Context};
use bridgemcp_core::time::SharedClock;
use serde_json::json;

use crate::state::AppState;

fn denied(status: StatusCode, error_code: &str, message: &str) -> Response {
    (
        status,
        axum::Json(json!({ "error": error_code, "error_description": message })),
    )
        .into_response()
}

/// Extracts and validates the bearer token, annotates the request with the
/// identity headers the spec names, and runs the rest of the stack inside
/// an `execute_with_auth_context` scope (spec §4.L steps 1-4).
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if state.config.skip_authentication {
        return next.run(request).await;
    }

    let Some(header) = request.headers().get(axum::http::header::AUTHORIZATION) else {
        return denied(StatusCode::UNAUTHORIZED, "missing_token", "Authorization header is required");
    };
    let Ok(header_str) = header.to_str() else {
        return denied(
            StatusCode::UNAUTHORIZED,
            "invalid_authorization_header_format",
            "Authorization header is not valid UTF-8",
        );
    };
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return denied(
            StatusCode::UNAUTHORIZED,
            "invalid_authorization_header_format",
            "Authorization header must use the Bearer scheme",
        );
    };
    if token.is_empty() {
        return denied(
            StatusCode::UNAUTHORIZED,
            "invalid_authorization_header_format",
            "Authorization header carries an empty token",
        );
    }
    if token.len() < state.config.minimum_token_length {
        return denied(StatusCode::UNAUTHORIZED, "token_too_short", "access token is too short to be valid");
    }

    let ctx = match state
        .provider
        .authorize_mcp_request(header_str, state.auth_service.as_deref(), state.api_client.as_deref())
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let status = StatusCode::from_u16(e.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return denied(status, e.kind.code(), &e.message);
        }
    };

    if !ctx.authorized {
        let status = if ctx.error_code == Some("third_party_reauth_required") {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::UNAUTHORIZED
        };
        return denied(
            status,
            ctx.error_code.unwrap_or("invalid_token"),
            ctx.error.as_deref().unwrap_or("request is not authorized"),
        );
    }

    let client_id = ctx.client_id.clone().unwrap_or_default();
    let user_id = ctx.user_id.clone().unwrap_or_default();
    let scopes = ctx.scopes.clone();

    let headers = request.headers_mut();
    headers.insert("X-MCP-Client-ID", HeaderValue::from_str(&client_id).unwrap_or(HeaderValue::from_static("")));
    headers.insert("X-MCP-User-ID", HeaderValue::from_str(&user_id).unwrap_or(HeaderValue::from_static("")));
    headers.insert(
        "X-MCP-Scope",
        HeaderValue::from_str(&scopes.join(" ")).unwrap_or(HeaderValue::from_static("")),
    );
    headers.insert("X-MCP-Authenticated", HeaderValue::from_static("true"));

    let clock: SharedClock = state.provider.clock().clone();
    let mcp_context = Context::new(client_id, user_id, scopes, clock);

    execute_with_auth_context(mcp_context, || next.run(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use bridgemcp_auth::config::{ClientRegistryConfig, TokenConfig};
    use bridgemcp_auth::{AuthorizationHandler, ClientRegistry, OAuthProvider, TokenManager};
    use bridgemcp_kv::KvStore;
    use bridgemcp_transport::{EventLog, SessionStore, TransportChoice, TransportManager, TransportManagerConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn harness(skip_auth: bool) -> (AppState, String) {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock: SharedClock = bridgemcp_core::time::system_clock();
        let clients = Arc::new(ClientRegistry::new(kv.clone(), clock.clone(), ClientRegistryConfig::default(), true));
        let resp = clients
            .register_client(bridgemcp_auth::ClientRegistrationRequest {
                redirect_uris: vec!["https://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap();
        let tokens = Arc::new(TokenManager::new(kv.clone(), clock.clone(), clients.clone(), TokenConfig::default()));
        let authorize = Arc::new(AuthorizationHandler::new(
            kv.clone(),
            clock.clone(),
            clients.clone(),
            tokens.clone(),
            Duration::from_secs(600),
        ));
        let token_resp = tokens.generate_access_token(&resp.client_id, "u1", false, vec!["read".into()]).unwrap();
        let provider = Arc::new(OAuthProvider::new(tokens, authorize.clone(), clock.clone()));
        let transport = Arc::new(
            TransportManager::new(TransportManagerConfig {
                transport: TransportChoice::Http,
                oauth_enabled: false,
                oauth_provider_available: false,
            })
            .unwrap(),
        );

        let state = AppState {
            provider,
            authorize,
            clients,
            consumer: None,
            auth_service: None,
            api_client: None,
            events: Arc::new(EventLog::new(kv.clone(), clock.clone())),
            sessions: Arc::new(SessionStore::new(kv, clock)),
            transport,
            config: Arc::new(crate::state::HttpConfig {
                skip_authentication: skip_auth,
                minimum_token_length: 20,
                ..Default::default()
            }),
        };
        (state, token_resp.access_token)
    }

    async fn ok_handler() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let (state, _token) = harness(false);
        let app = Router::new()
            .route("/protected", get(ok_handler))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_is_accepted_and_headers_are_set() {
        let (state, token) = harness(false);
        let app = Router::new()
            .route("/protected", get(ok_handler))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/protected")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn skip_authentication_bypasses_everything() {
        let (state, _token) = harness(true);
        let app = Router::new()
            .route("/protected", get(ok_handler))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
