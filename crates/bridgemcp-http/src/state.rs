//! Shared application state threaded through every Axum handler, following
//! `turbomcp-transport::axum::service::McpAppState`'s single-`Clone`-handle
//! shape: one struct of `Arc`s, cheap to clone per request.

use std::sync::Arc;
use std::time::Duration;

use bridgemcp_auth::{ApiClient, AuthService, AuthorizationHandler, ClientRegistry, OAuthConsumer, OAuthProvider};
use bridgemcp_transport::{EventLog, SessionStore, TransportManager};
use serde::{Deserialize, Serialize};

/// HTTP transport configuration (component L).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bypasses authentication for every endpoint, including `/mcp`. A
    /// deployment-wide escape hatch (spec §4.L); never the default.
    pub skip_authentication: bool,
    pub minimum_token_length: usize,
    pub request_timeout: Duration,
    pub issuer: String,
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            skip_authentication: false,
            minimum_token_length: 20,
            request_timeout: Duration::from_secs(30),
            issuer: "http://localhost:8080".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<OAuthProvider>,
    pub authorize: Arc<AuthorizationHandler>,
    pub clients: Arc<ClientRegistry>,
    pub consumer: Option<Arc<OAuthConsumer>>,
    /// Session-binding hooks for `OAuthProvider::authorize_mcp_request`
    /// (spec §4.H steps 3-4). `None` means session binding is off and a
    /// valid MCP token alone authorizes a request.
    pub auth_service: Option<Arc<dyn AuthService>>,
    pub api_client: Option<Arc<dyn ApiClient>>,
    pub events: Arc<EventLog>,
    pub sessions: Arc<SessionStore>,
    pub transport: Arc<TransportManager>,
    pub config: Arc<HttpConfig>,
}
