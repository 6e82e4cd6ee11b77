//! Data model types from spec §3.

use serde::{Deserialize, Serialize};

/// Client Registration (spec §3). Unique by `client_id`; immutable except
/// for the soft `revoked` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub code_challenge_methods: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub revoked: bool,
}

/// Authorization Code (spec §3). Single-use; deleted on first exchange
/// attempt regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Access Token record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub access_token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Refresh Token record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub refresh_token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Authorization Request / binding record (spec §3, §4.F). Created when an
/// MCP client starts authorization, consumed when the upstream callback
/// arrives. One-time use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpAuthorizationRequest {
    pub mcp_client_id: String,
    pub mcp_redirect_uri: String,
    pub mcp_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub upstream_state: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Pending third-party authorization flow (spec §4.G), keyed by the random
/// `state` value returned to the caller from `StartAuthorizationFlow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerAuthorizationRequest {
    pub state: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Third-Party Credentials (spec §3), keyed by `(user_id, provider_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThirdPartyCredentials {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: i64,
    pub scopes: Vec<String>,
    pub stored_at: i64,
    pub last_used_at: i64,
}

/// Issued token pair returned from the token endpoint (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Outcome of [`crate::tokens::TokenManager::validate_access_token`].
#[derive(Debug, Clone)]
pub struct TokenValidation {
    pub valid: bool,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
}

impl TokenValidation {
    pub fn invalid(error: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            valid: false,
            client_id: None,
            user_id: None,
            scopes: None,
            error: Some(error.into()),
            error_code: Some(error_code),
        }
    }

    pub fn valid(client_id: String, user_id: String, scopes: Vec<String>) -> Self {
        Self {
            valid: true,
            client_id: Some(client_id),
            user_id: Some(user_id),
            scopes: Some(scopes),
            error: None,
            error_code: None,
        }
    }
}

pub fn scope_to_string(scope: &[String]) -> String {
    scope.join(" ")
}

pub fn scope_from_string(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}
