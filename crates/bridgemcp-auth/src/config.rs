//! Authentication configuration types.
//!
//! Follows `turbomcp-auth::config::AuthConfig`'s shape: nested, serde
//! deserializable structs with `Default` impls rather than hand-parsed env
//! vars, so the whole tree can be loaded from TOML/env by `bridgemcp-server`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the authorization subsystem (components B-H).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: TokenConfig,
    pub credentials: CredentialConfig,
    pub clients: ClientRegistryConfig,
    pub consumer: ConsumerConfig,
    /// Require HTTPS (or `http://localhost`) redirect URIs (spec §3).
    pub require_https_redirects: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            credentials: CredentialConfig::default(),
            clients: ClientRegistryConfig::default(),
            consumer: ConsumerConfig::default(),
            require_https_redirects: true,
        }
    }
}

/// Token Manager configuration (component C).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub authorization_code_ttl: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_ttl: Duration::from_secs(600), // 10 min, spec §3
            access_token_ttl: Duration::from_secs(3600),      // 1 h, spec §4.C
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600), // 30 d
        }
    }
}

/// Credential Store configuration (component B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Minimum slack before expiry during which a credential is treated as
    /// absent (spec §3, "refresh buffer").
    pub refresh_buffer: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(300),
        }
    }
}

/// Client Registry configuration (component E).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientRegistryConfig {
    /// Non-empty allow-list of redirect URI hosts. Empty means "any host",
    /// subject to the HTTPS/localhost scheme rule.
    pub redirect_host_allow_list: Vec<String>,
}

impl Default for ClientRegistryConfig {
    fn default() -> Self {
        Self {
            redirect_host_allow_list: Vec::new(),
        }
    }
}

/// OAuth Consumer configuration (component G) — the third-party provider
/// this gateway authenticates against on the user's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub provider_id: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub use_pkce: bool,
    pub authorization_request_ttl: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            provider_id: "default".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: String::new(),
            token_url: String::new(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            use_pkce: true,
            authorization_request_ttl: Duration::from_secs(600),
        }
    }
}
