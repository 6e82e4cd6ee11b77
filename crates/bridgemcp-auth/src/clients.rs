//! Client Registry (spec §4.E) — RFC 7591 dynamic client registration and
//! redirect-URI allow-listing.

use std::sync::Arc;

use bridgemcp_core::ids::{random_client_id, random_client_secret};
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, key};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ClientRegistryConfig;
use crate::types::ClientRegistration;

fn client_key(client_id: &str) -> Key {
    key(&["oauth_clients", "registrations", client_id])
}

/// Request body for `POST /register` (RFC 7591).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistrationRequest {
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// RFC 7591 registration response.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub code_challenge_methods_supported: Vec<String>,
}

/// Structured validity result from [`ClientRegistry::validate_client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientValidity {
    Valid,
    NotFound,
    Revoked,
    RedirectUriNotRegistered,
}

pub struct ClientRegistry {
    kv: Arc<KvStore>,
    clock: SharedClock,
    config: ClientRegistryConfig,
    require_https: bool,
}

impl ClientRegistry {
    pub fn new(
        kv: Arc<KvStore>,
        clock: SharedClock,
        config: ClientRegistryConfig,
        require_https: bool,
    ) -> Self {
        Self {
            kv,
            clock,
            config,
            require_https,
        }
    }

    /// Every redirect URI must parse as an absolute URL whose host is in the
    /// allow-list (if non-empty); if HTTPS is required, only `https` or
    /// `http://localhost` are accepted (spec §3).
    pub fn validate_redirect_uri(&self, uri: &str) -> Result<()> {
        let parsed = Url::parse(uri)
            .map_err(|_| Error::new(ErrorKind::InvalidRequest, format!("redirect_uri `{uri}` is not an absolute URL")))?;

        let is_localhost_http = parsed.scheme() == "http"
            && matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));

        if self.require_https && parsed.scheme() != "https" && !is_localhost_http {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                format!("redirect_uri `{uri}` must use https or http://localhost"),
            ));
        }

        if !self.config.redirect_host_allow_list.is_empty() {
            let host = parsed.host_str().unwrap_or_default();
            if !self
                .config
                .redirect_host_allow_list
                .iter()
                .any(|allowed| allowed == host)
            {
                return Err(Error::new(
                    ErrorKind::InvalidRequest,
                    format!("redirect_uri host `{host}` is not in the allow-list"),
                ));
            }
        }

        Ok(())
    }

    /// Registers a new client. PKCE-only public clients (no `client_secret`
    /// requested via `token_endpoint_auth_method: "none"`) receive no
    /// secret, per spec §9's fix to the source's unconditional-secret bug.
    #[tracing::instrument(skip(self, request))]
    pub fn register_client(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse> {
        if request.redirect_uris.is_empty() {
            return Err(Error::new(ErrorKind::InvalidRequest, "redirect_uris must not be empty"));
        }
        for uri in &request.redirect_uris {
            self.validate_redirect_uri(uri)?;
        }

        let wants_public_client = request
            .token_endpoint_auth_method
            .as_deref()
            .map(|m| m == "none")
            .unwrap_or(false);

        let client_id = random_client_id();
        let client_secret = if wants_public_client {
            None
        } else {
            Some(random_client_secret())
        };
        let token_endpoint_auth_method = if wants_public_client {
            "none".to_string()
        } else {
            "client_secret_basic".to_string()
        };

        let now = self.clock.now_unix();
        let grant_types = if request.grant_types.is_empty() {
            vec!["authorization_code".to_string(), "refresh_token".to_string()]
        } else {
            request.grant_types
        };
        let response_types = if request.response_types.is_empty() {
            vec!["code".to_string()]
        } else {
            request.response_types
        };

        let record = ClientRegistration {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            redirect_uris: request.redirect_uris.clone(),
            grant_types: grant_types.clone(),
            response_types: response_types.clone(),
            scope: request.scope,
            code_challenge_methods: vec!["S256".to_string()],
            token_endpoint_auth_method: token_endpoint_auth_method.clone(),
            created_at: now,
            updated_at: now,
            revoked: false,
        };

        self.kv
            .set(&client_key(&client_id), serde_json::to_value(&record).map_err(encode_err)?, None)?;

        Ok(ClientRegistrationResponse {
            client_id,
            client_secret,
            redirect_uris: request.redirect_uris,
            grant_types,
            response_types,
            token_endpoint_auth_method,
            code_challenge_methods_supported: vec!["S256".to_string()],
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn get_client(&self, client_id: &str) -> Result<Option<ClientRegistration>> {
        match self.kv.get(&client_key(client_id))? {
            Some(v) => Ok(Some(serde_json::from_value(v).map_err(decode_err)?)),
            None => Ok(None),
        }
    }

    /// Structured validity check used by the authorize/token endpoints.
    #[tracing::instrument(skip(self))]
    pub fn validate_client(&self, client_id: &str, redirect_uri: Option<&str>) -> Result<ClientValidity> {
        let Some(client) = self.get_client(client_id)? else {
            return Ok(ClientValidity::NotFound);
        };
        if client.revoked {
            return Ok(ClientValidity::Revoked);
        }
        if let Some(uri) = redirect_uri {
            if !client.redirect_uris.iter().any(|r| r == uri) {
                return Ok(ClientValidity::RedirectUriNotRegistered);
            }
        }
        Ok(ClientValidity::Valid)
    }

    #[tracing::instrument(skip(self))]
    pub fn revoke_client(&self, client_id: &str) -> Result<()> {
        let Some(mut client) = self.get_client(client_id)? else {
            return Err(Error::new(ErrorKind::InvalidClient, "client not found"));
        };
        client.revoked = true;
        client.updated_at = self.clock.now_unix();
        self.kv
            .set(&client_key(client_id), serde_json::to_value(&client).map_err(encode_err)?, None)?;
        Ok(())
    }
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode client registration", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode client registration", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> ClientRegistry {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock = Arc::new(bridgemcp_core::FixedClock(1_000));
        ClientRegistry::new(kv, clock, ClientRegistryConfig::default(), true)
    }

    #[test]
    fn register_with_confidential_client_gets_secret() {
        let reg = registry();
        let resp = reg
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["https://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap();
        assert!(resp.client_secret.is_some());
        assert_eq!(resp.token_endpoint_auth_method, "client_secret_basic");
        assert_eq!(resp.code_challenge_methods_supported, vec!["S256"]);
    }

    #[test]
    fn register_pkce_only_public_client_gets_no_secret() {
        let reg = registry();
        let resp = reg
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["http://localhost:3503/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: Some("none".into()),
            })
            .unwrap();
        assert!(resp.client_secret.is_none());
        assert_eq!(resp.token_endpoint_auth_method, "none");
    }

    #[test]
    fn rejects_non_https_non_localhost_redirect() {
        let reg = registry();
        let err = reg
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["http://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn allow_list_restricts_hosts() {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock = Arc::new(bridgemcp_core::FixedClock(1_000));
        let config = ClientRegistryConfig {
            redirect_host_allow_list: vec!["good.example.com".into()],
        };
        let reg = ClientRegistry::new(kv, clock, config, true);
        assert!(reg.validate_redirect_uri("https://good.example.com/cb").is_ok());
        assert!(reg.validate_redirect_uri("https://bad.example.com/cb").is_err());
    }

    #[test]
    fn validate_client_detects_unregistered_redirect_uri() {
        let reg = registry();
        let resp = reg
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["https://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap();
        let validity = reg
            .validate_client(&resp.client_id, Some("https://evil.example.com/cb"))
            .unwrap();
        assert_eq!(validity, ClientValidity::RedirectUriNotRegistered);
    }

    #[test]
    fn revoke_flips_soft_flag() {
        let reg = registry();
        let resp = reg
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["https://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap();
        reg.revoke_client(&resp.client_id).unwrap();
        assert_eq!(reg.validate_client(&resp.client_id, None).unwrap(), ClientValidity::Revoked);
    }
}
