//! Authorization Handler (spec §4.F) — the `/authorize` and `/token`
//! endpoint state machines, plus the MCP auth request binding records that
//! survive the out-of-band round trip to a third-party provider.

use std::sync::Arc;
use std::time::Duration;

use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, key};

use crate::clients::{ClientRegistry, ClientValidity};
use crate::tokens::TokenManager;
use crate::types::{McpAuthorizationRequest, TokenResponse};

fn request_key(external_state: &str) -> Key {
    key(&["mcp_auth", "requests", external_state])
}

/// Parameters of an incoming `GET /authorize` request.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Outcome of [`AuthorizationHandler::authorize`].
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// 302 to `redirect_uri?code=...&state=...`.
    Redirect { redirect_uri: String, code: String, state: Option<String> },
    /// Reject without a redirect — the redirect URI itself is untrusted.
    RejectWithoutRedirect { reason: String },
    /// 302 to `redirect_uri?error=...&error_description=...`.
    RedirectWithError { redirect_uri: String, error: &'static str, state: Option<String> },
}

/// `grant_type` dispatch input for `POST /token`.
#[derive(Debug, Clone)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        client_id: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        client_id: String,
    },
}

pub struct AuthorizationHandler {
    kv: Arc<KvStore>,
    clock: SharedClock,
    clients: Arc<ClientRegistry>,
    tokens: Arc<TokenManager>,
    request_ttl: Duration,
}

impl AuthorizationHandler {
    pub fn new(
        kv: Arc<KvStore>,
        clock: SharedClock,
        clients: Arc<ClientRegistry>,
        tokens: Arc<TokenManager>,
        request_ttl: Duration,
    ) -> Self {
        Self {
            kv,
            clock,
            clients,
            tokens,
            request_ttl,
        }
    }

    /// The `/authorize` endpoint state machine (spec §4.F).
    #[tracing::instrument(skip(self, request, user_id))]
    pub fn authorize(&self, request: AuthorizeRequest, user_id: &str) -> Result<AuthorizeOutcome> {
        let validity = self
            .clients
            .validate_client(&request.client_id, Some(&request.redirect_uri))?;

        match validity {
            ClientValidity::NotFound | ClientValidity::Revoked => {
                return Ok(AuthorizeOutcome::RedirectWithError {
                    redirect_uri: request.redirect_uri,
                    error: "invalid_client",
                    state: request.state,
                });
            }
            ClientValidity::RedirectUriNotRegistered => {
                return Ok(AuthorizeOutcome::RejectWithoutRedirect {
                    reason: "redirect_uri is not registered for this client".to_string(),
                });
            }
            ClientValidity::Valid => {}
        }

        let client = self
            .clients
            .get_client(&request.client_id)?
            .ok_or_else(|| Error::new(ErrorKind::InvalidClient, "client vanished after validation"))?;

        // PKCE is mandatory for public clients (no client secret was ever
        // issued); confidential `client_secret_basic` clients authenticate
        // at the token endpoint instead, so PKCE is optional for them even
        // though the server still advertises `S256` support to everyone.
        let pkce_required = client.client_secret.is_none();
        if pkce_required && request.code_challenge.is_none() {
            return Ok(AuthorizeOutcome::RedirectWithError {
                redirect_uri: request.redirect_uri,
                error: "invalid_request",
                state: request.state,
            });
        }

        let code = self.tokens.generate_authorization_code(
            &request.client_id,
            user_id,
            &request.redirect_uri,
            request.code_challenge,
            request.code_challenge_method,
            request.scope,
        )?;

        Ok(AuthorizeOutcome::Redirect {
            redirect_uri: request.redirect_uri,
            code,
            state: request.state,
        })
    }

    /// `POST /token` grant_type dispatch (spec §4.F, §4.C).
    #[tracing::instrument(skip(self, request))]
    pub fn token(&self, request: TokenRequest) -> Result<TokenResponse> {
        match request {
            TokenRequest::AuthorizationCode {
                code,
                client_id,
                redirect_uri,
                code_verifier,
            } => {
                let exchanged = self.tokens.exchange_authorization_code(
                    &code,
                    &client_id,
                    &redirect_uri,
                    code_verifier.as_deref(),
                )?;
                let scope = crate::tokens::parse_scope(exchanged.scope.as_deref());
                self.tokens
                    .generate_access_token(&exchanged.client_id, &exchanged.user_id, true, scope)
            }
            TokenRequest::RefreshToken { refresh_token, client_id } => {
                self.tokens.refresh_access_token(&refresh_token, &client_id)
            }
        }
    }

    /// Stores a binding record keyed by the upstream `external_state`, so the
    /// out-of-band provider callback can later recover it (spec §4.F, §4.G).
    #[tracing::instrument(skip(self, record))]
    pub fn store_mcp_auth_request(&self, external_state: &str, record: McpAuthorizationRequest) -> Result<()> {
        self.kv.set(
            &request_key(external_state),
            serde_json::to_value(&record).map_err(encode_err)?,
            Some(self.request_ttl),
        )
    }

    /// Read-only; the provider coordinator decides when to delete it.
    #[tracing::instrument(skip(self))]
    pub fn get_mcp_auth_request(&self, external_state: &str) -> Result<Option<McpAuthorizationRequest>> {
        match self.kv.get(&request_key(external_state))? {
            Some(v) => {
                let record: McpAuthorizationRequest = serde_json::from_value(v).map_err(decode_err)?;
                if self.clock.now_unix() >= record.expires_at {
                    return Ok(None);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_mcp_auth_request(&self, external_state: &str) -> Result<()> {
        self.kv.delete(&request_key(external_state))
    }
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode mcp auth request", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode mcp auth request", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientRegistrationRequest, ClientRegistry};
    use crate::config::{ClientRegistryConfig, TokenConfig};

    fn harness(now: i64) -> (AuthorizationHandler, Arc<ClientRegistry>, String) {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock: SharedClock = Arc::new(bridgemcp_core::FixedClock(now));
        let clients = Arc::new(ClientRegistry::new(
            kv.clone(),
            clock.clone(),
            ClientRegistryConfig::default(),
            true,
        ));
        let resp = clients
            .register_client(ClientRegistrationRequest {
                redirect_uris: vec!["https://example.com/callback".into()],
                grant_types: vec![],
                response_types: vec![],
                scope: None,
                token_endpoint_auth_method: None,
            })
            .unwrap();
        let tokens = Arc::new(crate::tokens::TokenManager::new(
            kv.clone(),
            clock.clone(),
            clients.clone(),
            TokenConfig::default(),
        ));
        let handler = AuthorizationHandler::new(kv, clock, clients.clone(), tokens, Duration::from_secs(600));
        (handler, clients, resp.client_id)
    }

    fn verifier_and_challenge() -> (String, String) {
        let verifier = "a".repeat(43);
        let challenge = crate::pkce::challenge_from_verifier(&verifier);
        (verifier, challenge)
    }

    #[test]
    fn unknown_client_redirects_with_invalid_client() {
        let (handler, _clients, _cid) = harness(1_000);
        let outcome = handler
            .authorize(
                AuthorizeRequest {
                    client_id: "nonexistent".into(),
                    redirect_uri: "https://example.com/callback".into(),
                    state: Some("xyz".into()),
                    scope: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
                "u1",
            )
            .unwrap();
        match outcome {
            AuthorizeOutcome::RedirectWithError { error, .. } => assert_eq!(error, "invalid_client"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unregistered_redirect_uri_is_rejected_without_redirect() {
        let (handler, _clients, client_id) = harness(1_000);
        let outcome = handler
            .authorize(
                AuthorizeRequest {
                    client_id,
                    redirect_uri: "https://evil.example.com/cb".into(),
                    state: None,
                    scope: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
                "u1",
            )
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::RejectWithoutRedirect { .. }));
    }

    #[test]
    fn missing_pkce_challenge_redirects_with_invalid_request() {
        let (handler, _clients, client_id) = harness(1_000);
        let outcome = handler
            .authorize(
                AuthorizeRequest {
                    client_id,
                    redirect_uri: "https://example.com/callback".into(),
                    state: Some("s".into()),
                    scope: None,
                    code_challenge: None,
                    code_challenge_method: None,
                },
                "u1",
            )
            .unwrap();
        match outcome {
            AuthorizeOutcome::RedirectWithError { error, .. } => assert_eq!(error, "invalid_request"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn valid_request_redirects_with_code() {
        let (handler, _clients, client_id) = harness(1_000);
        let (_verifier, challenge) = verifier_and_challenge();
        let outcome = handler
            .authorize(
                AuthorizeRequest {
                    client_id,
                    redirect_uri: "https://example.com/callback".into(),
                    state: Some("s".into()),
                    scope: None,
                    code_challenge: Some(challenge),
                    code_challenge_method: Some("S256".into()),
                },
                "u1",
            )
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Redirect { .. }));
    }

    #[test]
    fn token_endpoint_dispatches_authorization_code_grant() {
        let (handler, _clients, client_id) = harness(1_000);
        let (verifier, challenge) = verifier_and_challenge();
        let outcome = handler
            .authorize(
                AuthorizeRequest {
                    client_id: client_id.clone(),
                    redirect_uri: "https://example.com/callback".into(),
                    state: None,
                    scope: Some("read write".into()),
                    code_challenge: Some(challenge),
                    code_challenge_method: Some("S256".into()),
                },
                "u1",
            )
            .unwrap();
        let AuthorizeOutcome::Redirect { code, .. } = outcome else {
            panic!("expected redirect");
        };
        let resp = handler
            .token(TokenRequest::AuthorizationCode {
                code,
                client_id,
                redirect_uri: "https://example.com/callback".into(),
                code_verifier: Some(verifier),
            })
            .unwrap();
        assert_eq!(resp.scope, "read write");
        assert!(resp.refresh_token.is_some());
    }

    #[test]
    fn binding_record_round_trips_and_expires() {
        let (handler, _clients, _cid) = harness(1_000);
        let record = McpAuthorizationRequest {
            mcp_client_id: "c1".into(),
            mcp_redirect_uri: "https://example.com/callback".into(),
            mcp_state: "mcp-state".into(),
            code_challenge: None,
            code_challenge_method: None,
            upstream_state: "upstream-state".into(),
            user_id: "u1".into(),
            created_at: 1_000,
            expires_at: 1_600,
        };
        handler.store_mcp_auth_request("upstream-state", record).unwrap();
        assert!(handler.get_mcp_auth_request("upstream-state").unwrap().is_some());
        handler.delete_mcp_auth_request("upstream-state").unwrap();
        assert!(handler.get_mcp_auth_request("upstream-state").unwrap().is_none());
    }
}
