//! OAuth Provider coordinator (spec §4.H) — the session-binding core. Ties
//! together the Token Manager (§4.C), the Authorization Handler (§4.F) and
//! an injectable upstream session-auth pair so that no MCP request is ever
//! served against an upstream credential that has gone stale.

use std::sync::Arc;

use async_trait::async_trait;
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};

use crate::authorize::AuthorizationHandler;
use crate::tokens::TokenManager;

/// Injected upstream session-liveness check (spec §4.H step 3). Implemented
/// by whatever tracks whether a user's third-party session is currently
/// live, independent of this gateway's own token store.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn is_user_authenticated(&self, user_id: &str) -> Result<bool>;
    async fn update_user_credentials(&self, user_id: &str, access_token: &str) -> Result<()>;
}

/// Injected upstream API client capable of refreshing a third-party access
/// token (spec §4.H step 4).
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get_stored_refresh_token(&self, user_id: &str) -> Result<Option<String>>;
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String>;
}

/// Outcome of [`OAuthProvider::authorize_mcp_request`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub authorized: bool,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub scopes: Vec<String>,
    pub action_taken: Option<&'static str>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
}

impl AuthContext {
    fn denied(error: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            authorized: false,
            client_id: None,
            user_id: None,
            scopes: Vec::new(),
            action_taken: None,
            error: Some(error.into()),
            error_code: Some(error_code),
        }
    }

    fn granted(client_id: String, user_id: String, scopes: Vec<String>, action_taken: Option<&'static str>) -> Self {
        Self {
            authorized: true,
            client_id: Some(client_id),
            user_id: Some(user_id),
            scopes,
            action_taken,
            error: None,
            error_code: None,
        }
    }
}

pub struct OAuthProvider {
    tokens: Arc<TokenManager>,
    authorize: Arc<AuthorizationHandler>,
    clock: SharedClock,
}

impl OAuthProvider {
    pub fn new(tokens: Arc<TokenManager>, authorize: Arc<AuthorizationHandler>, clock: SharedClock) -> Self {
        Self {
            tokens,
            authorize,
            clock,
        }
    }

    /// The central operation (spec §4.H). `auth_service` and `api_client`
    /// are both optional: neither injected means session binding is off and
    /// a valid MCP token alone is sufficient.
    #[tracing::instrument(skip(self, bearer, auth_service, api_client))]
    pub async fn authorize_mcp_request(
        &self,
        bearer: &str,
        auth_service: Option<&(dyn AuthService)>,
        api_client: Option<&(dyn ApiClient)>,
    ) -> Result<AuthContext> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer);

        let validation = self.tokens.validate_access_token(token)?;
        if !validation.valid {
            return Ok(AuthContext::denied(
                validation.error.unwrap_or_else(|| "invalid token".to_string()),
                validation.error_code.unwrap_or("invalid_token"),
            ));
        }
        let client_id = validation.client_id.expect("valid token carries a client_id");
        let user_id = validation.user_id.expect("valid token carries a user_id");
        let scopes = validation.scopes.unwrap_or_default();

        let Some(auth_service) = auth_service else {
            // Session binding disabled: the MCP token's own validity is the
            // whole story.
            return Ok(AuthContext::granted(client_id, user_id, scopes, None));
        };

        if auth_service.is_user_authenticated(&user_id).await? {
            return Ok(AuthContext::granted(client_id, user_id, scopes, None));
        }

        let Some(api_client) = api_client else {
            return Ok(AuthContext::denied(
                "Third-party authorization expired and no refresh path is available",
                "third_party_reauth_required",
            ));
        };

        let Some(refresh_token) = api_client.get_stored_refresh_token(&user_id).await? else {
            return Ok(AuthContext::denied(
                "Third-party authorization expired",
                "third_party_reauth_required",
            ));
        };

        match api_client.refresh_access_token(&refresh_token).await {
            Ok(new_access_token) => {
                auth_service.update_user_credentials(&user_id, &new_access_token).await?;
                Ok(AuthContext::granted(
                    client_id,
                    user_id,
                    scopes,
                    Some("third_party_token_refreshed"),
                ))
            }
            Err(_) => Ok(AuthContext::denied(
                "Third-party authorization expired and refresh failed",
                "third_party_reauth_required",
            )),
        }
    }

    /// Reads the code without deleting it, then delegates the actual
    /// exchange (which does delete it) to the Authorization Handler, then
    /// issues the access token scoped from the (now-gone) code. Reading
    /// before exchanging is deliberate: the code's user id and scope must
    /// survive the atomic delete to be available for token issuance
    /// afterward (spec §4.H).
    #[tracing::instrument(skip(self, code, verifier))]
    pub fn exchange_mcp_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<crate::types::TokenResponse> {
        let peeked = self
            .tokens
            .get_authorization_code(code)?
            .ok_or_else(|| Error::new(ErrorKind::InvalidGrant, "unknown or already-used authorization code"))?;

        let exchanged = self.tokens.exchange_authorization_code(code, client_id, redirect_uri, verifier)?;
        debug_assert_eq!(peeked.user_id, exchanged.user_id);

        let scope = crate::tokens::parse_scope(exchanged.scope.as_deref());
        self.tokens.generate_access_token(&exchanged.client_id, &exchanged.user_id, true, scope)
    }

    pub fn authorize_handler(&self) -> &AuthorizationHandler {
        &self.authorize
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientRegistrationRequest, ClientRegistry};
    use crate::config::{ClientRegistryConfig, TokenConfig};
    use bridgemcp_kv::KvStore;
    use std::sync::Mutex;
    use std::time::Duration;

    struct LiveAuthService;
    #[async_trait]
    impl AuthService for LiveAuthService {
        async fn is_user_authenticated(&self, _user_id: &str) -> Result<bool> {
            Ok(true)
        }
        async fn update_user_credentials(&self, _user_id: &str, _access_token: &str) -> Result<()> {
            Ok(())
        }
    }

    struct StaleAuthService;
    #[async_trait]
    impl AuthService for StaleAuthService {
        async fn is_user_authenticated(&self, _user_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn update_user_credentials(&self, _user_id: &str, _access_token: &str) -> Result<()> {
            Ok(())
        }
    }

    struct RefreshingApiClient {
        succeeds: bool,
        refresh_calls: Mutex<usize>,
    }
    #[async_trait]
    impl ApiClient for RefreshingApiClient {
        async fn get_stored_refresh_token(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(Some("upstream-refresh".to_string()))
        }
        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<String> {
            *self.refresh_calls.lock().unwrap() += 1;
            if self.succeeds {
                Ok("new-upstream-access".to_string())
            } else {
                Err(Error::new(ErrorKind::ThirdPartyReauthRequired, "upstream refused refresh"))
            }
        }
    }

    fn harness(now: i64) -> (OAuthProvider, String, String) {
        let kv = Arc::new(KvStore::temporary().unwrap());
        let clock: SharedClock = Arc::new(bridgemcp_core::FixedClock(now));
        let clients = Arc::new(ClientRegistry::new(kv.clone(), clock.clone(), ClientRegistryConfig::default(), true));
        let resp = clients
            .register_client(ClientRegistrationRequest {
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
        let provider = OAuthProvider::new(tokens, authorize, clock);
        (provider, resp.client_id, token_resp.access_token)
    }

    #[tokio::test]
    async fn invalid_token_is_denied() {
        let (provider, _cid, _tok) = harness(1_000);
        let ctx = provider.authorize_mcp_request("Bearer garbage", None, None).await.unwrap();
        assert!(!ctx.authorized);
    }

    #[tokio::test]
    async fn no_session_binding_grants_on_valid_token_alone() {
        let (provider, _cid, token) = harness(1_000);
        let ctx = provider
            .authorize_mcp_request(&format!("Bearer {token}"), None, None)
            .await
            .unwrap();
        assert!(ctx.authorized);
        assert_eq!(ctx.action_taken, None);
    }

    #[tokio::test]
    async fn live_upstream_session_grants_without_refresh() {
        let (provider, _cid, token) = harness(1_000);
        let auth_service = LiveAuthService;
        let ctx = provider
            .authorize_mcp_request(&format!("Bearer {token}"), Some(&auth_service), None)
            .await
            .unwrap();
        assert!(ctx.authorized);
        assert_eq!(ctx.action_taken, None);
    }

    #[tokio::test]
    async fn stale_session_with_successful_refresh_reports_action_taken() {
        let (provider, _cid, token) = harness(1_000);
        let auth_service = StaleAuthService;
        let api_client = RefreshingApiClient { succeeds: true, refresh_calls: Mutex::new(0) };
        let ctx = provider
            .authorize_mcp_request(&format!("Bearer {token}"), Some(&auth_service), Some(&api_client))
            .await
            .unwrap();
        assert!(ctx.authorized);
        assert_eq!(ctx.action_taken, Some("third_party_token_refreshed"));
        assert_eq!(*api_client.refresh_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_session_with_failed_refresh_requires_reauth() {
        let (provider, _cid, token) = harness(1_000);
        let auth_service = StaleAuthService;
        let api_client = RefreshingApiClient { succeeds: false, refresh_calls: Mutex::new(0) };
        let ctx = provider
            .authorize_mcp_request(&format!("Bearer {token}"), Some(&auth_service), Some(&api_client))
            .await
            .unwrap();
        assert!(!ctx.authorized);
        assert_eq!(ctx.error_code, Some("third_party_reauth_required"));
    }

    #[tokio::test]
    async fn stale_session_without_api_client_requires_reauth() {
        let (provider, _cid, token) = harness(1_000);
        let auth_service = StaleAuthService;
        let ctx = provider
            .authorize_mcp_request(&format!("Bearer {token}"), Some(&auth_service), None)
            .await
            .unwrap();
        assert!(!ctx.authorized);
        assert_eq!(ctx.error_code, Some("third_party_reauth_required"));
    }

    #[test]
    fn exchange_mcp_authorization_code_reads_before_delete() {
        let (provider, client_id, _tok) = harness(1_000);
        let code = provider
            .tokens
            .generate_authorization_code(&client_id, "u2", "https://example.com/callback", None, None, Some("read".into()))
            .unwrap();
        let resp = provider
            .exchange_mcp_authorization_code(&code, &client_id, "https://example.com/callback", None)
            .unwrap();
        assert_eq!(resp.scope, "read");
        assert!(provider.tokens.get_authorization_code(&code).unwrap().is_none());
    }
}
