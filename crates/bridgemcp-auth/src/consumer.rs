//! OAuth Consumer (spec §4.G) — the client side of a third-party OAuth
//! provider. This gateway is itself a confidential client of some upstream
//! authorization server (GitHub, Google, ...); this module drives that
//! three-legged flow so the Provider coordinator (§4.H) always has a live
//! upstream credential to hand out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridgemcp_core::ids::random_state;
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, key};
use dashmap::DashMap;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse as _, TokenUrl,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::ConsumerConfig;
use crate::credentials::CredentialStore;
use crate::types::{ConsumerAuthorizationRequest, ThirdPartyCredentials};

fn request_key(state: &str) -> Key {
    key(&["oauth_consumer", "requests", state])
}

/// Result of [`ThirdPartyAdapter::build_auth_url`].
#[derive(Debug, Clone)]
pub struct AuthUrlAndState {
    pub authorization_url: String,
    pub state: String,
}

/// The token-bearing response from an upstream exchange or refresh.
#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

/// Client side of a specific third-party OAuth provider. Mirrors the
/// teacher's `OAuth2Client` seam so a provider-specific quirk layer could be
/// slotted in later without touching the coordinator above it — out of
/// scope here per spec.md §1, which only asks for one generic adapter.
#[async_trait]
pub trait ThirdPartyAdapter: Send + Sync {
    fn build_auth_url(&self, state: &str, pkce_challenge: Option<&str>) -> AuthUrlAndState;
    async fn exchange_code(&self, code: &str, pkce_verifier: Option<&str>) -> Result<ExchangedTokens>;
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<ExchangedTokens>;
}

/// The sole concrete adapter: a generic RFC 6749 client built on `oauth2`'s
/// typestate `BasicClient`, configured entirely from [`ConsumerConfig`].
pub struct GenericAdapter {
    client: BasicClient,
    http: reqwest::Client,
    scopes: Vec<String>,
}

impl GenericAdapter {
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.authorize_url.clone())
                .map_err(|e| Error::with_source(ErrorKind::Internal, "invalid authorize_url", e))?,
            Some(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| Error::with_source(ErrorKind::Internal, "invalid token_url", e))?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone())
                .map_err(|e| Error::with_source(ErrorKind::Internal, "invalid redirect_uri", e))?,
        );

        // Upstream HTTP must never follow redirects transparently: a
        // redirected token exchange would silently leak the client secret.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Internal, "build http client", e))?;

        Ok(Self {
            client,
            http,
            scopes: config.scopes.clone(),
        })
    }
}

#[async_trait]
impl ThirdPartyAdapter for GenericAdapter {
    fn build_auth_url(&self, state: &str, pkce_challenge: Option<&str>) -> AuthUrlAndState {
        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new));
        if let Some(challenge) = pkce_challenge {
            request = request.set_pkce_challenge(PkceCodeChallenge::from_challenge_and_method(
                challenge.to_string(),
                oauth2::PkceCodeChallengeMethod::new("S256".to_string()),
            ));
        }
        let (url, csrf) = request.url();
        AuthUrlAndState {
            authorization_url: url.to_string(),
            state: csrf.secret().clone(),
        }
    }

    #[tracing::instrument(skip(self, code, pkce_verifier))]
    async fn exchange_code(&self, code: &str, pkce_verifier: Option<&str>) -> Result<ExchangedTokens> {
        let mut request = self.client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }
        let token = request
            .request_async(|req| oauth2_http(&self.http, req))
            .await
            .map_err(|e| Error::with_source(ErrorKind::ThirdPartyReauthRequired, "authorization code exchange failed", UpstreamErr(e.to_string())))?;

        Ok(ExchangedTokens {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_in: token.expires_in().map(|d| d.as_secs() as i64),
            scopes: token
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip(self, refresh_token))]
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<ExchangedTokens> {
        let token = self
            .client
            .exchange_refresh_token(&oauth2::RefreshToken::new(refresh_token.to_string()))
            .request_async(|req| oauth2_http(&self.http, req))
            .await
            .map_err(|e| Error::with_source(ErrorKind::ThirdPartyReauthRequired, "refresh token exchange failed", UpstreamErr(e.to_string())))?;

        Ok(ExchangedTokens {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_in: token.expires_in().map(|d| d.as_secs() as i64),
            scopes: token
                .scopes()
                .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        })
    }
}

async fn oauth2_http(
    http: &reqwest::Client,
    request: oauth2::HttpRequest,
) -> std::result::Result<oauth2::HttpResponse, reqwest::Error> {
    let mut builder = http.request(request.method, request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    let response = builder.body(request.body).send().await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();
    Ok(oauth2::HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[derive(Debug, thiserror::Error)]
#[error("upstream oauth error: {0}")]
struct UpstreamErr(String);

/// Drives the three-legged flow against one third-party provider, and
/// coalesces concurrent refreshes per `(user, provider)` pair.
pub struct OAuthConsumer {
    kv: Arc<KvStore>,
    clock: SharedClock,
    credentials: Arc<CredentialStore>,
    adapter: Arc<dyn ThirdPartyAdapter>,
    provider_id: String,
    use_pkce: bool,
    request_ttl: Duration,
    refresh_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl OAuthConsumer {
    pub fn new(
        kv: Arc<KvStore>,
        clock: SharedClock,
        credentials: Arc<CredentialStore>,
        adapter: Arc<dyn ThirdPartyAdapter>,
        provider_id: String,
        use_pkce: bool,
        request_ttl: Duration,
    ) -> Self {
        Self {
            kv,
            clock,
            credentials,
            adapter,
            provider_id,
            use_pkce,
            request_ttl,
            refresh_locks: DashMap::new(),
        }
    }

    /// Generates a random 32-char state, optionally a PKCE verifier,
    /// persists the pending request with a 10-minute TTL (spec §4.G).
    #[tracing::instrument(skip(self, user_id))]
    pub fn start_authorization_flow(&self, user_id: &str) -> Result<AuthUrlAndState> {
        let state = random_state();
        let (verifier, challenge) = if self.use_pkce {
            let raw = bridgemcp_core::ids::random_token(32);
            let challenge = crate::pkce::challenge_from_verifier(&raw);
            (Some(raw), Some(challenge))
        } else {
            (None, None)
        };

        let now = self.clock.now_unix();
        let record = ConsumerAuthorizationRequest {
            state: state.clone(),
            user_id: user_id.to_string(),
            code_verifier: verifier,
            created_at: now,
            expires_at: now + self.request_ttl.as_secs() as i64,
        };
        self.kv.set(
            &request_key(&state),
            serde_json::to_value(&record).map_err(encode_err)?,
            Some(self.request_ttl),
        )?;

        Ok(self.adapter.build_auth_url(&state, challenge.as_deref()))
    }

    /// Looks up the pending request by `state` (absent/expired ⇒ error),
    /// exchanges the code upstream, stores the resulting credentials, and
    /// deletes the pending request (spec §4.G).
    #[tracing::instrument(skip(self, code))]
    pub async fn handle_authorization_callback(&self, code: &str, state: &str) -> Result<String> {
        let Some(v) = self.kv.get(&request_key(state))? else {
            return Err(Error::new(ErrorKind::InvalidGrant, "unknown or expired authorization state"));
        };
        let record: ConsumerAuthorizationRequest = serde_json::from_value(v).map_err(decode_err)?;
        if self.clock.now_unix() >= record.expires_at {
            self.kv.delete(&request_key(state))?;
            return Err(Error::new(ErrorKind::InvalidGrant, "authorization state expired"));
        }

        let exchanged = self.adapter.exchange_code(code, record.code_verifier.as_deref()).await?;
        let now = self.clock.now_unix();
        let creds = ThirdPartyCredentials {
            access_token: exchanged.access_token,
            refresh_token: exchanged.refresh_token,
            token_type: "Bearer".to_string(),
            expires_at: now + exchanged.expires_in.unwrap_or(3600),
            scopes: exchanged.scopes,
            stored_at: now,
            last_used_at: now,
        };
        self.credentials.store(&record.user_id, &self.provider_id, creds)?;
        self.kv.delete(&request_key(state))?;
        Ok(record.user_id)
    }

    /// Returns the stored token when outside the refresh buffer; otherwise
    /// performs a refresh, coalesced per `(user, provider)` so concurrent
    /// callers share one upstream round trip (spec §4.G, §9 bullet 3). On
    /// refresh failure the credential row is deleted and `None` is returned.
    #[tracing::instrument(skip(self, user_id))]
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<Option<String>> {
        if let Some(creds) = self.credentials.get(user_id, &self.provider_id)? {
            return Ok(Some(creds.access_token));
        }

        let lock_key = format!("{user_id}:{}", self.provider_id);
        let lock = self
            .refresh_locks
            .entry(lock_key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check: another waiter may have already refreshed while we
        // queued for the lock.
        if let Some(creds) = self.credentials.get(user_id, &self.provider_id)? {
            return Ok(Some(creds.access_token));
        }

        let Some(stale) = self.credentials.raw(user_id, &self.provider_id)? else {
            return Ok(None);
        };
        let Some(refresh_token) = &stale.refresh_token else {
            self.credentials.delete(user_id, &self.provider_id)?;
            return Ok(None);
        };

        match self.adapter.refresh_tokens(refresh_token).await {
            Ok(exchanged) => {
                let now = self.clock.now_unix();
                let creds = ThirdPartyCredentials {
                    access_token: exchanged.access_token.clone(),
                    refresh_token: exchanged.refresh_token.or(Some(refresh_token.clone())),
                    token_type: "Bearer".to_string(),
                    expires_at: now + exchanged.expires_in.unwrap_or(3600),
                    scopes: exchanged.scopes,
                    stored_at: stale.stored_at,
                    last_used_at: now,
                };
                self.credentials.store(user_id, &self.provider_id, creds)?;
                Ok(Some(exchanged.access_token))
            }
            Err(_) => {
                self.credentials.delete(user_id, &self.provider_id)?;
                Ok(None)
            }
        }
    }
}

/// Adapts the credential store and third-party adapter into the narrower
/// `AuthService`/`ApiClient` seams the OAuth Provider coordinator expects
/// (spec §4.H), so `OAuthProvider::authorize_mcp_request` can session-bind
/// against this consumer's provider without depending on it directly.
pub struct ConsumerSessionBinding {
    credentials: Arc<CredentialStore>,
    adapter: Arc<dyn ThirdPartyAdapter>,
    provider_id: String,
}

impl ConsumerSessionBinding {
    pub fn new(credentials: Arc<CredentialStore>, adapter: Arc<dyn ThirdPartyAdapter>, provider_id: String) -> Self {
        Self {
            credentials,
            adapter,
            provider_id,
        }
    }
}

#[async_trait]
impl crate::provider::AuthService for ConsumerSessionBinding {
    async fn is_user_authenticated(&self, user_id: &str) -> Result<bool> {
        Ok(self.credentials.get(user_id, &self.provider_id)?.is_some())
    }

    async fn update_user_credentials(&self, user_id: &str, access_token: &str) -> Result<()> {
        let Some(mut creds) = self.credentials.raw(user_id, &self.provider_id)? else {
            return Err(Error::new(ErrorKind::ThirdPartyReauthRequired, "no stored credential to update"));
        };
        creds.access_token = access_token.to_string();
        self.credentials.store(user_id, &self.provider_id, creds)
    }
}

#[async_trait]
impl crate::provider::ApiClient for ConsumerSessionBinding {
    async fn get_stored_refresh_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.credentials.raw(user_id, &self.provider_id)?.and_then(|c| c.refresh_token))
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String> {
        let exchanged = self.adapter.refresh_tokens(refresh_token).await?;
        Ok(exchanged.access_token)
    }
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode consumer authorization request", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode consumer authorization request", e)
}
