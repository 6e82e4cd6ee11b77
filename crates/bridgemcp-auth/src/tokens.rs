//! Token Manager (spec §4.C) — issues, validates, refreshes and revokes MCP
//! authorization codes, access tokens, and refresh tokens.

use std::sync::Arc;

use bridgemcp_core::ids::{new_authorization_code, random_access_token};
use bridgemcp_core::time::SharedClock;
use bridgemcp_core::{Error, ErrorKind, Result};
use bridgemcp_kv::{Key, KvStore, Op, key};

use crate::clients::{ClientRegistry, ClientValidity};
use crate::config::TokenConfig;
use crate::pkce;
use crate::types::{
    AccessTokenRecord, AuthorizationCode, RefreshTokenRecord, TokenResponse, TokenValidation,
    scope_from_string, scope_to_string,
};

fn code_key(code: &str) -> Key {
    key(&["mcp_auth", "codes", code])
}

fn token_key(token: &str) -> Key {
    key(&["mcp_auth", "tokens", token])
}

fn refresh_key(token: &str) -> Key {
    key(&["mcp_auth", "refresh_tokens", token])
}

/// Result of a successful authorization-code exchange.
#[derive(Debug, Clone)]
pub struct ExchangedCode {
    pub client_id: String,
    pub user_id: String,
    pub scope: Option<String>,
}

pub struct TokenManager {
    kv: Arc<KvStore>,
    clock: SharedClock,
    clients: Arc<ClientRegistry>,
    config: TokenConfig,
}

impl TokenManager {
    pub fn new(kv: Arc<KvStore>, clock: SharedClock, clients: Arc<ClientRegistry>, config: TokenConfig) -> Self {
        Self {
            kv,
            clock,
            clients,
            config,
        }
    }

    /// Issues a single-use authorization code. TTL is fixed at 10 minutes
    /// per spec §3 (`expires_at - issued_at <= 10 min`), clamped to the
    /// configured TTL if it is ever set lower.
    #[tracing::instrument(skip(self, client_id, user_id, redirect_uri, code_challenge))]
    pub fn generate_authorization_code(
        &self,
        client_id: &str,
        user_id: &str,
        redirect_uri: &str,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        scope: Option<String>,
    ) -> Result<String> {
        let now = self.clock.now_unix();
        let ttl = self.config.authorization_code_ttl.as_secs().min(600) as i64;
        let code = new_authorization_code();
        let record = AuthorizationCode {
            code: code.clone(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scope,
            code_challenge,
            code_challenge_method,
            issued_at: now,
            expires_at: now + ttl,
        };
        self.kv.set(
            &code_key(&code),
            serde_json::to_value(&record).map_err(encode_err)?,
            Some(self.config.authorization_code_ttl),
        )?;
        Ok(code)
    }

    /// Read-only peek; does not delete (spec §4.C).
    #[tracing::instrument(skip(self))]
    pub fn get_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        match self.kv.get(&code_key(code))? {
            Some(v) => Ok(Some(serde_json::from_value(v).map_err(decode_err)?)),
            None => Ok(None),
        }
    }

    /// Atomic exchange: looks up the code, deletes it, then validates
    /// client/redirect/PKCE. The code is gone from the store on return
    /// regardless of outcome (spec §3, §8 property 2).
    #[tracing::instrument(skip(self, verifier))]
    pub fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<ExchangedCode> {
        let Some(record) = self.get_authorization_code(code)? else {
            return Err(Error::new(ErrorKind::InvalidGrant, "unknown or already-used authorization code"));
        };

        // Delete first: two concurrent exchanges race inside the KV layer's
        // atomic delete; only one observes the record before this point.
        self.kv.delete(&code_key(code))?;

        let now = self.clock.now_unix();
        if now >= record.expires_at {
            return Err(Error::new(ErrorKind::InvalidGrant, "authorization code expired"));
        }
        if record.client_id != client_id {
            return Err(Error::new(ErrorKind::InvalidGrant, "client_id mismatch"));
        }
        if record.redirect_uri != redirect_uri {
            return Err(Error::new(ErrorKind::InvalidGrant, "redirect_uri mismatch"));
        }
        if let Some(challenge) = &record.code_challenge {
            let verifier = verifier.ok_or_else(|| {
                Error::new(ErrorKind::InvalidGrant, "code_verifier required for PKCE-bound code")
            })?;
            pkce::validate_verifier_format(verifier)?;
            if !pkce::verify(challenge, verifier) {
                return Err(Error::new(ErrorKind::InvalidGrant, "code_verifier does not match code_challenge"));
            }
        }

        Ok(ExchangedCode {
            client_id: record.client_id,
            user_id: record.user_id,
            scope: record.scope,
        })
    }

    /// Issues an access token (and optionally a refresh token).
    #[tracing::instrument(skip(self))]
    pub fn generate_access_token(
        &self,
        client_id: &str,
        user_id: &str,
        with_refresh: bool,
        scope: Vec<String>,
    ) -> Result<TokenResponse> {
        let now = self.clock.now_unix();
        let access_token = random_access_token();
        let expires_at = now + self.config.access_token_ttl.as_secs() as i64;

        let refresh_token = if with_refresh {
            Some(random_access_token())
        } else {
            None
        };

        let record = AccessTokenRecord {
            access_token: access_token.clone(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scope: scope.clone(),
            issued_at: now,
            expires_at,
            refresh_token: refresh_token.clone(),
        };
        self.kv.set(
            &token_key(&access_token),
            serde_json::to_value(&record).map_err(encode_err)?,
            Some(self.config.access_token_ttl),
        )?;

        if let Some(rt) = &refresh_token {
            let rt_record = RefreshTokenRecord {
                refresh_token: rt.clone(),
                client_id: client_id.to_string(),
                user_id: user_id.to_string(),
                scope: scope.clone(),
                issued_at: now,
                expires_at: now + self.config.refresh_token_ttl.as_secs() as i64,
            };
            self.kv.set(
                &refresh_key(rt),
                serde_json::to_value(&rt_record).map_err(encode_err)?,
                Some(self.config.refresh_token_ttl),
            )?;
        }

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl.as_secs() as i64,
            refresh_token,
            scope: scope_to_string(&scope),
        })
    }

    /// A token is valid iff it exists, `now < expires_at`, and its client is
    /// not revoked (spec §3).
    #[tracing::instrument(skip(self))]
    pub fn validate_access_token(&self, token: &str) -> Result<TokenValidation> {
        let Some(v) = self.kv.get(&token_key(token))? else {
            return Ok(TokenValidation::invalid("token not found", "invalid_token"));
        };
        let record: AccessTokenRecord = serde_json::from_value(v).map_err(decode_err)?;
        if self.clock.now_unix() >= record.expires_at {
            return Ok(TokenValidation::invalid("token expired", "expired_token"));
        }
        match self.clients.validate_client(&record.client_id, None)? {
            ClientValidity::Revoked => {
                return Ok(TokenValidation::invalid("client revoked", "invalid_token"));
            }
            _ => {}
        }
        Ok(TokenValidation::valid(record.client_id, record.user_id, record.scope))
    }

    /// Rotates a refresh token: the old one is deleted atomically with
    /// issuance of the new pair (spec §3, §8 property 4).
    #[tracing::instrument(skip(self, refresh_token))]
    pub fn refresh_access_token(&self, refresh_token: &str, client_id: &str) -> Result<TokenResponse> {
        let Some(v) = self.kv.get(&refresh_key(refresh_token))? else {
            return Err(Error::new(ErrorKind::InvalidGrant, "unknown refresh token"));
        };
        let record: RefreshTokenRecord = serde_json::from_value(v).map_err(decode_err)?;
        let now = self.clock.now_unix();
        if now >= record.expires_at {
            self.kv.delete(&refresh_key(refresh_token))?;
            return Err(Error::new(ErrorKind::InvalidGrant, "refresh token expired"));
        }
        if record.client_id != client_id {
            return Err(Error::new(ErrorKind::InvalidGrant, "client_id mismatch"));
        }

        let access_token = random_access_token();
        let new_refresh_token = random_access_token();

        let access_record = AccessTokenRecord {
            access_token: access_token.clone(),
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            scope: record.scope.clone(),
            issued_at: now,
            expires_at: now + self.config.access_token_ttl.as_secs() as i64,
            refresh_token: Some(new_refresh_token.clone()),
        };
        let new_refresh_record = RefreshTokenRecord {
            refresh_token: new_refresh_token.clone(),
            client_id: record.client_id.clone(),
            user_id: record.user_id.clone(),
            scope: record.scope.clone(),
            issued_at: now,
            expires_at: now + self.config.refresh_token_ttl.as_secs() as i64,
        };

        let ops = vec![
            Op::delete(refresh_key(refresh_token)),
            Op::set_with_ttl(
                refresh_key(&new_refresh_token),
                serde_json::to_value(&new_refresh_record).map_err(encode_err)?,
                self.config.refresh_token_ttl,
            ),
            Op::set_with_ttl(
                token_key(&access_token),
                serde_json::to_value(&access_record).map_err(encode_err)?,
                self.config.access_token_ttl,
            ),
        ];
        self.kv
            .atomic_commit(ops)
            .map_err(|e| Error::with_source(ErrorKind::StorageUnavailable, "rotate refresh token", CommitErr(e)))?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl.as_secs() as i64,
            refresh_token: Some(new_refresh_token),
            scope: scope_to_string(&record.scope),
        })
    }
}

pub fn parse_scope(scope: Option<&str>) -> Vec<String> {
    scope.map(scope_from_string).unwrap_or_default()
}

fn encode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "encode token record", e)
}

fn decode_err(e: serde_json::Error) -> Error {
    Error::with_source(ErrorKind::Internal, "decode token record", e)
}

#[derive(Debug, thiserror::Error)]
#[error("{0:?}")]
struct CommitErr(bridgemcp_kv::CommitError);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientRegistrationRequest, ClientRegistry};
    use crate::config::ClientRegistryConfig;

    fn harness(now: i64) -> (TokenManager, Arc<ClientRegistry>, String) {
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
        let manager = TokenManager::new(kv, clock, clients.clone(), TokenConfig::default());
        (manager, clients, resp.client_id)
    }

    #[test]
    fn code_expiry_is_at_most_ten_minutes() {
        let (mgr, _clients, client_id) = harness(1_000);
        let code = mgr
            .generate_authorization_code(&client_id, "u1", "https://example.com/callback", None, None, None)
            .unwrap();
        let record = mgr.get_authorization_code(&code).unwrap().unwrap();
        assert!(record.expires_at - record.issued_at <= 600);
    }

    #[test]
    fn exchange_deletes_code_on_success() {
        let (mgr, _clients, client_id) = harness(1_000);
        let code = mgr
            .generate_authorization_code(&client_id, "u1", "https://example.com/callback", None, None, None)
            .unwrap();
        mgr.exchange_authorization_code(&code, &client_id, "https://example.com/callback", None)
            .unwrap();
        assert!(mgr.get_authorization_code(&code).unwrap().is_none());
    }

    #[test]
    fn exchange_deletes_code_even_on_failure() {
        let (mgr, _clients, client_id) = harness(1_000);
        let code = mgr
            .generate_authorization_code(&client_id, "u1", "https://example.com/callback", None, None, None)
            .unwrap();
        // Wrong redirect_uri -> failure, but code must still be consumed.
        let _ = mgr.exchange_authorization_code(&code, &client_id, "https://wrong.example.com/cb", None);
        assert!(mgr.get_authorization_code(&code).unwrap().is_none());
    }

    #[test]
    fn exchange_twice_fails_second_time() {
        let (mgr, _clients, client_id) = harness(1_000);
        let code = mgr
            .generate_authorization_code(&client_id, "u1", "https://example.com/callback", None, None, None)
            .unwrap();
        mgr.exchange_authorization_code(&code, &client_id, "https://example.com/callback", None)
            .unwrap();
        let err = mgr
            .exchange_authorization_code(&code, &client_id, "https://example.com/callback", None)
            .unwrap_err();
        assert_eq!(err.kind, bridgemcp_core::ErrorKind::InvalidGrant);
    }

    #[test]
    fn pkce_mismatch_is_rejected() {
        let (mgr, _clients, client_id) = harness(1_000);
        let verifier = "a".repeat(43);
        let challenge = pkce::challenge_from_verifier(&verifier);
        let code = mgr
            .generate_authorization_code(
                &client_id,
                "u1",
                "https://example.com/callback",
                Some(challenge),
                Some("S256".into()),
                None,
            )
            .unwrap();
        let err = mgr
            .exchange_authorization_code(&code, &client_id, "https://example.com/callback", Some(&"b".repeat(43)))
            .unwrap_err();
        assert_eq!(err.kind, bridgemcp_core::ErrorKind::InvalidGrant);
    }

    #[test]
    fn pkce_match_succeeds() {
        let (mgr, _clients, client_id) = harness(1_000);
        let verifier = "a".repeat(43);
        let challenge = pkce::challenge_from_verifier(&verifier);
        let code = mgr
            .generate_authorization_code(
                &client_id,
                "u1",
                "https://example.com/callback",
                Some(challenge),
                Some("S256".into()),
                None,
            )
            .unwrap();
        let exchanged = mgr
            .exchange_authorization_code(&code, &client_id, "https://example.com/callback", Some(&verifier))
            .unwrap();
        assert_eq!(exchanged.user_id, "u1");
    }

    #[test]
    fn validate_access_token_reflects_expiry() {
        let (mgr, _clients, client_id) = harness(1_000);
        let resp = mgr.generate_access_token(&client_id, "u1", true, vec!["read".into()]).unwrap();
        let result = mgr.validate_access_token(&resp.access_token).unwrap();
        assert!(result.valid);

        let (mgr2, _clients2, client_id2) = harness(100_000);
        let resp2 = mgr2.generate_access_token(&client_id2, "u1", false, vec![]).unwrap();
        // Simulate time passing beyond expiry using a second manager sharing the KV store.
        let later_clock: SharedClock = Arc::new(bridgemcp_core::FixedClock(100_000 + 3601));
        let mgr3 = TokenManager::new(
            Arc::new(KvStore::temporary().unwrap()),
            later_clock,
            _clients2.clone(),
            TokenConfig::default(),
        );
        // Different store -> token not found, still "invalid".
        let result = mgr3.validate_access_token(&resp2.access_token).unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn refresh_rotates_and_invalidates_old_token() {
        let (mgr, _clients, client_id) = harness(1_000);
        let resp = mgr.generate_access_token(&client_id, "u1", true, vec!["read".into()]).unwrap();
        let old_refresh = resp.refresh_token.unwrap();
        let rotated = mgr.refresh_access_token(&old_refresh, &client_id).unwrap();
        assert_ne!(rotated.refresh_token.as_deref(), Some(old_refresh.as_str()));

        let err = mgr.refresh_access_token(&old_refresh, &client_id).unwrap_err();
        assert_eq!(err.kind, bridgemcp_core::ErrorKind::InvalidGrant);
    }

    #[test]
    fn revoked_client_invalidates_its_tokens() {
        let (mgr, clients, client_id) = harness(1_000);
        let resp = mgr.generate_access_token(&client_id, "u1", false, vec![]).unwrap();
        clients.revoke_client(&client_id).unwrap();
        let result = mgr.validate_access_token(&resp.access_token).unwrap();
        assert!(!result.valid);
        assert_eq!(result.error_code, Some("invalid_token"));
    }
}
