//! OAuth 2.0 dual-role authorization subsystem with MCP session binding.
//!
//! This crate implements components B through H and M: the Credential
//! Store, Token Manager, PKCE Handler, Client Registry, Authorization
//! Handler, OAuth Consumer, the OAuth Provider coordinator, and Request
//! Context. Component A (the KV Store) lives in `bridgemcp-kv`; this crate
//! builds entirely on top of it.

pub mod authorize;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod context;
pub mod credentials;
pub mod pkce;
pub mod provider;
pub mod tokens;
pub mod types;

pub use authorize::{AuthorizationHandler, AuthorizeOutcome, AuthorizeRequest, TokenRequest};
pub use clients::{ClientRegistrationRequest, ClientRegistrationResponse, ClientRegistry, ClientValidity};
pub use config::AuthConfig;
pub use consumer::{
    AuthUrlAndState, ConsumerSessionBinding, ExchangedTokens, GenericAdapter, OAuthConsumer, ThirdPartyAdapter,
};
pub use context::{current, execute_with_auth_context, Context};
pub use credentials::CredentialStore;
pub use provider::{ApiClient, AuthContext, AuthService, OAuthProvider};
pub use tokens::TokenManager;
pub use types::{
    AccessTokenRecord, AuthorizationCode, ClientRegistration, ConsumerAuthorizationRequest,
    McpAuthorizationRequest, RefreshTokenRecord, ThirdPartyCredentials, TokenResponse, TokenValidation,
};
