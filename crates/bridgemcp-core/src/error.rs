//! Unified error taxonomy for the OAuth gateway.
//!
//! Every fallible boundary in the workspace returns a `Result<T, Error>` (or a
//! crate-local error that converts into this one via `#[from]`). The taxonomy
//! follows the four classes laid out in spec §7: client errors (4xx, no
//! retry), session errors (recoverable by re-auth), server errors (logged,
//! retried where safe) and storage errors (surfaced externally as
//! `server_error`, logged internally with full detail).

use std::fmt;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// A single gateway-wide error type.
///
/// `code` is the stable, machine-interpretable `errorCode` string from
/// spec §7 (e.g. `"invalid_grant"`, `"third_party_reauth_required"`). It is
/// distinct from `kind`, which drives HTTP status mapping; two different
/// `kind`s can legitimately share the same RFC 6749 `error` string.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The stable `errorCode` string clients and logs key off.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Fixed user-visible guidance string for session-reauth errors (spec §7).
    pub fn guidance(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::ThirdPartyReauthRequired => {
                Some("User must complete browser-based re-authentication")
            }
            ErrorKind::ExpiredToken => Some("Refresh the MCP token via refresh_token grant"),
            _ => None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }
}

/// Error classification. Grouped by the four classes in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Client errors (user-correctable, 4xx, no retry)
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    AccessDenied,
    MissingToken,
    TokenTooShort,
    InvalidAuthorizationHeaderFormat,

    // Session errors (recoverable by re-auth)
    ExpiredToken,
    ThirdPartyReauthRequired,

    // Server errors (logged, retried where safe)
    ServerError,
    TemporarilyUnavailable,

    // Storage errors
    StorageUnavailable,

    // Generic fallback for programmer errors / unavailable dependencies.
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidClient => "invalid_client",
            ErrorKind::InvalidGrant => "invalid_grant",
            ErrorKind::UnauthorizedClient => "unauthorized_client",
            ErrorKind::UnsupportedGrantType => "unsupported_grant_type",
            ErrorKind::InvalidScope => "invalid_scope",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::MissingToken => "missing_token",
            ErrorKind::TokenTooShort => "token_too_short",
            ErrorKind::InvalidAuthorizationHeaderFormat => "invalid_authorization_header_format",
            ErrorKind::ExpiredToken => "expired_token",
            ErrorKind::ThirdPartyReauthRequired => "third_party_reauth_required",
            ErrorKind::ServerError => "server_error",
            ErrorKind::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorKind::StorageUnavailable => "server_error",
            ErrorKind::Internal => "server_error",
        }
    }

    /// HTTP status this class maps to at the edge, per spec §6/§7.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest
            | ErrorKind::InvalidGrant
            | ErrorKind::UnsupportedGrantType
            | ErrorKind::InvalidScope
            | ErrorKind::AccessDenied => 400,
            ErrorKind::InvalidClient | ErrorKind::UnauthorizedClient => 400,
            ErrorKind::MissingToken
            | ErrorKind::TokenTooShort
            | ErrorKind::InvalidAuthorizationHeaderFormat
            | ErrorKind::ExpiredToken => 401,
            ErrorKind::ThirdPartyReauthRequired => 403,
            ErrorKind::TemporarilyUnavailable => 503,
            ErrorKind::ServerError | ErrorKind::StorageUnavailable | ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_party_reauth_maps_to_403() {
        assert_eq!(ErrorKind::ThirdPartyReauthRequired.http_status(), 403);
    }

    #[test]
    fn expired_token_maps_to_401() {
        assert_eq!(ErrorKind::ExpiredToken.http_status(), 401);
    }

    #[test]
    fn guidance_strings_are_fixed() {
        let err = Error::new(ErrorKind::ThirdPartyReauthRequired, "expired upstream token");
        assert_eq!(
            err.guidance(),
            Some("User must complete browser-based re-authentication")
        );
        let err = Error::new(ErrorKind::ExpiredToken, "token expired");
        assert_eq!(
            err.guidance(),
            Some("Refresh the MCP token via refresh_token grant")
        );
        let err = Error::new(ErrorKind::InvalidRequest, "bad");
        assert_eq!(err.guidance(), None);
    }
}
