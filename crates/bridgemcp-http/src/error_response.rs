//! Maps `bridgemcp_core::Error` onto the two JSON error shapes in spec §6:
//! RFC 6749 `{error, error_description}` for OAuth endpoints, and
//! `{error: {message, status, details}}` for everything else.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bridgemcp_core::Error;
use serde_json::json;

fn status_for(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Wraps an error so the `IntoResponse` impl below renders the RFC 6749
/// `{error, error_description}` shape used by `/register`, `/authorize` and
/// `/token`.
pub struct OAuthError(pub Error);

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind.http_status());
        let body = json!({
            "error": self.0.kind.code(),
            "error_description": self.0.message,
        });
        (status, Json(body)).into_response()
    }
}

/// Wraps an error so the `IntoResponse` impl below renders the generic
/// `{error: {message, status, details}}` shape used by non-OAuth endpoints.
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind.http_status());
        let body = json!({
            "error": {
                "message": self.0.message,
                "status": status.as_u16(),
                "details": self.0.kind.guidance(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for OAuthError {
    fn from(e: Error) -> Self {
        OAuthError(e)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}
