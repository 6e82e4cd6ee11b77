//! `POST /register` — RFC 7591 dynamic client registration (spec §6).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use bridgemcp_auth::ClientRegistrationRequest;

use crate::error_response::OAuthError;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<ClientRegistrationRequest>,
) -> Result<(StatusCode, Json<bridgemcp_auth::ClientRegistrationResponse>), OAuthError> {
    let response = state.clients.register_client(request)?;
    Ok((StatusCode::CREATED, Json(response)))
}
