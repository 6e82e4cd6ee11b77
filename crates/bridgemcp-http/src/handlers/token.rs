//! `POST /token` (spec §4.C, §4.F, §6) — `application/x-www-form-urlencoded`
//! grant_type dispatch.

use axum::Form;
use axum::extract::State;
use bridgemcp_auth::TokenRequest;
use bridgemcp_core::{Error, ErrorKind};
use serde::Deserialize;

use crate::error_response::OAuthError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<axum::Json<bridgemcp_auth::TokenResponse>, OAuthError> {
    let client_id = form
        .client_id
        .ok_or_else(|| Error::new(ErrorKind::InvalidRequest, "client_id is required"))?;

    let response = match form.grant_type.as_str() {
        // Routed through the Provider coordinator rather than the
        // Authorization Handler directly, so its peek-before-delete
        // consistency check actually runs on the live path (spec §4.H).
        "authorization_code" => {
            let code = form.code.ok_or_else(|| Error::new(ErrorKind::InvalidRequest, "code is required"))?;
            let redirect_uri = form
                .redirect_uri
                .ok_or_else(|| Error::new(ErrorKind::InvalidRequest, "redirect_uri is required"))?;
            state
                .provider
                .exchange_mcp_authorization_code(&code, &client_id, &redirect_uri, form.code_verifier.as_deref())?
        }
        "refresh_token" => {
            let refresh_token = form
                .refresh_token
                .ok_or_else(|| Error::new(ErrorKind::InvalidRequest, "refresh_token is required"))?;
            state.authorize.token(TokenRequest::RefreshToken { refresh_token, client_id })?
        }
        other => {
            return Err(Error::new(ErrorKind::UnsupportedGrantType, format!("unsupported grant_type `{other}`")).into());
        }
    };

    Ok(axum::Json(response))
}
