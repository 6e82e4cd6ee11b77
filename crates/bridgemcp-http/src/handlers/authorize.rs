//! `GET /authorize` (spec §4.F, §6). End-user login/SSO is explicitly out
//! of scope (spec.md §1 Non-goals), so the caller's identity is taken from
//! a `user_id` query parameter that whatever fronts this gateway is
//! expected to have already established.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bridgemcp_auth::{AuthorizeOutcome, AuthorizeRequest};
use serde::Deserialize;
use url::Url;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub async fn authorize(State(state): State<AppState>, Query(query): Query<AuthorizeQuery>) -> Response {
    if query.response_type != "code" {
        return (StatusCode::BAD_REQUEST, "only response_type=code is supported").into_response();
    }

    let request = AuthorizeRequest {
        client_id: query.client_id,
        redirect_uri: query.redirect_uri,
        state: query.state,
        scope: query.scope,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
    };

    let outcome = match state.authorize.authorize(request, &query.user_id) {
        Ok(outcome) => outcome,
        Err(e) => return (StatusCode::BAD_REQUEST, e.message).into_response(),
    };

    match outcome {
        AuthorizeOutcome::Redirect { redirect_uri, code, state } => redirect_with(&redirect_uri, &[("code", &code)], state.as_deref()),
        AuthorizeOutcome::RedirectWithError { redirect_uri, error, state } => {
            redirect_with(&redirect_uri, &[("error", error)], state.as_deref())
        }
        AuthorizeOutcome::RejectWithoutRedirect { reason } => (StatusCode::BAD_REQUEST, reason).into_response(),
    }
}

fn redirect_with(redirect_uri: &str, pairs: &[(&str, &str)], state: Option<&str>) -> Response {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return (StatusCode::BAD_REQUEST, "redirect_uri is not a valid URL").into_response();
    };
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}
