//! Route table and endpoint access policy (spec §4.L, §6). Public routes
//! (discovery, OAuth, monitoring) and the protected `/mcp` route are built
//! as two separate groups so `auth_middleware` can be mounted with
//! `route_layer` on only the group that needs it, rather than as a blanket
//! path-matching layer.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{authorize, mcp, register, status, token, well_known};
use crate::middleware::auth_middleware;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/status", get(status::status))
        .route("/status/health", get(status::health))
        .route("/status/ready", get(status::ready))
        .route("/status/live", get(status::live))
        .route("/api/v1/status", get(status::status))
        .route("/metrics", get(status::metrics))
        .route(
            "/.well-known/oauth-authorization-server",
            get(well_known::authorization_server_metadata),
        )
        .route("/authorize", get(authorize::authorize))
        .route("/token", post(token::token))
        .route("/register", post(register::register));

    let protected = Router::new()
        .route("/mcp", post(mcp::mcp_post).get(mcp::mcp_sse))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    public.merge(protected).with_state(state)
}
