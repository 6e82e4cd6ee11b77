//! Monitoring endpoints (spec §6): `/api/v1/status`, `/status/health`,
//! `/status/ready`, `/status/live`, `/metrics`. GET only, JSON, no auth.

use axum::Json;
use axum::extract::State;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let health = state.transport.health();
    Json(json!({
        "status": "ok",
        "transport": format!("{:?}", state.transport.current_transport()),
        "requests_handled": health.requests_handled,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let health = state.transport.health();
    Json(json!({ "status": "healthy", "active": health.active }))
}

pub async fn ready(State(state): State<AppState>) -> Json<Value> {
    let health = state.transport.health();
    Json(json!({ "ready": health.active }))
}

pub async fn live() -> Json<Value> {
    Json(json!({ "live": true }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let health = state.transport.health();
    Json(json!({
        "requests_handled": health.requests_handled,
    }))
}
