use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub remote_store: String,
    pub active_sessions: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let remote_store = state
        .merges
        .remote()
        .map(|store| store.describe())
        .unwrap_or_else(|| "not configured".to_string());

    Json(HealthResponse {
        status: "ok".to_string(),
        remote_store,
        active_sessions: state.sessions.len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
