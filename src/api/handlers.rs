use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use zeroize::Zeroize;

use crate::api::extract::{self, ValidJson};
use crate::api::{route_table, RouteInfo};
use crate::errors::AppError;
use crate::middleware::auth::AuthUser;
use crate::AppState;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

/// Plaintext is moved out and scrubbed by the store; never logged.
fn take_password(req: &mut CredentialsRequest) -> Result<String, AppError> {
    if req.password.is_empty() {
        return Err(AppError::Validation("`password` must not be empty".into()));
    }
    Ok(std::mem::take(&mut req.password))
}

/// POST /api/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ValidJson(mut req): ValidJson<CredentialsRequest>,
) -> Result<Json<Value>, AppError> {
    let username = match extract::username(&req.username) {
        Ok(name) => name,
        Err(e) => {
            req.password.zeroize();
            return Err(e);
        }
    };
    let password = take_password(&mut req)?;

    state.users.register(&username, password).await?;

    Ok(Json(json!({
        "message": "User registered successfully",
        "username": username,
    })))
}

/// POST /api/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidJson(mut req): ValidJson<CredentialsRequest>,
) -> Result<Json<Value>, AppError> {
    let password = take_password(&mut req)?;
    let user = state.users.verify(req.username.trim(), password).await?;

    let token = state
        .tokens
        .issue(&user.username)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token signing failed: {}", e)))?;

    tracing::info!(user = %user.username, "login succeeded");
    Ok(Json(json!({
        "access_token": token.token,
        "token_type": "Bearer",
        "expires_in": state.tokens.ttl().num_seconds(),
        "expires_at": token.expires_at,
    })))
}

#[derive(Deserialize)]
pub struct ScheduleTaskRequest {
    pub time: String,
    pub url: String,
}

/// POST /api/schedule/task
pub async fn schedule_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidJson(req): ValidJson<ScheduleTaskRequest>,
) -> Result<Json<Value>, AppError> {
    let fire_at = extract::timestamp("time", &req.time)?;
    let url = extract::http_url("url", &req.url)?;

    let handle = state.scheduler.schedule(url, fire_at);
    state.metrics.record_task("scheduled");
    tracing::info!(task_id = %handle.id, user = %user.username, fire_at = %handle.fire_at, "task scheduled");

    Ok(Json(json!({
        "message": "Task scheduled",
        "task_id": handle.id,
        "fire_at": handle.fire_at,
    })))
}

/// GET /api/routes
pub async fn list_routes() -> Json<Vec<RouteInfo>> {
    Json(route_table())
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
