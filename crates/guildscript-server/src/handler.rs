//! Request handlers for command invocation and monitoring.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::dispatch::{InvokeRequest, dispatch};
use crate::response::{ApiError, CommandReply};
use crate::state::AppState;

/// Invoke a guild's custom command.
///
/// `POST /guilds/:guild/commands/:name/invoke`
#[instrument(skip_all, fields(guild = %guild, command = %name, request_id = tracing::field::Empty))]
pub async fn invoke_command(
    State(state): State<AppState>,
    Path((guild, name)): Path<(String, String)>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<CommandReply>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());

    info!(issuer = %request.issuer, "Handling command");

    let reply = dispatch(&state, &guild, &name, request).await?;

    info!(
        duration_ms = start.elapsed().as_millis(),
        log_count = reply.logs.len(),
        "Request completed"
    );
    Ok(Json(reply))
}

/// List a guild's prefix and custom command names.
///
/// `GET /guilds/:guild/commands`
pub async fn list_commands(
    State(state): State<AppState>,
    Path(guild): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings().get(&guild).await?;
    let names: Vec<&String> = settings.commands.keys().collect();

    Ok(Json(serde_json::json!({
        "prefix": settings.prefix,
        "commands": names,
        "count": names.len(),
    })))
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let linker = state.linker();
    let body = serde_json::json!({
        "status": "ready",
        "tenants": linker.cache().tenant_count(),
        "guilds_loaded": state.settings().loaded(),
        "pooling": linker.runner().engine().is_pooling_enabled(),
    });

    (StatusCode::OK, Json(body))
}
