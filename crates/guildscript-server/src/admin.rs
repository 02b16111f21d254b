//! Admin API handlers for managing guild commands.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header to match the
//! configured admin token. The comparison is constant-time.
//!
//! # Endpoints
//!
//! - `POST /admin/guilds/:guild/commands` - Add a command
//! - `GET /admin/guilds/:guild/commands/:name` - Get command info
//! - `DELETE /admin/guilds/:guild/commands/:name` - Remove a command
//! - `POST /admin/guilds/:guild/commands/:name/update` - Refresh a script

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use guildscript_common::{InvocationContext, parse_script_url};

use crate::response::ApiError;
use crate::settings::{CommandKind, CustomCommand};
use crate::state::AppState;

/// Header carrying the admin token.
pub const TOKEN_HEADER: &str = "X-Admin-Token";

/// Admin API state containing the expected token.
#[derive(Clone)]
pub struct AdminState {
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Body of an add request.
///
/// ```json
/// {"name": "hello", "creator": "1234", "type": "script", "url": "https://..."}
/// ```
#[derive(Debug, Deserialize)]
pub struct AddCommand {
    pub name: String,
    pub creator: String,
    #[serde(flatten)]
    pub kind: CommandKind,
}

/// Body of an update request.
#[derive(Debug, Deserialize)]
pub struct UpdateCommand {
    /// User requesting the refresh, recorded in the source metadata.
    pub issuer: String,
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/guilds/:guild/commands", post(add_command))
        .route(
            "/guilds/:guild/commands/:name",
            get(command_info).delete(remove_command),
        )
        .route("/guilds/:guild/commands/:name/update", post(update_command))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let Some(token) = headers.get(TOKEN_HEADER) else {
        return Err(ApiError::Unauthorized("Missing X-Admin-Token header"));
    };
    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected admin request with invalid token");
        Err(ApiError::Unauthorized("Invalid admin token"))
    }
}

/// Add a custom command to a guild.
///
/// Script URLs must be absolute `http`/`https` URLs. Existing commands are
/// never overwritten.
#[instrument(skip_all, fields(guild = %guild))]
pub async fn add_command(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminState>,
    headers: HeaderMap,
    Path(guild): Path<String>,
    Json(body): Json<AddCommand>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin.admin_token)?;

    if let CommandKind::Script { url } = &body.kind {
        parse_script_url(url)?;
    }

    let name = body.name;
    let command = CustomCommand {
        kind: body.kind,
        creator: body.creator,
    };

    let added = state
        .settings()
        .update(&guild, |settings| {
            if settings.commands.contains_key(&name) {
                return false;
            }
            settings.commands.insert(name.clone(), command);
            true
        })
        .await?;

    if !added {
        return Err(ApiError::Conflict(format!("Command `{name}` already exists")));
    }

    info!(command = %name, "Command added");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "name": name,
            "message": "Command added successfully"
        })),
    ))
}

/// Remove a custom command.
#[instrument(skip_all, fields(guild = %guild, command = %name))]
pub async fn remove_command(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminState>,
    headers: HeaderMap,
    Path((guild, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin.admin_token)?;

    let removed = state
        .settings()
        .update(&guild, |settings| settings.commands.remove(&name))
        .await?;

    if removed.is_none() {
        return Err(ApiError::NotFound(format!("Command `{name}` does not exist")));
    }

    info!("Command removed");
    Ok(Json(serde_json::json!({
        "name": name,
        "message": "Command removed successfully"
    })))
}

/// Show a custom command's stored definition.
pub async fn command_info(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminState>,
    headers: HeaderMap,
    Path((guild, name)): Path<(String, String)>,
) -> Result<Json<CustomCommand>, ApiError> {
    verify_token(&headers, &admin.admin_token)?;

    let mut settings = state.settings().get(&guild).await?;
    settings
        .commands
        .remove(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Command `{name}` does not exist")))
}

/// Re-fetch a script command's source and drop the guild's cached graph.
///
/// Responds with the new source text.
#[instrument(skip_all, fields(guild = %guild, command = %name))]
pub async fn update_command(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminState>,
    headers: HeaderMap,
    Path((guild, name)): Path<(String, String)>,
    Json(body): Json<UpdateCommand>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin.admin_token)?;

    let settings = state.settings().get(&guild).await?;
    let url = match settings.commands.get(&name).map(|c| &c.kind) {
        Some(CommandKind::Script { url }) => url.clone(),
        Some(CommandKind::Text { .. }) => {
            return Err(ApiError::BadRequest(format!(
                "Command `{name}` is not a script command"
            )));
        }
        None => return Err(ApiError::NotFound(format!("Command `{name}` does not exist"))),
    };

    let context = InvocationContext::new(guild.as_str(), body.issuer)
        .with_settings(settings.snapshot());
    let source = state.update_script(&url, &context).await?;

    info!(size = source.len(), "Script updated");
    Ok(Json(serde_json::json!({
        "name": name,
        "url": url,
        "source": source,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "secret".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_ok());
    }

    #[test]
    fn test_verify_token_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "wrong".parse().unwrap());

        let err = verify_token(&headers, "secret").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_verify_token_prefix_is_not_enough() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "secre".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_err());
    }

    #[test]
    fn test_verify_token_missing() {
        let err = verify_token(&HeaderMap::new(), "secret").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_add_body_shape() {
        let body: AddCommand = serde_json::from_str(
            r#"{"name": "hi", "creator": "u1", "type": "text", "text": "hello %user"}"#,
        )
        .unwrap();

        assert_eq!(body.name, "hi");
        assert!(matches!(body.kind, CommandKind::Text { ref text } if text == "hello %user"));
    }
}
