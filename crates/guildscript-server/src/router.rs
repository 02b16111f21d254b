//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::{AdminState, build_admin_router};
use crate::handler::{health_check, invoke_command, list_commands, readiness_check};
use crate::state::AppState;

/// Admin API configuration for router.
pub struct AdminRouterConfig {
    /// Admin API prefix (e.g., "/admin").
    pub prefix: String,
    /// Admin authentication token.
    pub token: String,
}

/// Build the main application router.
///
/// Routes:
/// - `POST /guilds/:guild/commands/:name/invoke` - Run a custom command
/// - `GET /guilds/:guild/commands` - List a guild's commands
/// - `GET /health` - Health check
/// - `GET /ready` - Readiness check
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    build_router_with_admin(state, request_timeout, None)
}

/// Build the main application router with optional Admin API.
pub fn build_router_with_admin(
    state: AppState,
    request_timeout: Duration,
    admin_config: Option<AdminRouterConfig>,
) -> Router {
    let command_routes = Router::new()
        .route("/guilds/:guild/commands", get(list_commands))
        .route("/guilds/:guild/commands/:name/invoke", post(invoke_command));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    let mut router = Router::new().merge(command_routes).merge(health_routes);

    if let Some(config) = admin_config {
        let admin_router = build_admin_router(AdminState {
            admin_token: config.token,
        });
        router = router.nest(&config.prefix, admin_router);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use guildscript_common::ConfigFile;
    use tower::util::ServiceExt;

    async fn setup_router(dir: &std::path::Path) -> Router {
        let mut config = ConfigFile::default();
        config.runtime.cache.directory = dir.join("cache");
        config.guilds.settings_dir = dir.join("guilds");
        let state = AppState::from_config(&config).await.unwrap();
        build_router_with_admin(
            state,
            Duration::from_secs(30),
            Some(AdminRouterConfig {
                prefix: "/admin".to_string(),
                token: "secret".to_string(),
            }),
        )
    }

    async fn status_of(app: Router, request: Request<Body>) -> StatusCode {
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path()).await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path()).await;

        let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_commands_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path()).await;

        let request = Request::builder()
            .uri("/guilds/guild-1/commands")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path()).await;

        let request = Request::builder()
            .method("POST")
            .uri("/guilds/guild-1/commands/nope/invoke")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"issuer": "u1"}"#))
            .unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = setup_router(dir.path()).await;

        let request = Request::builder()
            .uri("/admin/guilds/guild-1/commands/hi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_absent_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigFile::default();
        config.runtime.cache.directory = dir.path().to_path_buf();
        let state = AppState::from_config(&config).await.unwrap();
        let app = build_router(state, Duration::from_secs(30));

        let request = Request::builder()
            .uri("/admin/guilds/guild-1/commands/hi")
            .header("X-Admin-Token", "secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, request).await, StatusCode::NOT_FOUND);
    }
}
