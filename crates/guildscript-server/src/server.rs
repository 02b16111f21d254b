//! HTTP server implementation.
//!
//! This module provides [`GuildServer`], which serves command dispatch and
//! the optional Admin API.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use guildscript_common::{AdminConfig, ScriptError, ServerConfigFile};

use crate::router::{AdminRouterConfig, build_router_with_admin};
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` section of a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_addr` is not a socket address.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, ScriptError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            ScriptError::invalid_config(format!("Invalid bind address '{}': {e}", file.bind_addr))
        })?;
        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Guild command HTTP server.
pub struct GuildServer {
    state: AppState,
    config: ServerConfig,
    admin: Option<AdminRouterConfig>,
}

impl GuildServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self {
            state,
            config,
            admin: None,
        }
    }

    /// Enable the Admin API if `admin` is enabled and has a token.
    pub fn with_admin(mut self, admin: &AdminConfig) -> Self {
        self.admin = match (&admin.token, admin.is_configured()) {
            (Some(token), true) => Some(AdminRouterConfig {
                prefix: admin.prefix.clone(),
                token: token.clone(),
            }),
            _ => {
                if admin.enabled {
                    warn!("Admin API enabled without a token; leaving it off");
                }
                None
            }
        };
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), ScriptError> {
        let admin_enabled = self.admin.is_some();
        let app = build_router_with_admin(self.state, self.config.request_timeout(), self.admin);

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| ScriptError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, admin_enabled, "Starting HTTP server");

        let serve = axum::serve(listener, app);
        let result = if self.config.graceful_shutdown {
            serve.with_graceful_shutdown(shutdown_signal()).await
        } else {
            serve.await
        };
        result.map_err(|e| ScriptError::invalid_config(format!("Server error: {e}")))?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server on an ephemeral port (127.0.0.1:0) and return a
    /// handle for tests.
    pub async fn start_test(self) -> Result<TestHandle, ScriptError> {
        let state = self.state.clone();
        let app = build_router_with_admin(self.state, self.config.request_timeout(), self.admin);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| ScriptError::invalid_config(format!("Failed to bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ScriptError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
pub struct TestHandle {
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
