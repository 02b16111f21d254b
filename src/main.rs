//! guildscript CLI entry point.
//!
//! Loads the configuration file, builds the script engine and serves guild
//! commands over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guildscript_common::ConfigFile;
use guildscript_server::{AppState, GuildServer, ServerConfig};

/// Serve sandboxed, remotely hosted scripts as per-guild chat commands.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "GUILDSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address from the configuration file.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,guildscript=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting guildscript");

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut server_config = ServerConfig::from_file(&config.server)?;
    if let Some(addr) = cli.bind {
        server_config = server_config.with_bind_addr(addr);
    }

    info!(
        bind_addr = %server_config.bind_addr,
        cache_dir = %config.runtime.cache.directory.display(),
        settings_dir = %config.guilds.settings_dir.display(),
        timeout_ms = config.runtime.execution.timeout_ms,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config)
        .await
        .context("Failed to initialize script engine")?;

    info!("Server initialized. Available endpoints:");
    info!("  GET  /health                              - Health check");
    info!("  GET  /ready                               - Readiness check");
    info!("  GET  /guilds/:guild/commands              - List commands");
    info!("  POST /guilds/:guild/commands/:name/invoke - Run a command");
    if config.admin.is_configured() {
        info!(prefix = %config.admin.prefix, "Admin API enabled");
    }

    GuildServer::new(state, server_config)
        .with_admin(&config.admin)
        .run()
        .await?;

    Ok(())
}
