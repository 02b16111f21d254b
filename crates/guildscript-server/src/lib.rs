//! HTTP dispatch for guildscript.
//!
//! This crate serves guild custom commands over HTTP. It handles:
//!
//! - Per-guild settings and custom command definitions
//! - Running script commands through the module graph linker
//! - Error replies with detail gated by the invoker's level
//! - Health and readiness checks, and an optional Admin API
//!
//! # Quick Start
//!
//! ```ignore
//! use guildscript_common::ConfigFile;
//! use guildscript_server::{AppState, GuildServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigFile::default();
//!     let state = AppState::from_config(&config).await?;
//!
//!     GuildServer::new(state, ServerConfig::from_file(&config.server)?)
//!         .with_admin(&config.admin)
//!         .run()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod dispatch;
pub mod handler;
pub mod response;
pub mod router;
pub mod server;
pub mod settings;
pub mod state;

pub use response::{ApiError, CommandReply};
pub use server::{GuildServer, ServerConfig, TestHandle};
pub use settings::{CommandKind, CustomCommand, GuildSettings, SettingsStore};
pub use state::AppState;
