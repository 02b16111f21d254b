//! Common types, errors, and configuration for guildscript.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime settings and the config file
//! - Domain types (tenants, invocation contexts, fetched sources)
//! - Script URL validation and import specifier resolution

pub mod config;
pub mod config_file;
pub mod error;
pub mod script_url;
pub mod types;

pub use config::{CacheConfig, EngineConfig, ExecutionConfig, FetchConfig, RuntimeConfig};
pub use config_file::{AdminConfig, ConfigFile, ConfigFileError, GuildsConfig, ServerConfigFile};
pub use error::{ErrorKind, ScriptError};
pub use script_url::{parse_script_url, resolve_specifier};
pub use types::{InvocationContext, ScriptSource, SourceMetadata, TenantId, url_digest};
