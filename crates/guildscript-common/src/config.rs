//! Configuration structures for guildscript.
//!
//! This module defines configuration options for the engine components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, deadline resolution)
//! - [`ExecutionConfig`]: Per-invocation limits (wall-clock timeout)
//! - [`FetchConfig`]: Script fetching (timeouts, size cap, URL policy)
//! - [`CacheConfig`]: Location of the persistent content store

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the script engine.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Script fetching configuration.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Content store configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// Off by default: script graphs are small and pooling reserves virtual
    /// memory for every slot up front.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Interval between epoch increments in milliseconds.
    ///
    /// Scripts check their deadline once per tick, so this bounds how far
    /// past its deadline a runaway script can get.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }
}

/// Per-invocation execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Wall-clock budget for one invocation, in milliseconds.
    ///
    /// Covers instantiation of the whole module graph and the entry call.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Script fetching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Total request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "defaults::connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Largest accepted script payload in bytes.
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,

    /// `User-Agent` header sent with every fetch.
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Hosts scripts may be fetched from.
    ///
    /// Patterns can be exact (`scripts.example.com`), wildcard subdomain
    /// (`*.example.com`) or `*` for any host.
    #[serde(default = "defaults::allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// Refuse loopback, private and link-local addresses.
    #[serde(default = "defaults::block_private_addresses")]
    pub block_private_addresses: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: defaults::request_timeout_secs(),
            connect_timeout_secs: defaults::connect_timeout_secs(),
            max_body_bytes: defaults::max_body_bytes(),
            user_agent: defaults::user_agent(),
            allowed_hosts: defaults::allowed_hosts(),
            block_private_addresses: defaults::block_private_addresses(),
        }
    }
}

impl FetchConfig {
    /// Get the request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Content store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding `<digest>.src` and `<digest>.meta.json` artifacts.
    #[serde(default = "defaults::cache_directory")]
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: defaults::cache_directory(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn epoch_tick_ms() -> u64 {
        5
    }

    pub const fn timeout_ms() -> u64 {
        100
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn connect_timeout_secs() -> u64 {
        10
    }

    pub const fn max_body_bytes() -> usize {
        1024 * 1024
    }

    pub fn user_agent() -> String {
        concat!("guildscript/", env!("CARGO_PKG_VERSION")).to_string()
    }

    pub fn allowed_hosts() -> Vec<String> {
        vec!["*".to_string()]
    }

    pub const fn block_private_addresses() -> bool {
        true
    }

    pub fn cache_directory() -> PathBuf {
        PathBuf::from(".cache").join("script")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert_eq!(config.engine.instance_memory_mb, 64);
        assert_eq!(config.engine.epoch_tick_ms, 5);

        assert_eq!(config.execution.timeout_ms, 100);

        assert_eq!(config.fetch.request_timeout_secs, 30);
        assert_eq!(config.fetch.max_body_bytes, 1024 * 1024);
        assert_eq!(config.fetch.allowed_hosts, vec!["*".to_string()]);
        assert!(config.fetch.block_private_addresses);
        assert!(config.fetch.user_agent.starts_with("guildscript/"));

        assert_eq!(config.cache.directory, PathBuf::from(".cache/script"));
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(
            config.execution.timeout_ms,
            deserialized.execution.timeout_ms
        );
        assert_eq!(config.cache.directory, deserialized.cache.directory);
    }

    #[test]
    fn test_durations() {
        let execution = ExecutionConfig { timeout_ms: 500 };
        assert_eq!(execution.timeout(), Duration::from_millis(500));

        let engine = EngineConfig {
            epoch_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(engine.epoch_tick(), Duration::from_millis(1));

        let fetch = FetchConfig::default();
        assert_eq!(fetch.request_timeout(), Duration::from_secs(30));
        assert_eq!(fetch.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"execution": {"timeout_ms": 250}, "fetch": {"allowed_hosts": ["*.example.com"]}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.execution.timeout_ms, 250);
        assert_eq!(config.fetch.allowed_hosts, vec!["*.example.com".to_string()]);
        // Defaults for unspecified fields
        assert!(config.fetch.block_private_addresses);
        assert_eq!(config.engine.epoch_tick_ms, 5);
    }
}
