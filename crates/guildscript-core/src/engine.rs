//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared across all tenants and invocations
//! - Configured for async execution so scripts never block the host
//! - Driven by an [`EpochTicker`] that gives every store a wall clock

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use guildscript_common::{EngineConfig, ScriptError};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] configured for deadline-bounded
/// script execution. The engine is shared across all tenants and contains no
/// per-tenant state.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Async Support**: Execution yields back to the executor between epochs
/// - **Epoch Interruption**: Wall-clock deadlines for every store
/// - **Pooling Allocator** (optional): Pre-allocated instance slots
///
/// # Example
///
/// ```ignore
/// use guildscript_common::EngineConfig;
/// use guildscript_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    ticker: Arc<EpochTicker>,
}

impl WasmEngine {
    /// Create a new WebAssembly engine and start its epoch ticker.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    /// - The ticker thread cannot be spawned
    pub fn new(config: &EngineConfig) -> Result<Self, ScriptError> {
        let mut wasmtime_config = Config::new();

        // Async support lets epoch callbacks yield to the executor
        wasmtime_config.async_support(true);

        // Deadlines are enforced through epochs; there is no other limit
        wasmtime_config.epoch_interruption(true);

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            ScriptError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        let ticker = EpochTicker::spawn(engine.clone(), config.epoch_tick())?;

        info!(epoch_tick_ms = config.epoch_tick_ms, "Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            ticker: Arc::new(ticker),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Interval between epoch increments.
    pub fn epoch_tick(&self) -> Duration {
        self.ticker.interval
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_tick_ms", &self.config.epoch_tick_ms)
            .finish_non_exhaustive()
    }
}

/// Background thread incrementing the engine epoch at a fixed interval.
///
/// This runs on a dedicated OS thread rather than a tokio task: guest code
/// executing inside `poll` would otherwise starve a current-thread runtime
/// and the epoch would never advance. The thread stops when the last
/// [`WasmEngine`] clone is dropped.
pub struct EpochTicker {
    interval: Duration,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    /// Spawn a ticker for `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(engine: Engine, interval: Duration) -> Result<Self, ScriptError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("guildscript-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| {
                ScriptError::invalid_config(format!("Failed to spawn epoch ticker: {e}"))
            })?;

        debug!(interval_ms = interval.as_millis(), "Epoch ticker started");

        Ok(Self {
            interval,
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
