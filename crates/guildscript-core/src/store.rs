//! Per-invocation execution context and store management.
//!
//! This module provides:
//! - [`ExecutionContext`]: The only state a script can reach, scoped to one
//!   tenant and one invocation's settings
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`ExecutionMetrics`]: Performance metrics for each execution
//! - [`create_store`]: A fresh store armed with a wall-clock deadline

use std::time::{Duration, Instant};

use serde_json::Value;
use wasmtime::{Store, Trap, UpdateDeadline};

use crate::WasmEngine;
use guildscript_common::TenantId;

/// Per-invocation execution context.
///
/// This struct holds all state a script can observe. It is built for each
/// invocation and dropped with its store afterwards, so nothing a script
/// does carries over to the next command.
///
/// Host functions can access this context through the [`wasmtime::Caller`] API.
///
/// # Contents
///
/// - `tenant_id`: Identity of the guild the command runs in
/// - `settings`: Snapshot of the guild's settings at dispatch time
/// - `logs`: Collected log entries from guest code
/// - `metrics`: Execution performance metrics
///
/// The `global` binding namespace resolves to this same context, see
/// [`ExecutionContext::global`].
pub struct ExecutionContext {
    tenant_id: TenantId,

    settings: Value,

    /// Logs collected from guest code.
    pub logs: Vec<LogEntry>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    /// Execution start time.
    start_time: Instant,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map the integer level passed by guests. Unknown values become `Info`.
    pub fn from_guest(level: i32) -> Self {
        match level {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Number of modules instantiated for this invocation.
    pub instances: usize,

    /// Number of host binding calls made by the guest.
    pub host_calls: u64,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl ExecutionContext {
    /// Build a fresh context for one tenant and one settings snapshot.
    pub fn build(tenant_id: TenantId, settings: Value) -> Self {
        Self {
            tenant_id,
            settings,
            logs: Vec::new(),
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// A context bound to no tenant, used to type-check host bindings.
    pub fn detached() -> Self {
        Self::build(TenantId::new(""), Value::Null)
    }

    /// The context's self-reference.
    ///
    /// Scripts importing from `global` and from `context` see the same
    /// bindings; this is the Rust side of that alias.
    pub fn global(&self) -> &Self {
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Look up a setting.
    ///
    /// Keys starting with `/` are JSON pointers into the snapshot; anything
    /// else is a top-level field name.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        if key.starts_with('/') {
            self.settings.pointer(key)
        } else {
            self.settings.get(key)
        }
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Get elapsed time since the context was built.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("tenant_id", &self.tenant_id)
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store that traps once `deadline` has passed.
///
/// The store yields back to the executor on every epoch tick, so a script
/// spinning in a loop never blocks other tasks. When a tick lands past the
/// deadline the store traps with [`Trap::Interrupt`].
///
/// # Arguments
///
/// * `engine` - The shared Wasmtime engine
/// * `context` - The invocation's execution context
/// * `deadline` - Wall-clock instant after which execution is aborted
pub fn create_store(
    engine: &WasmEngine,
    context: ExecutionContext,
    deadline: Instant,
) -> Store<ExecutionContext> {
    let mut store = Store::new(engine.inner(), context);

    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(move |_| {
        if Instant::now() >= deadline {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Yield(1))
        }
    });

    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildscript_common::EngineConfig;
    use serde_json::json;

    #[test]
    fn test_context_creation() {
        let ctx = ExecutionContext::build(TenantId::from("guild-1"), json!({"prefix": "!"}));

        assert_eq!(ctx.tenant_id().as_str(), "guild-1");
        assert!(ctx.logs.is_empty());
        assert_eq!(ctx.metrics.host_calls, 0);
        assert!(std::ptr::eq(ctx.global(), &ctx));
    }

    #[test]
    fn test_setting_lookup() {
        let ctx = ExecutionContext::build(
            TenantId::from("guild-1"),
            json!({"prefix": "!", "commands": {"hi": {"type": "text"}}}),
        );

        assert_eq!(ctx.setting("prefix"), Some(&json!("!")));
        assert_eq!(ctx.setting("/commands/hi/type"), Some(&json!("text")));
        assert_eq!(ctx.setting("missing"), None);
        assert_eq!(ctx.setting("/commands/nope"), None);
    }

    #[test]
    fn test_detached_context_is_empty() {
        let ctx = ExecutionContext::detached();
        assert_eq!(ctx.tenant_id().as_str(), "");
        assert_eq!(ctx.setting("prefix"), None);
    }

    #[test]
    fn test_context_logging() {
        let mut ctx = ExecutionContext::detached();

        ctx.log(LogLevel::Info, "Hello".into());
        ctx.log(LogLevel::Error, "World".into());

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.logs[0].message, "Hello");
        assert_eq!(ctx.logs[1].level, LogLevel::Error);
    }

    #[test]
    fn test_log_level_from_guest() {
        assert_eq!(LogLevel::from_guest(0), LogLevel::Debug);
        assert_eq!(LogLevel::from_guest(1), LogLevel::Info);
        assert_eq!(LogLevel::from_guest(2), LogLevel::Warn);
        assert_eq!(LogLevel::from_guest(3), LogLevel::Error);
        assert_eq!(LogLevel::from_guest(42), LogLevel::Info);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_store_creation() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let deadline = Instant::now() + Duration::from_millis(100);

        let store = create_store(&engine, ExecutionContext::detached(), deadline);
        assert_eq!(store.data().tenant_id().as_str(), "");
    }
}
