//! Core script engine for guildscript.
//!
//! This crate provides module graph linking and deadline-bounded execution:
//! - [`WasmEngine`]: Configured Wasmtime engine with its epoch ticker
//! - [`CompiledModule`]: A compiled script and its entry wrapper
//! - [`GraphLinker`]: Per-tenant module graph linking and caching
//! - [`ExecutionContext`]: Per-invocation sandbox state
//! - [`InstanceRunner`]: Instantiation and the execution deadline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all tenants, thread-safe)               │
//! │  - Epoch ticker                                         │
//! │  - Compilation settings                                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              GraphLinker + TenantModuleCache            │
//! │  (Per tenant, reused across invocations)                │
//! │  - Compiled scripts, resolved imports                   │
//! │  - Entry wrapper per root URL                           │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          Store<ExecutionContext> + Instances            │
//! │  (Per invocation, isolated)                             │
//! │  - Wall-clock deadline                                  │
//! │  - Tenant identity and settings snapshot                │
//! │  - Logs and metrics                                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod graph;
pub mod instance;
pub mod linker;
pub mod module;
pub mod store;

pub use engine::{EpochTicker, WasmEngine};
pub use graph::{
    Binding, LinkedGraph, ModuleHandle, ModuleNode, NodeState, TenantModuleCache, TenantModules,
};
pub use instance::{InstanceRunner, Invocation};
pub use linker::{GraphLinker, ScriptLoader};
pub use module::{CompiledModule, EntryKind, EntryResult, HOST_NAMESPACES};
pub use store::{ExecutionContext, ExecutionMetrics, LogEntry, LogLevel, create_store};
