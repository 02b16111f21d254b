//! Instance lifecycle management and the execution deadline.
//!
//! This module provides [`InstanceRunner`], which handles the complete
//! lifecycle of one invocation:
//!
//! 1. Build a fresh [`ExecutionContext`] and store with a deadline
//! 2. Instantiate every node of the linked graph, dependencies first
//! 3. Call the entry wrapper's `main` exactly once
//! 4. Classify the outcome as success, [`ScriptError::Runtime`] or
//!    [`ScriptError::TimedOut`]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{Extern, ExternType, Instance, Linker, Store, Trap, Val};

use crate::WasmEngine;
use crate::graph::{Binding, LinkedGraph, ModuleHandle};
use crate::module::ENTRY_EXPORT;
use crate::store::{ExecutionContext, LogEntry, create_store};
use guildscript_common::{ExecutionConfig, InvocationContext, ScriptError};

/// Outcome of a successful invocation.
#[derive(Debug)]
pub struct Invocation {
    /// Integer returned by the script's `default`, if it returns one.
    pub value: Option<i64>,

    /// Logs the script emitted through the `log` binding.
    pub logs: Vec<LogEntry>,

    /// Wall-clock time from store creation to return.
    pub duration: Duration,
}

/// Instance lifecycle manager.
///
/// Holds the host binding linker shared by every invocation. Each run gets
/// its own [`Store`], so nothing leaks between invocations or tenants.
///
/// # Thread Safety
///
/// `InstanceRunner` is thread-safe and can be shared across multiple tasks.
pub struct InstanceRunner {
    engine: WasmEngine,
    linker: Linker<ExecutionContext>,
    timeout: Duration,
}

impl InstanceRunner {
    /// Create a new instance runner with no host bindings registered.
    pub fn new(engine: WasmEngine, config: &ExecutionConfig) -> Self {
        let linker = Linker::new(engine.inner());

        Self {
            engine,
            linker,
            timeout: config.timeout(),
        }
    }

    /// Get a mutable reference to the host binding linker.
    ///
    /// Use this to register host functions before sharing the runner.
    pub fn linker_mut(&mut self) -> &mut Linker<ExecutionContext> {
        &mut self.linker
    }

    /// The deadline applied by [`ModuleHandle::invoke`].
    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the engine reference.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Check that the host provides `namespace::name` with type `expected`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason if the binding is missing or its
    /// type does not match.
    pub fn check_host_import(
        &self,
        probe: &mut Store<ExecutionContext>,
        namespace: &str,
        name: &str,
        expected: &ExternType,
    ) -> Result<(), String> {
        let Some(provided) = self.linker.get(&mut *probe, namespace, name) else {
            return Err(format!("unknown host binding `{namespace}::{name}`"));
        };

        match (provided.ty(&*probe), expected) {
            (ExternType::Func(have), ExternType::Func(want)) => {
                if func_signature(&have) == func_signature(want) {
                    Ok(())
                } else {
                    Err(format!(
                        "host binding `{namespace}::{name}` has type {}, imported as {}",
                        func_signature(&have),
                        func_signature(want)
                    ))
                }
            }
            _ => Err(format!(
                "host binding `{namespace}::{name}` is not a {}",
                extern_kind(expected)
            )),
        }
    }

    /// A store with no tenant, for type-checking host bindings.
    pub fn probe_store(&self) -> Store<ExecutionContext> {
        Store::new(self.engine.inner(), ExecutionContext::detached())
    }

    /// Run `handle`'s entry point under a wall-clock deadline.
    ///
    /// The deadline covers instantiating the graph and the entry call.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::TimedOut`] if the deadline passes, otherwise
    /// [`ScriptError::Runtime`] for any trap or instantiation failure.
    #[instrument(skip_all, fields(tenant = %context.tenant_id, url = %handle.url()))]
    pub async fn run(
        &self,
        handle: &ModuleHandle,
        context: &InvocationContext,
        timeout: Duration,
    ) -> Result<Invocation, ScriptError> {
        let start = Instant::now();
        let deadline = start + timeout;

        let ctx = ExecutionContext::build(context.tenant_id.clone(), context.settings.clone());
        let mut store = create_store(&self.engine, ctx, deadline);

        let result = self.instantiate_and_call(&mut store, handle.graph()).await;

        let duration = start.elapsed();
        store.data_mut().finalize_metrics();
        let host_calls = store.data().metrics.host_calls;
        let logs = std::mem::take(&mut store.data_mut().logs);

        match result {
            Ok(value) => {
                info!(
                    duration_ms = duration.as_millis(),
                    host_calls,
                    logs = logs.len(),
                    "Execution completed successfully"
                );
                Ok(Invocation {
                    value,
                    logs,
                    duration,
                })
            }
            Err(err) => Err(classify_failure(&err, timeout, duration)),
        }
    }

    async fn instantiate_and_call(
        &self,
        store: &mut Store<ExecutionContext>,
        graph: &LinkedGraph,
    ) -> wasmtime::Result<Option<i64>> {
        let mut instances: HashMap<Uuid, Instance> = HashMap::with_capacity(graph.order().len());

        for node in graph.order() {
            let mut imports: Vec<Extern> = Vec::with_capacity(node.bindings().len());
            for binding in node.bindings() {
                let resolved = match binding {
                    Binding::Host { namespace, name } => {
                        self.linker.get(&mut *store, namespace, name)
                    }
                    Binding::Dependency { node: dep, name } => instances
                        .get(dep)
                        .and_then(|instance| instance.get_export(&mut *store, name)),
                };
                let import = resolved.ok_or_else(|| {
                    wasmtime::Error::msg(format!("unresolved import in '{}'", node.url()))
                })?;
                imports.push(import);
            }

            debug!(url = %node.url(), imports = imports.len(), "Instantiating module");
            let instance = Instance::new_async(&mut *store, node.module().inner(), &imports).await?;
            instances.insert(node.id(), instance);
            store.data_mut().metrics.instances += 1;
        }

        let entry = instances
            .get(&graph.entry().id())
            .ok_or_else(|| wasmtime::Error::msg("entry wrapper was not instantiated"))?;
        let main = entry
            .get_func(&mut *store, ENTRY_EXPORT)
            .ok_or_else(|| wasmtime::Error::msg("entry wrapper has no `main` export"))?;

        let mut results = vec![Val::I32(0); main.ty(&*store).results().len()];
        main.call_async(&mut *store, &[], &mut results).await?;

        Ok(results.first().and_then(|val| match val {
            Val::I32(v) => Some(i64::from(*v)),
            Val::I64(v) => Some(*v),
            _ => None,
        }))
    }
}

/// Map a failed run to `TimedOut` or `Runtime`.
fn classify_failure(err: &wasmtime::Error, timeout: Duration, elapsed: Duration) -> ScriptError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
        warn!(
            deadline_ms = timeout.as_millis(),
            elapsed_ms = elapsed.as_millis(),
            "Execution terminated: deadline exceeded"
        );
        return ScriptError::TimedOut {
            deadline_ms: duration_ms(timeout),
            elapsed_ms: duration_ms(elapsed),
        };
    }

    let message = err.root_cause().to_string();
    warn!(
        duration_ms = elapsed.as_millis(),
        trap_message = %message,
        "Execution trapped"
    );
    // The alternate form carries the guest backtrace but never the host's
    ScriptError::runtime(message, Some(format!("{err:#}")))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Render a function type as `(params) -> (results)`.
pub(crate) fn func_signature(ty: &wasmtime::FuncType) -> String {
    format!(
        "({}) -> ({})",
        join_types(ty.params()),
        join_types(ty.results())
    )
}

fn join_types(types: impl Iterator<Item = wasmtime::ValType>) -> String {
    types.map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
}

/// Name of an import/export kind, for error messages.
pub(crate) fn extern_kind(ty: &ExternType) -> &'static str {
    if ty.func().is_some() {
        "function"
    } else if ty.global().is_some() {
        "global"
    } else if ty.table().is_some() {
        "table"
    } else if ty.memory().is_some() {
        "memory"
    } else {
        "tag"
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
