//! Guest binding registration for Wasmtime linkers.
//!
//! Scripts reach their execution context through two namespaces, `context`
//! and its alias `global`, which expose exactly:
//!
//! | Binding | Signature | Returns |
//! |---|---|---|
//! | `tenant_id` | `(ptr, cap) -> i32` | length of the tenant id |
//! | `setting` | `(key_ptr, key_len, ptr, cap) -> i32` | length of the JSON value, or `-1` |
//! | `settings` | `(ptr, cap) -> i32` | length of the JSON snapshot |
//! | `log` | `(level, ptr, len)` | nothing |
//!
//! # Memory Protocol
//!
//! Output bindings copy at most `cap` bytes to `ptr` in the guest's exported
//! `memory` and always return the full length, so a guest can retry with a
//! larger buffer.

use tracing::warn;
use wasmtime::{Caller, Linker, Memory};

use crate::logging::LoggingHost;
use guildscript_common::{ExecutionConfig, ScriptError};
use guildscript_core::{ExecutionContext, HOST_NAMESPACES, InstanceRunner, LogLevel, WasmEngine};

/// Register all guest bindings on a core module linker, under every host
/// namespace.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<ExecutionContext>) -> Result<(), ScriptError> {
    for namespace in HOST_NAMESPACES {
        register_context(linker, namespace)?;
        register_logging(linker, namespace)?;
    }
    Ok(())
}

/// Create an [`InstanceRunner`] with every guest binding registered.
///
/// # Errors
///
/// Returns an error if binding registration fails.
pub fn create_instance_runner(
    engine: WasmEngine,
    config: &ExecutionConfig,
) -> Result<InstanceRunner, ScriptError> {
    let mut runner = InstanceRunner::new(engine, config);
    register_all(runner.linker_mut())?;
    Ok(runner)
}

/// Register `tenant_id`, `setting` and `settings` under `namespace`.
pub fn register_context(
    linker: &mut Linker<ExecutionContext>,
    namespace: &str,
) -> Result<(), ScriptError> {
    linker
        .func_wrap(
            namespace,
            "tenant_id",
            |mut caller: Caller<'_, ExecutionContext>, ptr: i32, cap: i32| {
                caller.data_mut().metrics.host_calls += 1;
                let tenant = caller.data().tenant_id().as_str().as_bytes().to_vec();
                write_guest(&mut caller, ptr, cap, &tenant)
            },
        )
        .map_err(|e| registration_failed("tenant_id", &e))?;

    linker
        .func_wrap(
            namespace,
            "setting",
            |mut caller: Caller<'_, ExecutionContext>,
             key_ptr: i32,
             key_len: i32,
             ptr: i32,
             cap: i32| {
                caller.data_mut().metrics.host_calls += 1;
                let key = read_guest_str(&mut caller, key_ptr, key_len)?;
                let Some(value) = caller.data().setting(&key) else {
                    return Ok(-1);
                };
                let encoded = serde_json::to_vec(value)?;
                write_guest(&mut caller, ptr, cap, &encoded)
            },
        )
        .map_err(|e| registration_failed("setting", &e))?;

    linker
        .func_wrap(
            namespace,
            "settings",
            |mut caller: Caller<'_, ExecutionContext>, ptr: i32, cap: i32| {
                caller.data_mut().metrics.host_calls += 1;
                let encoded = serde_json::to_vec(caller.data().global().settings())?;
                write_guest(&mut caller, ptr, cap, &encoded)
            },
        )
        .map_err(|e| registration_failed("settings", &e))?;

    Ok(())
}

/// Register the logging binding.
///
/// Registers `log(level: i32, ptr: i32, len: i32)` which allows guest
/// code to emit logs at various levels (0=debug, 1=info, 2=warn, 3=error).
/// Invalid pointers are logged host-side and the message is dropped.
pub fn register_logging(
    linker: &mut Linker<ExecutionContext>,
    namespace: &str,
) -> Result<(), ScriptError> {
    linker
        .func_wrap(
            namespace,
            "log",
            |mut caller: Caller<'_, ExecutionContext>, level: i32, ptr: i32, len: i32| {
                caller.data_mut().metrics.host_calls += 1;
                let message = match read_guest_str(&mut caller, ptr, len) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(ptr, len, error = %e, "Dropping guest log message");
                        return;
                    }
                };
                LoggingHost::log(caller.data_mut(), LogLevel::from_guest(level), &message);
            },
        )
        .map_err(|e| registration_failed("log", &e))?;

    Ok(())
}

fn registration_failed(name: &str, err: &wasmtime::Error) -> ScriptError {
    ScriptError::invalid_config(format!("Failed to register `{name}` binding: {err}"))
}

fn guest_memory(caller: &mut Caller<'_, ExecutionContext>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(wasmtime::Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest module does not export `memory`"))
}

/// Convert a guest pointer/length pair to a checked byte range.
#[allow(clippy::cast_sign_loss)]
fn guest_range(ptr: i32, len: i32) -> wasmtime::Result<(usize, usize)> {
    if ptr < 0 || len < 0 {
        return Err(wasmtime::Error::msg(format!(
            "negative pointer or length ({ptr}, {len})"
        )));
    }
    Ok((ptr as usize, len as usize))
}

fn read_guest_str(
    caller: &mut Caller<'_, ExecutionContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<String> {
    let (start, len) = guest_range(ptr, len)?;
    let memory = guest_memory(caller)?;

    // Bounds are checked against the guest memory before anything is copied
    let data = memory.data(&*caller);
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            wasmtime::Error::msg(format!(
                "guest read out of bounds ({start} + {len} > {})",
                data.len()
            ))
        })?;

    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn write_guest(
    caller: &mut Caller<'_, ExecutionContext>,
    ptr: i32,
    cap: i32,
    bytes: &[u8],
) -> wasmtime::Result<i32> {
    let (start, cap) = guest_range(ptr, cap)?;
    let full = i32::try_from(bytes.len())
        .map_err(|_| wasmtime::Error::msg("value too large for guest"))?;

    let n = cap.min(bytes.len());
    if n > 0 {
        let memory = guest_memory(caller)?;
        memory
            .write(&mut *caller, start, &bytes[..n])
            .map_err(|e| wasmtime::Error::msg(format!("guest write out of bounds: {e}")))?;
    }

    Ok(full)
}
