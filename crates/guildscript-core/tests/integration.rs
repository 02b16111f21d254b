//! Integration tests for guildscript-core.
//!
//! These tests drive the full pipeline against an in-memory loader:
//! - Graph linking, caching and invalidation per tenant
//! - Entry wrapper behaviour for each kind of `default` export
//! - Guest bindings through the host crate's linker
//! - Deadline enforcement and error classification

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use url::Url;

use guildscript_common::{
    EngineConfig, ExecutionConfig, InvocationContext, ScriptError, ScriptSource,
};
use guildscript_core::{GraphLinker, ScriptLoader, WasmEngine};
use guildscript_host::create_instance_runner;

// ============================================================================
// Test loader
// ============================================================================

/// Serves scripts from memory, with a persisted copy per URL like the
/// content store keeps.
#[derive(Default)]
struct MemoryLoader {
    remote: Mutex<HashMap<String, String>>,
    stored: Mutex<HashMap<String, Arc<ScriptSource>>>,
    fetches: AtomicUsize,
}

impl MemoryLoader {
    fn with(scripts: &[(&str, &str)]) -> Arc<Self> {
        let loader = Self::default();
        for (url, wat) in scripts {
            loader.publish(url, wat);
        }
        Arc::new(loader)
    }

    fn publish(&self, url: &str, wat: &str) {
        self.remote.lock().insert(url.to_string(), wat.to_string());
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn fetch(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self
            .remote
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ScriptError::http_status(url.as_str(), 404))?;
        let source = Arc::new(ScriptSource::new(url.as_str(), body.into_bytes(), issuer));
        self.stored
            .lock()
            .insert(url.to_string(), Arc::clone(&source));
        Ok(source)
    }
}

#[async_trait]
impl ScriptLoader for MemoryLoader {
    async fn load(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError> {
        if let Some(source) = self.stored.lock().get(url.as_str()) {
            return Ok(Arc::clone(source));
        }
        self.fetch(url, issuer)
    }

    async fn refresh(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError> {
        self.fetch(url, issuer)
    }
}

fn linker_for(loader: &Arc<MemoryLoader>) -> GraphLinker {
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    let runner = create_instance_runner(engine, &ExecutionConfig::default()).unwrap();
    GraphLinker::new(Arc::new(runner), Arc::clone(loader) as Arc<dyn ScriptLoader>)
}

fn ctx(tenant: &str) -> InvocationContext {
    InvocationContext::new(tenant, "user-1")
}

const CMD: &str = "https://example.test/cmd.wat";

// ============================================================================
// Test: Entry Contract
// ============================================================================

#[tokio::test]
async fn test_unit_default_runs_without_side_effects() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "default")))"#)]);
    let linker = linker_for(&loader);

    let handle = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();
    let invocation = handle.invoke(&ctx("guild-1")).await.unwrap();

    assert_eq!(invocation.value, None);
    assert!(invocation.logs.is_empty());
    assert_eq!(handle.module_count(), 2);
}

#[tokio::test]
async fn test_value_default_is_returned() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module (func (export "default") (result i32) i32.const 42))"#,
    )]);
    let linker = linker_for(&loader);

    let handle = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();
    let invocation = handle.invoke(&ctx("guild-1")).await.unwrap();

    assert_eq!(invocation.value, Some(42));
}

#[tokio::test]
async fn test_non_invocable_default_is_noop() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module (global (export "default") i32 (i32.const 5)))"#,
    )]);
    let linker = linker_for(&loader);

    let handle = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();
    let invocation = handle.invoke(&ctx("guild-1")).await.unwrap();

    assert_eq!(invocation.value, None);
    // The script itself is still instantiated
    assert_eq!(handle.module_count(), 2);
}

#[tokio::test]
async fn test_missing_default_is_compile_error() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "run")))"#)]);
    let linker = linker_for(&loader);

    let err = assert_err!(linker.get_module(CMD, &ctx("guild-1")).await);

    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(!linker.cache().contains(&ctx("guild-1").tenant_id, CMD));
}

#[tokio::test]
async fn test_invalid_source_is_not_cached() {
    let loader = MemoryLoader::with(&[(CMD, "export default () => {}")]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let err = linker.get_module(CMD, &context).await.unwrap_err();
    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(!linker.cache().contains(&context.tenant_id, CMD));

    // Fixing the script and refreshing makes the next call succeed
    loader.publish(CMD, r#"(module (func (export "default")))"#);
    linker.update_script(CMD, &context).await.unwrap();

    let handle = assert_ok!(linker.get_module(CMD, &context).await);
    assert_ok!(handle.invoke(&context).await);
}

// ============================================================================
// Test: URL Acceptance
// ============================================================================

#[tokio::test]
async fn test_rejected_scheme_performs_no_fetch() {
    let loader = MemoryLoader::with(&[]);
    let linker = linker_for(&loader);

    let err = linker
        .get_module("ftp://example.test/x.wat", &ctx("guild-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Protocol { .. }));
    assert_eq!(loader.fetches(), 0);
}

#[tokio::test]
async fn test_import_with_rejected_scheme() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module (import "ftp://example.test/x.wat" "f" (func)) (func (export "default")))"#,
    )]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();

    assert!(matches!(err, ScriptError::Protocol { .. }));
    assert_eq!(loader.fetches(), 1);
}

#[tokio::test]
async fn test_missing_script_is_network_error() {
    let loader = MemoryLoader::with(&[]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Network {
            status: Some(404),
            ..
        }
    ));
}

// ============================================================================
// Test: Graph Linking
// ============================================================================

#[tokio::test]
async fn test_cycle_is_detected() {
    let loader = MemoryLoader::with(&[
        (
            "https://example.test/a.wat",
            r#"(module (import "./b.wat" "f" (func)) (func (export "default")))"#,
        ),
        (
            "https://example.test/b.wat",
            r#"(module (import "./a.wat" "g" (func)) (func (export "f")))"#,
        ),
    ]);
    let linker = linker_for(&loader);

    let err = linker
        .get_module("https://example.test/a.wat", &ctx("guild-1"))
        .await
        .unwrap_err();

    match err {
        ScriptError::CyclicDependency { chain } => assert_eq!(
            chain,
            vec![
                "https://example.test/a.wat",
                "https://example.test/b.wat",
                "https://example.test/a.wat",
            ]
        ),
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(linker.cache().tenant(&ctx("guild-1").tenant_id).node_count(), 0);
}

#[tokio::test]
async fn test_self_import_is_a_cycle() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module (import "./cmd.wat" "default" (func)) (func (export "default")))"#,
    )]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();
    assert!(matches!(err, ScriptError::CyclicDependency { ref chain } if chain.len() == 2));
}

#[tokio::test]
async fn test_relative_nested_imports() {
    let loader = MemoryLoader::with(&[
        (
            "https://example.test/scripts/cmd.wat",
            r#"(module
                 (import "../lib/math.wat" "double" (func $double (result i32)))
                 (func (export "default") (result i32) call $double))"#,
        ),
        (
            "https://example.test/lib/math.wat",
            r#"(module
                 (import "./consts.wat" "base" (global $base i32))
                 (func (export "double") (result i32)
                   (i32.mul (global.get $base) (i32.const 2))))"#,
        ),
        (
            "https://example.test/lib/consts.wat",
            r#"(module (global (export "base") i32 (i32.const 21)))"#,
        ),
    ]);
    let linker = linker_for(&loader);

    let handle = linker
        .get_module("https://example.test/scripts/cmd.wat", &ctx("guild-1"))
        .await
        .unwrap();
    let invocation = handle.invoke(&ctx("guild-1")).await.unwrap();

    assert_eq!(invocation.value, Some(42));
    assert_eq!(handle.module_count(), 4);
}

const DIAMOND: [(&str, &str); 4] = [
    (
        "https://example.test/a.wat",
        r#"(module
             (import "./b.wat" "two" (func $two (result i32)))
             (import "./c.wat" "three" (func $three (result i32)))
             (func (export "default") (result i32)
               (i32.mul (call $two) (call $three))))"#,
    ),
    (
        "https://example.test/b.wat",
        r#"(module
             (import "./d.wat" "one" (func $one (result i32)))
             (func (export "two") (result i32) (i32.add (call $one) (call $one))))"#,
    ),
    (
        "https://example.test/c.wat",
        r#"(module
             (import "./d.wat" "one" (func $one (result i32)))
             (func (export "three") (result i32) (i32.add (call $one) (i32.const 2))))"#,
    ),
    (
        "https://example.test/d.wat",
        r#"(module (func (export "one") (result i32) i32.const 1))"#,
    ),
];

#[tokio::test]
async fn test_diamond_dependencies_link_once() {
    let loader = MemoryLoader::with(&DIAMOND);
    let linker = linker_for(&loader);

    let handle = linker
        .get_module("https://example.test/a.wat", &ctx("guild-1"))
        .await
        .unwrap();

    assert_eq!(loader.fetches(), 4);
    assert_eq!(handle.module_count(), 5);
    assert_eq!(handle.invoke(&ctx("guild-1")).await.unwrap().value, Some(6));
}

#[tokio::test]
async fn test_failed_roots_leave_no_nodes() {
    let loader = MemoryLoader::with(&DIAMOND);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    // Libraries without a `default` export cannot be roots
    for lib in ["https://example.test/b.wat", "https://example.test/c.wat"] {
        let err = linker.get_module(lib, &context).await.unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }));
    }

    let modules = linker.cache().tenant(&context.tenant_id);
    assert_eq!(modules.node_count(), 0);

    let a = linker
        .get_module("https://example.test/a.wat", &context)
        .await
        .unwrap();
    assert_eq!(modules.node_count(), 4);
    assert_eq!(modules.entry_count(), 1);
    assert_eq!(a.invoke(&context).await.unwrap().value, Some(6));
}

#[tokio::test]
async fn test_missing_dependency_export() {
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module (import "./d.wat" "four" (func (result i32))) (func (export "default")))"#,
        ),
        (
            "https://example.test/d.wat",
            r#"(module (func (export "one") (result i32) i32.const 1))"#,
        ),
    ]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();

    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(err.to_string().contains("four"));
}

#[tokio::test]
async fn test_dependency_signature_mismatch() {
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module (import "./d.wat" "one" (func (result i64))) (func (export "default")))"#,
        ),
        (
            "https://example.test/d.wat",
            r#"(module (func (export "one") (result i32) i32.const 1))"#,
        ),
    ]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();
    assert!(matches!(err, ScriptError::Compile { .. }));
}

#[tokio::test]
async fn test_dependency_memory_limits_mismatch() {
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module (import "./d.wat" "mem" (memory 10)) (func (export "default")))"#,
        ),
        ("https://example.test/d.wat", r#"(module (memory (export "mem") 1 1))"#),
    ]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let err = linker.get_module(CMD, &context).await.unwrap_err();

    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(err.to_string().contains("memory limits"), "{err}");
    let modules = linker.cache().tenant(&context.tenant_id);
    assert_eq!(modules.node_count(), 0);
    assert_eq!(modules.entry_count(), 0);
}

#[tokio::test]
async fn test_dependency_table_limits_mismatch() {
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module (import "./d.wat" "tab" (table 1 2 funcref)) (func (export "default")))"#,
        ),
        ("https://example.test/d.wat", r#"(module (table (export "tab") 1 funcref))"#),
    ]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();

    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(err.to_string().contains("table limits"), "{err}");
}

#[tokio::test]
async fn test_dependency_memory_within_limits_links() {
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module
                (import "./d.wat" "mem" (memory 1 8))
                (func (export "default") (result i32) i32.const 5))"#,
        ),
        ("https://example.test/d.wat", r#"(module (memory (export "mem") 2 4))"#),
    ]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = assert_ok!(linker.get_module(CMD, &context).await);
    let outcome = assert_ok!(handle.invoke(&context).await);

    assert_eq!(outcome.value, Some(5));
}

#[tokio::test]
async fn test_unknown_host_import() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module (import "context" "fs_read" (func)) (func (export "default")))"#,
    )]);
    let linker = linker_for(&loader);

    let err = linker.get_module(CMD, &ctx("guild-1")).await.unwrap_err();

    assert!(matches!(err, ScriptError::Compile { .. }));
    assert!(err.to_string().contains("fs_read"));
}

// ============================================================================
// Test: Caching and Invalidation
// ============================================================================

#[tokio::test]
async fn test_get_module_is_memoized() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "default")))"#)]);
    let linker = linker_for(&loader);

    let first = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();
    let second = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();

    assert!(Arc::ptr_eq(first.graph(), second.graph()));
    assert_eq!(loader.fetches(), 1);
}

#[tokio::test]
async fn test_tenants_get_independent_graphs() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "default")))"#)]);
    let linker = linker_for(&loader);

    let one = linker.get_module(CMD, &ctx("guild-1")).await.unwrap();
    let two = linker.get_module(CMD, &ctx("guild-2")).await.unwrap();

    assert!(!Arc::ptr_eq(one.graph(), two.graph()));
    assert_ne!(one.graph().entry().id(), two.graph().entry().id());
    // The persisted source is shared, the linked nodes are not
    assert_eq!(loader.fetches(), 1);
}

#[tokio::test]
async fn test_update_invalidates_only_requesting_tenant() {
    let v1 = r#"(module (func (export "default") (result i32) i32.const 1))"#;
    let v2 = r#"(module (func (export "default") (result i32) i32.const 2))"#;
    let loader = MemoryLoader::with(&[(CMD, v1)]);
    let linker = linker_for(&loader);
    let (one, two) = (ctx("guild-1"), ctx("guild-2"));

    let before = linker.get_module(CMD, &one).await.unwrap();
    linker.get_module(CMD, &two).await.unwrap();

    loader.publish(CMD, v2);
    let text = linker.update_script(CMD, &one).await.unwrap();
    assert!(text.contains("i32.const 2"));
    assert_eq!(loader.fetches(), 2);

    let after = linker.get_module(CMD, &one).await.unwrap();
    assert!(!Arc::ptr_eq(before.graph(), after.graph()));
    assert_eq!(after.invoke(&one).await.unwrap().value, Some(2));

    // The other tenant keeps its linked graph until it refreshes too
    let other = linker.get_module(CMD, &two).await.unwrap();
    assert_eq!(other.invoke(&two).await.unwrap().value, Some(1));
}

#[tokio::test]
async fn test_invalidation_is_shallow() {
    let lib = "https://example.test/lib.wat";
    let loader = MemoryLoader::with(&[
        (
            CMD,
            r#"(module
                 (import "./lib.wat" "value" (func $value (result i32)))
                 (func (export "default") (result i32) call $value))"#,
        ),
        (
            lib,
            r#"(module (func (export "value") (result i32) i32.const 1)
                       (func (export "default")))"#,
        ),
    ]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let cmd = linker.get_module(CMD, &context).await.unwrap();
    assert_eq!(cmd.invoke(&context).await.unwrap().value, Some(1));

    loader.publish(
        lib,
        r#"(module (func (export "value") (result i32) i32.const 2)
                   (func (export "default")))"#,
    );
    linker.update_script(lib, &context).await.unwrap();

    // The dependent still runs against the version it was linked with
    let cmd = linker.get_module(CMD, &context).await.unwrap();
    assert_eq!(cmd.invoke(&context).await.unwrap().value, Some(1));

    // Refreshing the dependent picks up the new library
    linker.update_script(CMD, &context).await.unwrap();
    let cmd = linker.get_module(CMD, &context).await.unwrap();
    assert_eq!(cmd.invoke(&context).await.unwrap().value, Some(2));
}

// ============================================================================
// Test: Execution Context
// ============================================================================

#[tokio::test]
async fn test_context_bindings_and_global_alias() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module
             (import "context" "tenant_id" (func $tenant_id (param i32 i32) (result i32)))
             (import "global" "setting" (func $setting (param i32 i32 i32 i32) (result i32)))
             (import "context" "log" (func $log (param i32 i32 i32)))
             (memory (export "memory") 1)
             (data (i32.const 0) "prefix")
             (data (i32.const 16) "hello from script")
             (func (export "default") (result i32)
               (call $log (i32.const 1) (i32.const 16) (i32.const 17))
               (drop (call $setting (i32.const 0) (i32.const 6) (i32.const 64) (i32.const 16)))
               (i32.add
                 (i32.mul (call $tenant_id (i32.const 128) (i32.const 32)) (i32.const 1000))
                 (i32.load8_u (i32.const 65)))))"#,
    )]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1").with_settings(json!({"prefix": "!"}));

    let handle = linker.get_module(CMD, &context).await.unwrap();
    let invocation = handle.invoke(&context).await.unwrap();

    // len("guild-1") * 1000 + '!' from the JSON-encoded "\"!\""
    assert_eq!(invocation.value, Some(7033));
    assert_eq!(invocation.logs.len(), 1);
    assert_eq!(invocation.logs[0].message, "hello from script");
}

#[tokio::test]
async fn test_missing_setting_and_json_pointer() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module
             (import "context" "setting" (func $setting (param i32 i32 i32 i32) (result i32)))
             (memory (export "memory") 1)
             (data (i32.const 0) "nope")
             (data (i32.const 8) "/limits/max")
             (func (export "default") (result i32)
               (i32.add
                 (i32.mul (call $setting (i32.const 0) (i32.const 4) (i32.const 64) (i32.const 8))
                          (i32.const 100))
                 (call $setting (i32.const 8) (i32.const 11) (i32.const 64) (i32.const 8)))))"#,
    )]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1").with_settings(json!({"limits": {"max": 12345}}));

    let handle = linker.get_module(CMD, &context).await.unwrap();

    // -1 * 100 + len("12345")
    assert_eq!(handle.invoke(&context).await.unwrap().value, Some(-95));
}

#[tokio::test]
async fn test_settings_snapshot_is_per_invocation() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module
             (import "context" "settings" (func $settings (param i32 i32) (result i32)))
             (memory (export "memory") 1)
             (func (export "default") (result i32)
               (call $settings (i32.const 0) (i32.const 0))))"#,
    )]);
    let linker = linker_for(&loader);

    let small = ctx("guild-1").with_settings(json!({"a": 1}));
    let large = ctx("guild-1").with_settings(json!({"a": 1, "b": 2}));
    let handle = linker.get_module(CMD, &small).await.unwrap();

    assert_eq!(handle.invoke(&small).await.unwrap().value, Some(7));
    assert_eq!(handle.invoke(&large).await.unwrap().value, Some(13));
}

#[tokio::test]
async fn test_no_state_leaks_between_invocations() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module
             (global $count (mut i32) (i32.const 0))
             (func (export "default") (result i32)
               (global.set $count (i32.add (global.get $count) (i32.const 1)))
               (global.get $count)))"#,
    )]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = linker.get_module(CMD, &context).await.unwrap();

    assert_eq!(handle.invoke(&context).await.unwrap().value, Some(1));
    assert_eq!(handle.invoke(&context).await.unwrap().value, Some(1));
}

#[tokio::test]
async fn test_oversized_guest_string_traps() {
    let loader = MemoryLoader::with(&[(
        CMD,
        r#"(module
             (import "context" "setting" (func $setting (param i32 i32 i32 i32) (result i32)))
             (memory (export "memory") 1)
             (func (export "default") (result i32)
               (call $setting (i32.const 0) (i32.const 2147483647) (i32.const 0) (i32.const 0))))"#,
    )]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = linker.get_module(CMD, &context).await.unwrap();
    let err = handle.invoke(&context).await.unwrap_err();

    match err {
        ScriptError::Runtime { message, .. } => {
            assert!(message.contains("out of bounds"), "{message}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

// ============================================================================
// Test: Execution Governor
// ============================================================================

const SPIN: &str = r#"(module (func (export "default") (loop $l (br $l))))"#;

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let loader = MemoryLoader::with(&[(CMD, SPIN)]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = linker.get_module(CMD, &context).await.unwrap();

    let start = Instant::now();
    let err = handle.invoke(&context).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
    assert!(matches!(
        err,
        ScriptError::TimedOut {
            deadline_ms: 100,
            ..
        }
    ));
}

#[tokio::test]
async fn test_explicit_deadline() {
    let loader = MemoryLoader::with(&[(CMD, SPIN)]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = linker.get_module(CMD, &context).await.unwrap();
    let err = linker
        .runner()
        .run(&handle, &context, Duration::from_millis(20))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScriptError::TimedOut {
            deadline_ms: 20,
            ..
        }
    ));
}

#[tokio::test]
async fn test_spinning_script_does_not_block_others() {
    let quick = "https://example.test/quick.wat";
    let loader = MemoryLoader::with(&[
        (CMD, SPIN),
        (
            quick,
            r#"(module (func (export "default") (result i32) i32.const 1))"#,
        ),
    ]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let spin = linker.get_module(CMD, &context).await.unwrap();
    let fast = linker.get_module(quick, &context).await.unwrap();

    let (slow, done) = tokio::join!(spin.invoke(&context), fast.invoke(&context));

    assert!(slow.unwrap_err().is_timeout());
    assert_eq!(done.unwrap().value, Some(1));
}

#[tokio::test]
async fn test_trap_is_runtime_error() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "default") unreachable))"#)]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    let handle = linker.get_module(CMD, &context).await.unwrap();
    let err = handle.invoke(&context).await.unwrap_err();

    match &err {
        ScriptError::Runtime { message, detail } => {
            assert!(message.contains("unreachable"));
            let detail = detail.as_deref().unwrap();
            assert!(detail.contains("wasm backtrace"), "{detail}");
            // Host source paths stay out of guest-facing detail
            assert!(!detail.contains(".rs:"), "{detail}");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
    assert!(!err.is_timeout());
    assert!(err.diagnostic().len() >= err.to_string().len());
}

#[tokio::test]
async fn test_handle_survives_failed_invocation() {
    let loader = MemoryLoader::with(&[(CMD, r#"(module (func (export "default") unreachable))"#)]);
    let linker = linker_for(&loader);
    let context = ctx("guild-1");

    linker.get_module(CMD, &context).await.unwrap();
    let handle = linker.get_module(CMD, &context).await.unwrap();

    assert!(handle.invoke(&context).await.is_err());
    assert!(handle.invoke(&context).await.is_err());
    assert_eq!(loader.fetches(), 1);
}
