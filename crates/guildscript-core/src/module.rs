//! Script compilation and entry wrapper synthesis.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that compiles a fetched script and answers the questions the linker asks of
//! it: which other scripts it imports, and what its `default` export is.
//!
//! # Script Format
//!
//! Scripts are WebAssembly modules, either as text (WAT) or binary. Imports
//! from the `context`/`global` namespaces are host bindings; any other import
//! module name is a specifier naming another script:
//!
//! ```wat
//! (module
//!   (import "./math.wat" "double" (func $double (param i32) (result i32)))
//!   (func (export "default") (result i32)
//!     (call $double (i32.const 21))))
//! ```

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{debug, instrument};
use url::Url;
use wasmtime::{Engine, ExternType, ImportType, Module, ValType};

use guildscript_common::{ScriptError, resolve_specifier};

/// Import namespaces served by the host rather than by another script.
pub const HOST_NAMESPACES: [&str; 2] = ["context", "global"];

/// Name of the export the entry wrapper binds to.
pub const DEFAULT_EXPORT: &str = "default";

/// Name of the function the entry wrapper exports.
pub const ENTRY_EXPORT: &str = "main";

/// Returns `true` if `namespace` is served by the host.
pub fn is_host_namespace(namespace: &str) -> bool {
    HOST_NAMESPACES.contains(&namespace)
}

/// A compiled script.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be shared across tenants; the
/// underlying Wasmtime module holds no instance state.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// URL (or synthetic label) the module was compiled from.
    label: String,

    /// Hash of the original bytes.
    content_hash: String,

    compiled_at: Instant,
}

/// What a script's `default` export lets the entry wrapper do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A function taking and returning nothing.
    Unit,
    /// A function returning a single integer.
    Value(EntryResult),
    /// Not a function. Invoking the script is a no-op.
    Inert,
}

/// Integer result type of an invocable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResult {
    I32,
    I64,
}

impl EntryKind {
    /// Returns `true` if the wrapper calls into the script.
    pub fn is_invocable(self) -> bool {
        !matches!(self, EntryKind::Inert)
    }
}

impl std::fmt::Display for EntryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryResult::I32 => write!(f, "i32"),
            EntryResult::I64 => write!(f, "i64"),
        }
    }
}

impl CompiledModule {
    /// Compile a script from WAT text or WebAssembly binary.
    ///
    /// # Arguments
    ///
    /// * `engine` - The Wasmtime engine to use for compilation
    /// * `label` - The script URL, used in errors and logs
    /// * `bytes` - The fetched payload
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Compile`] if the payload is not a valid module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn compile(engine: &Engine, label: &str, bytes: &[u8]) -> Result<Self, ScriptError> {
        let start = Instant::now();

        let module =
            Module::new(engine, bytes).map_err(|e| ScriptError::compile(label, format!("{e:#}")))?;

        let content_hash = compute_hash(bytes);

        debug!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Script compiled"
        );

        Ok(Self {
            inner: module,
            label: label.to_string(),
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Resolve every script import to an absolute URL.
    ///
    /// Returns a map from import specifier (as written) to resolved URL.
    /// Host namespaces are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Protocol`] if a specifier resolves to a
    /// disallowed scheme or cannot be resolved at all.
    pub fn dependencies(&self, base: &Url) -> Result<BTreeMap<String, Url>, ScriptError> {
        let mut resolved = BTreeMap::new();
        for import in self.inner.imports() {
            let specifier = import.module();
            if is_host_namespace(specifier) || resolved.contains_key(specifier) {
                continue;
            }
            let url = resolve_specifier(base, specifier)?;
            resolved.insert(specifier.to_string(), url);
        }
        Ok(resolved)
    }

    /// Iterate over the module's imports in declaration order.
    pub fn imports(&self) -> impl ExactSizeIterator<Item = ImportType<'_>> + '_ {
        self.inner.imports()
    }

    /// Look up the type of an export.
    pub fn export_type(&self, name: &str) -> Option<ExternType> {
        self.inner.get_export(name)
    }

    /// Classify the `default` export.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Compile`] if there is no `default` export, or it
    /// is a function with parameters or an unsupported result.
    pub fn entry_kind(&self) -> Result<EntryKind, ScriptError> {
        let Some(export) = self.inner.get_export(DEFAULT_EXPORT) else {
            return Err(ScriptError::compile(
                &self.label,
                "module has no `default` export",
            ));
        };

        let ExternType::Func(ty) = export else {
            return Ok(EntryKind::Inert);
        };

        if ty.params().len() != 0 {
            return Err(ScriptError::compile(
                &self.label,
                "`default` must not take parameters",
            ));
        }

        let results: Vec<ValType> = ty.results().collect();
        match results.as_slice() {
            [] => Ok(EntryKind::Unit),
            [ValType::I32] => Ok(EntryKind::Value(EntryResult::I32)),
            [ValType::I64] => Ok(EntryKind::Value(EntryResult::I64)),
            other => Err(ScriptError::compile(
                &self.label,
                format!(
                    "`default` returns ({}), expected nothing, i32 or i64",
                    other
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
            )),
        }
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Get the URL or label this module was compiled from.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("label", &self.label)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Synthesize the entry wrapper for the script at `url`.
///
/// The wrapper imports the script's `default` export and re-exports a `main`
/// function calling it. For an [`EntryKind::Inert`] script `main` does nothing.
pub fn entry_wrapper(url: &str, kind: EntryKind) -> String {
    let specifier = escape_wat_string(url);
    match kind {
        EntryKind::Unit => format!(
            "(module\n  (import \"{specifier}\" \"{DEFAULT_EXPORT}\" (func $default))\n  \
             (func (export \"{ENTRY_EXPORT}\") call $default))"
        ),
        EntryKind::Value(result) => format!(
            "(module\n  (import \"{specifier}\" \"{DEFAULT_EXPORT}\" (func $default (result {result})))\n  \
             (func (export \"{ENTRY_EXPORT}\") (result {result}) call $default))"
        ),
        EntryKind::Inert => format!("(module (func (export \"{ENTRY_EXPORT}\")))"),
    }
}

/// Label under which the wrapper for `url` is compiled.
pub fn entry_label(url: &str) -> String {
    format!("entry:{url}")
}

fn escape_wat_string(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
