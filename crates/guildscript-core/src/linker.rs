//! Module graph linking.
//!
//! [`GraphLinker`] turns a script URL into an invocable [`ModuleHandle`]:
//!
//! 1. Return the tenant's cached handle if there is one
//! 2. Otherwise walk the import graph depth-first, loading and compiling
//!    each script not already linked for this tenant
//! 3. Check every import against the export (or host binding) it names
//! 4. Wrap the root in a synthesized entry module and commit the new nodes
//!    to the tenant cache
//!
//! Sources come from a [`ScriptLoader`], which owns fetching and the
//! persistent content store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::WasmEngine;
use crate::graph::{Binding, LinkedGraph, ModuleHandle, ModuleNode, NodeState, TenantModuleCache};
use crate::instance::{InstanceRunner, extern_kind, func_signature};
use crate::module::{
    CompiledModule, DEFAULT_EXPORT, entry_label, entry_wrapper, is_host_namespace,
};
use guildscript_common::{InvocationContext, ScriptError, ScriptSource, TenantId, parse_script_url};

/// Source of script payloads.
///
/// Implemented by the host crate on top of the content store and fetcher.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    /// Return the stored source for `url`, fetching it on first use.
    async fn load(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError>;

    /// Fetch `url` again, bypassing the store, and persist the result.
    async fn refresh(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError>;
}

/// Links scripts into per-tenant module graphs.
pub struct GraphLinker {
    engine: WasmEngine,
    runner: Arc<InstanceRunner>,
    loader: Arc<dyn ScriptLoader>,
    cache: TenantModuleCache,
}

enum Frame {
    Enter(Url),
    Exit(String),
}

impl GraphLinker {
    pub fn new(runner: Arc<InstanceRunner>, loader: Arc<dyn ScriptLoader>) -> Self {
        Self {
            engine: runner.engine().clone(),
            runner,
            loader,
            cache: TenantModuleCache::new(),
        }
    }

    pub fn cache(&self) -> &TenantModuleCache {
        &self.cache
    }

    pub fn runner(&self) -> &Arc<InstanceRunner> {
        &self.runner
    }

    /// Get an invocable handle for the script at `url`.
    ///
    /// Cached handles are returned as-is. A miss links the whole graph and
    /// caches it for the tenant, unless the URL was invalidated meanwhile.
    ///
    /// # Errors
    ///
    /// - [`ScriptError::Protocol`] for a non-`http(s)` URL, before any load
    /// - [`ScriptError::Network`]/[`ScriptError::Forbidden`] from the loader
    /// - [`ScriptError::Compile`] for invalid sources or unresolvable imports
    /// - [`ScriptError::CyclicDependency`] if the import graph loops
    #[instrument(skip_all, fields(tenant = %context.tenant_id, url = %url))]
    pub async fn get_module(
        &self,
        url: &str,
        context: &InvocationContext,
    ) -> Result<ModuleHandle, ScriptError> {
        let root = parse_script_url(url)?;
        let tenant = self.cache.tenant(&context.tenant_id);

        if let Some(handle) = tenant.entry(root.as_str()) {
            debug!("Module cache hit");
            return Ok(handle);
        }

        let start = Instant::now();
        let generation = tenant.generation();

        let mut created = Vec::new();
        let result = self
            .link(&context.tenant_id, &root, &context.issuer, &mut created)
            .await;

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                for node in &created {
                    node.fail();
                }
                warn!(error = %err, "Linking failed");
                return Err(err);
            }
        };

        let committed = tenant.commit(generation, &created, &handle);

        info!(
            modules = handle.module_count(),
            linked = created.len(),
            committed,
            duration_ms = start.elapsed().as_millis(),
            "Module graph linked"
        );

        Ok(handle)
    }

    /// Re-fetch `url` and drop it from the requesting tenant's cache.
    ///
    /// Invalidation is shallow: scripts that import `url` keep the version
    /// they were linked against until they are refreshed themselves.
    ///
    /// Returns the new source as text.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Protocol`] for a non-`http(s)` URL and any
    /// fetch or store failure from the loader.
    #[instrument(skip_all, fields(tenant = %context.tenant_id, url = %url))]
    pub async fn update_script(
        &self,
        url: &str,
        context: &InvocationContext,
    ) -> Result<String, ScriptError> {
        let url = parse_script_url(url)?;
        let source = self.loader.refresh(&url, &context.issuer).await?;

        let removed = self.invalidate(&context.tenant_id, url.as_str());
        info!(size = source.size(), removed, "Script updated");

        Ok(source.text().into_owned())
    }

    /// Drop `url` from one tenant's cache.
    pub fn invalidate(&self, tenant: &TenantId, url: &str) -> bool {
        self.cache.invalidate(tenant, url)
    }

    async fn link(
        &self,
        tenant: &TenantId,
        root: &Url,
        issuer: &str,
        created: &mut Vec<Arc<ModuleNode>>,
    ) -> Result<ModuleHandle, ScriptError> {
        let modules = self.cache.tenant(tenant);

        let mut local: HashMap<String, Arc<ModuleNode>> = HashMap::new();
        let mut path: Vec<String> = Vec::new();
        let mut stack = vec![Frame::Enter(root.clone())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(url) => {
                    let key = url.to_string();

                    if let Some(node) = local.get(&key) {
                        if node.state() == NodeState::Linking {
                            let start = path.iter().position(|p| *p == key).unwrap_or(0);
                            let mut chain = path[start..].to_vec();
                            chain.push(key);
                            return Err(ScriptError::CyclicDependency { chain });
                        }
                        continue;
                    }

                    if let Some(node) = modules.node(&key) {
                        debug!(url = %key, "Reusing linked module");
                        local.insert(key, node);
                        continue;
                    }

                    let source = self.loader.load(&url, issuer).await?;
                    let module = CompiledModule::compile(self.engine.inner(), &key, source.bytes())?;
                    let dependencies = module.dependencies(&url)?;

                    let node = Arc::new(ModuleNode::new(
                        key.clone(),
                        Some(source),
                        module,
                        dependencies,
                    ));
                    created.push(Arc::clone(&node));
                    node.transition(NodeState::Linking)?;

                    stack.push(Frame::Exit(key.clone()));
                    for dep in node.dependencies().values().rev() {
                        stack.push(Frame::Enter(dep.clone()));
                    }
                    path.push(key.clone());
                    local.insert(key, node);
                }
                Frame::Exit(key) => {
                    let node = local.get(&key).cloned().ok_or_else(|| {
                        ScriptError::compile(&key, "module vanished while linking")
                    })?;
                    resolve_bindings(&node, &local)?;
                    node.transition(NodeState::Linked)?;
                    path.pop();
                }
            }
        }

        let root_node = local
            .get(root.as_str())
            .cloned()
            .ok_or_else(|| ScriptError::compile(root.as_str(), "root module was not linked"))?;

        self.check_host_bindings(created)?;

        let entry = self.build_entry(&root_node)?;
        for node in created.iter() {
            node.transition(NodeState::Instantiated)?;
        }

        let graph = LinkedGraph::new(tenant.clone(), root.as_str(), entry);
        Ok(ModuleHandle::new(Arc::new(graph), Arc::clone(&self.runner)))
    }

    /// Synthesize and link the entry wrapper around `root`.
    fn build_entry(&self, root: &Arc<ModuleNode>) -> Result<Arc<ModuleNode>, ScriptError> {
        let kind = root.module().entry_kind()?;
        let label = entry_label(root.url());
        let wat = entry_wrapper(root.url(), kind);
        let module = CompiledModule::compile(self.engine.inner(), &label, wat.as_bytes())?;

        let url = Url::parse(root.url()).map_err(|e| ScriptError::protocol(root.url(), e.to_string()))?;
        let dependencies = [(root.url().to_string(), url)].into_iter().collect();
        let entry = Arc::new(ModuleNode::new(label, None, module, dependencies));

        let bindings = if kind.is_invocable() {
            vec![Binding::Dependency {
                node: root.id(),
                name: DEFAULT_EXPORT.to_string(),
            }]
        } else {
            Vec::new()
        };
        // Inert scripts are still a dependency so they get instantiated
        entry.attach(vec![Arc::clone(root)], bindings);

        entry.transition(NodeState::Linking)?;
        entry.transition(NodeState::Linked)?;
        entry.transition(NodeState::Instantiated)?;
        Ok(entry)
    }

    /// Verify every host import of the freshly linked nodes.
    fn check_host_bindings(&self, nodes: &[Arc<ModuleNode>]) -> Result<(), ScriptError> {
        let mut probe = self.runner.probe_store();

        for node in nodes {
            for import in node.module().imports() {
                if !is_host_namespace(import.module()) {
                    continue;
                }
                self.runner
                    .check_host_import(&mut probe, import.module(), import.name(), &import.ty())
                    .map_err(|reason| ScriptError::compile(node.url(), reason))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for GraphLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphLinker")
            .field("tenants", &self.cache.tenant_count())
            .finish_non_exhaustive()
    }
}

/// Match each import of `node` to a host binding or a dependency export.
fn resolve_bindings(
    node: &Arc<ModuleNode>,
    local: &HashMap<String, Arc<ModuleNode>>,
) -> Result<(), ScriptError> {
    let mut bindings = Vec::new();
    let mut linked: Vec<Arc<ModuleNode>> = Vec::new();

    for import in node.module().imports() {
        let specifier = import.module();
        let name = import.name();

        if is_host_namespace(specifier) {
            bindings.push(Binding::Host {
                namespace: specifier.to_string(),
                name: name.to_string(),
            });
            continue;
        }

        let dep = node
            .dependencies()
            .get(specifier)
            .and_then(|url| local.get(url.as_str()))
            .ok_or_else(|| {
                ScriptError::compile(node.url(), format!("unresolved import `{specifier}`"))
            })?;

        let Some(export) = dep.module().export_type(name) else {
            return Err(ScriptError::compile(
                node.url(),
                format!("`{specifier}` has no export named `{name}`"),
            ));
        };
        check_export_type(&import.ty(), &export).map_err(|reason| {
            ScriptError::compile(node.url(), format!("import `{specifier}::{name}`: {reason}"))
        })?;

        if !linked.iter().any(|n| n.id() == dep.id()) {
            linked.push(Arc::clone(dep));
        }
        bindings.push(Binding::Dependency {
            node: dep.id(),
            name: name.to_string(),
        });
    }

    node.attach(linked, bindings);
    Ok(())
}

/// An export satisfies an import when its limits fit inside the import's.
fn check_limits(
    what: &str,
    (want_min, want_max): (u64, Option<u64>),
    (have_min, have_max): (u64, Option<u64>),
) -> Result<(), String> {
    let fits_max = match (want_max, have_max) {
        (None, _) => true,
        (Some(want), Some(have)) => have <= want,
        (Some(_), None) => false,
    };
    if have_min >= want_min && fits_max {
        Ok(())
    } else {
        Err(format!(
            "{what} limits (min {have_min}, max {}) do not satisfy (min {want_min}, max {})",
            describe_max(have_max),
            describe_max(want_max)
        ))
    }
}

fn describe_max(max: Option<u64>) -> String {
    max.map_or_else(|| "none".to_string(), |m| m.to_string())
}

fn check_export_type(
    wanted: &wasmtime::ExternType,
    provided: &wasmtime::ExternType,
) -> Result<(), String> {
    use wasmtime::ExternType;

    match (wanted, provided) {
        (ExternType::Func(want), ExternType::Func(have)) => {
            let (want, have) = (func_signature(want), func_signature(have));
            if want == have {
                Ok(())
            } else {
                Err(format!("expected {want}, found {have}"))
            }
        }
        (ExternType::Global(want), ExternType::Global(have)) => {
            if want.content().to_string() == have.content().to_string()
                && want.mutability() == have.mutability()
            {
                Ok(())
            } else {
                Err("global type mismatch".to_string())
            }
        }
        (ExternType::Memory(want), ExternType::Memory(have)) => {
            if want.is_64() != have.is_64() || want.is_shared() != have.is_shared() {
                return Err("memory index type or sharing differs".to_string());
            }
            check_limits(
                "memory",
                (want.minimum(), want.maximum()),
                (have.minimum(), have.maximum()),
            )
        }
        (ExternType::Table(want), ExternType::Table(have)) => {
            let (want_elem, have_elem) = (want.element().to_string(), have.element().to_string());
            if want_elem != have_elem {
                return Err(format!("expected table of {want_elem}, found table of {have_elem}"));
            }
            check_limits(
                "table",
                (u64::from(want.minimum()), want.maximum().map(u64::from)),
                (u64::from(have.minimum()), have.maximum().map(u64::from)),
            )
        }
        _ => Err(format!(
            "expected a {}, found a {}",
            extern_kind(wanted),
            extern_kind(provided)
        )),
    }
}
