//! Module graph nodes and the per-tenant module cache.
//!
//! - [`ModuleNode`]: One linked script for one tenant
//! - [`LinkedGraph`] and [`ModuleHandle`]: A fully linked graph rooted at an
//!   entry wrapper, ready to be invoked
//! - [`TenantModuleCache`]: Linked nodes and entry handles, partitioned by
//!   tenant so nothing is shared between guilds

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::instance::{Invocation, InstanceRunner};
use crate::module::CompiledModule;
use guildscript_common::{InvocationContext, ScriptError, ScriptSource, TenantId};

/// Lifecycle state of a [`ModuleNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unlinked,
    Linking,
    Linked,
    Instantiated,
    Failed,
}

impl NodeState {
    /// Returns `true` if `self -> next` is a legal transition.
    ///
    /// `Failed` is terminal: a failed node is discarded, never revived.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::{Failed, Instantiated, Linked, Linking, Unlinked};
        matches!(
            (self, next),
            (Unlinked, Linking)
                | (Linking, Linked)
                | (Linked, Instantiated)
                | (Unlinked | Linking | Linked | Instantiated, Failed)
        )
    }

    /// Returns `true` if the node can be reused by another link.
    pub fn is_reusable(self) -> bool {
        matches!(self, NodeState::Linked | NodeState::Instantiated)
    }
}

/// Where one import of a module is satisfied from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A host function from the `context`/`global` namespace.
    Host { namespace: String, name: String },
    /// An export of another node in the same graph.
    Dependency { node: Uuid, name: String },
}

/// Links resolved when a node finishes linking.
#[derive(Debug)]
struct Linkage {
    dependencies: Vec<Arc<ModuleNode>>,
    bindings: Vec<Binding>,
}

/// One linked script for one tenant.
///
/// Nodes are never shared between tenants. A node keeps its dependencies
/// alive by reference, so refreshing a dependency does not affect nodes that
/// were linked against the previous version.
pub struct ModuleNode {
    id: Uuid,
    url: String,
    source: Option<Arc<ScriptSource>>,
    module: CompiledModule,

    /// Import specifier to resolved URL.
    dependencies: BTreeMap<String, Url>,

    linkage: OnceLock<Linkage>,
    state: Mutex<NodeState>,
}

impl ModuleNode {
    /// Create an unlinked node.
    ///
    /// `source` is `None` for synthesized entry wrappers.
    pub fn new(
        url: impl Into<String>,
        source: Option<Arc<ScriptSource>>,
        module: CompiledModule,
        dependencies: BTreeMap<String, Url>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            source,
            module,
            dependencies,
            linkage: OnceLock::new(),
            state: Mutex::new(NodeState::Unlinked),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> Option<&Arc<ScriptSource>> {
        self.source.as_ref()
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Import specifier to resolved URL.
    pub fn dependencies(&self) -> &BTreeMap<String, Url> {
        &self.dependencies
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Move the node to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Compile`] for an illegal transition.
    pub fn transition(&self, next: NodeState) -> Result<(), ScriptError> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(ScriptError::compile(
                &self.url,
                format!("illegal module state change {:?} -> {next:?}", *state),
            ));
        }
        debug!(url = %self.url, from = ?*state, to = ?next, "Module state changed");
        *state = next;
        Ok(())
    }

    /// Mark the node failed. Nodes already failed stay failed.
    pub fn fail(&self) {
        let mut state = self.state.lock();
        if *state != NodeState::Failed {
            debug!(url = %self.url, from = ?*state, "Module failed");
            *state = NodeState::Failed;
        }
    }

    /// Record resolved dependencies and import bindings. Only the first call
    /// has any effect.
    pub(crate) fn attach(&self, dependencies: Vec<Arc<ModuleNode>>, bindings: Vec<Binding>) {
        let _ = self.linkage.set(Linkage {
            dependencies,
            bindings,
        });
    }

    /// Linked dependency nodes, in specifier order. Empty until linked.
    pub fn linked_dependencies(&self) -> &[Arc<ModuleNode>] {
        self.linkage
            .get()
            .map_or(&[], |linkage| linkage.dependencies.as_slice())
    }

    /// Bindings for each import, in import order. Empty until linked.
    pub fn bindings(&self) -> &[Binding] {
        self.linkage
            .get()
            .map_or(&[], |linkage| linkage.bindings.as_slice())
    }
}

impl std::fmt::Debug for ModuleNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleNode")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("dependencies", &self.dependencies.len())
            .finish_non_exhaustive()
    }
}

/// A fully linked graph for one tenant.
#[derive(Debug)]
pub struct LinkedGraph {
    tenant: TenantId,
    url: String,
    entry: Arc<ModuleNode>,

    /// Every node reachable from `entry`, dependencies first.
    order: Vec<Arc<ModuleNode>>,
}

impl LinkedGraph {
    /// Build a graph rooted at an entry wrapper.
    pub fn new(tenant: TenantId, url: impl Into<String>, entry: Arc<ModuleNode>) -> Self {
        let order = topological_order(&entry);
        Self {
            tenant,
            url: url.into(),
            entry,
            order,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// URL of the script the graph was built for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The synthesized entry wrapper.
    pub fn entry(&self) -> &Arc<ModuleNode> {
        &self.entry
    }

    /// Nodes in instantiation order.
    pub fn order(&self) -> &[Arc<ModuleNode>] {
        &self.order
    }
}

/// Post-order walk from `entry`, each node once.
fn topological_order(entry: &Arc<ModuleNode>) -> Vec<Arc<ModuleNode>> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(Arc::clone(entry), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !seen.insert(node.id()) {
            continue;
        }
        stack.push((Arc::clone(&node), true));
        for dep in node.linked_dependencies().iter().rev() {
            if !seen.contains(&dep.id()) {
                stack.push((Arc::clone(dep), false));
            }
        }
    }

    order
}

/// An invocable handle to a linked script.
///
/// Cloning is cheap. Each [`invoke`](ModuleHandle::invoke) instantiates the
/// graph into a fresh store, so invocations never observe each other.
#[derive(Clone)]
pub struct ModuleHandle {
    graph: Arc<LinkedGraph>,
    runner: Arc<InstanceRunner>,
}

impl ModuleHandle {
    pub fn new(graph: Arc<LinkedGraph>, runner: Arc<InstanceRunner>) -> Self {
        Self { graph, runner }
    }

    /// Run the script's entry point under the runner's default deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::TimedOut`] if the deadline passes and
    /// [`ScriptError::Runtime`] if the script traps.
    pub async fn invoke(&self, context: &InvocationContext) -> Result<Invocation, ScriptError> {
        self.runner
            .run(self, context, self.runner.default_timeout())
            .await
    }

    pub fn graph(&self) -> &Arc<LinkedGraph> {
        &self.graph
    }

    pub fn url(&self) -> &str {
        self.graph.url()
    }

    pub fn tenant(&self) -> &TenantId {
        self.graph.tenant()
    }

    /// Number of modules instantiated per invocation, wrapper included.
    pub fn module_count(&self) -> usize {
        self.graph.order().len()
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("tenant", self.graph.tenant())
            .field("url", &self.graph.url())
            .field("modules", &self.module_count())
            .finish()
    }
}

/// Linked state of one tenant.
#[derive(Debug, Default)]
pub struct TenantModules {
    /// Reusable nodes by URL.
    nodes: DashMap<String, Arc<ModuleNode>>,

    /// Entry handles by root URL.
    entries: DashMap<String, ModuleHandle>,

    /// Bumped on every invalidation. Guards commits of links that started
    /// before an invalidation.
    generation: Mutex<u64>,
}

impl TenantModules {
    /// Look up a cached entry handle.
    pub fn entry(&self, url: &str) -> Option<ModuleHandle> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    /// Look up a reusable node.
    pub fn node(&self, url: &str) -> Option<Arc<ModuleNode>> {
        self.nodes
            .get(url)
            .map(|node| Arc::clone(node.value()))
            .filter(|node| node.state().is_reusable())
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Insert freshly linked nodes and the entry handle, unless an
    /// invalidation happened since `generation` was read.
    ///
    /// Returns `true` if the commit took place.
    pub fn commit(&self, generation: u64, nodes: &[Arc<ModuleNode>], handle: &ModuleHandle) -> bool {
        let current = self.generation.lock();
        if *current != generation {
            return false;
        }
        for node in nodes {
            self.nodes.insert(node.url().to_string(), Arc::clone(node));
        }
        self.entries
            .insert(handle.url().to_string(), handle.clone());
        true
    }

    /// Drop the node and entry cached for `url`.
    ///
    /// Dependents are left alone. Returns `true` if anything was removed.
    pub fn invalidate(&self, url: &str) -> bool {
        let mut generation = self.generation.lock();
        *generation += 1;
        let node = self.nodes.remove(url).is_some();
        let entry = self.entries.remove(url).is_some();
        node || entry
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Linked modules for every tenant.
#[derive(Debug, Default)]
pub struct TenantModuleCache {
    tenants: DashMap<TenantId, Arc<TenantModules>>,
}

impl TenantModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or lazily create) a tenant's state.
    pub fn tenant(&self, tenant: &TenantId) -> Arc<TenantModules> {
        Arc::clone(self.tenants.entry(tenant.clone()).or_default().value())
    }

    /// Drop `url` from one tenant's cache.
    pub fn invalidate(&self, tenant: &TenantId, url: &str) -> bool {
        self.tenants
            .get(tenant)
            .is_some_and(|modules| modules.invalidate(url))
    }

    /// Returns `true` if `tenant` has a cached entry for `url`.
    pub fn contains(&self, tenant: &TenantId, url: &str) -> bool {
        self.tenants
            .get(tenant)
            .is_some_and(|modules| modules.entries.contains_key(url))
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}
