//! Shared application state.
//!
//! This module provides [`AppState`], which holds the script linker and the
//! guild settings shared by every HTTP handler.

use std::sync::Arc;

use guildscript_common::{ConfigFile, InvocationContext, ScriptError};
use guildscript_core::{GraphLinker, Invocation, WasmEngine};
use guildscript_host::{ContentStore, Fetcher, SourceRepository, create_instance_runner};

use crate::settings::SettingsStore;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Per-tenant module graphs and the loader behind them.
    linker: Arc<GraphLinker>,

    /// Guild settings, loaded on first use.
    settings: Arc<SettingsStore>,
}

impl AppState {
    pub fn new(linker: GraphLinker, settings: SettingsStore) -> Self {
        Self {
            linker: Arc::new(linker),
            settings: Arc::new(settings),
        }
    }

    /// Build the full engine stack described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine, the content store directory or the
    /// HTTP client cannot be set up.
    pub async fn from_config(config: &ConfigFile) -> Result<Self, ScriptError> {
        let runtime = &config.runtime;

        let engine = WasmEngine::new(&runtime.engine)?;
        let runner = create_instance_runner(engine, &runtime.execution)?;

        let store = ContentStore::open(&runtime.cache.directory).await?;
        let fetcher = Fetcher::new(&runtime.fetch)?;
        let repository = SourceRepository::new(store, fetcher);

        let linker = GraphLinker::new(Arc::new(runner), Arc::new(repository));
        let settings = SettingsStore::new(
            config.guilds.settings_dir.clone(),
            config.guilds.default_prefix.clone(),
        );

        Ok(Self::new(linker, settings))
    }

    pub fn linker(&self) -> &GraphLinker {
        &self.linker
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Link (or reuse) the script at `url` and invoke it once.
    pub async fn run_script(
        &self,
        url: &str,
        context: &InvocationContext,
    ) -> Result<Invocation, ScriptError> {
        let handle = self.linker.get_module(url, context).await?;
        handle.invoke(context).await
    }

    /// Force a refresh of `url` for the context's tenant.
    pub async fn update_script(
        &self,
        url: &str,
        context: &InvocationContext,
    ) -> Result<String, ScriptError> {
        self.linker.update_script(url, context).await
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tenants", &self.linker.cache().tenant_count())
            .field("guilds_loaded", &self.settings.loaded())
            .finish_non_exhaustive()
    }
}
