//! Script loading backed by the content store and fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use crate::content_store::ContentStore;
use crate::fetcher::Fetcher;
use guildscript_common::{ScriptError, ScriptSource};
use guildscript_core::ScriptLoader;

/// Serves sources from the content store, fetching on first use.
#[derive(Debug)]
pub struct SourceRepository {
    store: ContentStore,
    fetcher: Fetcher,
}

impl SourceRepository {
    pub fn new(store: ContentStore, fetcher: Fetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    async fn fetch_and_commit(&self, url: &Url, issuer: &str) -> Result<ScriptSource, ScriptError> {
        let bytes = self.fetcher.fetch(url, issuer).await?;
        let source = ScriptSource::new(url.as_str(), bytes, issuer);
        self.store.put(&source).await?;
        Ok(source)
    }
}

#[async_trait]
impl ScriptLoader for SourceRepository {
    #[instrument(skip(self), fields(url = %url))]
    async fn load(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError> {
        // Scheme and host checks apply to cached URLs too
        self.fetcher.policy().check(url)?;

        if self.store.exists(url.as_str()).await? {
            debug!("Content store hit");
            return self.store.get(url.as_str()).await.map(Arc::new);
        }

        let source = self.fetch_and_commit(url, issuer).await?;
        info!(size = source.size(), "Script stored on first use");
        Ok(Arc::new(source))
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn refresh(&self, url: &Url, issuer: &str) -> Result<Arc<ScriptSource>, ScriptError> {
        let source = self.fetch_and_commit(url, issuer).await?;
        info!(size = source.size(), "Script refreshed");
        Ok(Arc::new(source))
    }
}
