//! Persistent store of fetched script sources.
//!
//! Each source is kept as two artifacts named after the digest of its URL:
//!
//! ```text
//! <dir>/<digest>.src        raw payload
//! <dir>/<digest>.meta.json  {"issuer", "url", "fetchedAt", "size"}
//! ```
//!
//! The payload is written first. A source only counts as stored once its
//! metadata exists, so a reader never sees metadata for a missing payload.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use guildscript_common::{ScriptError, ScriptSource, SourceMetadata, url_digest};

/// Directory-backed content store.
///
/// Safe for concurrent readers. Concurrent writers to the same URL are
/// last-write-wins.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Store`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ScriptError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ScriptError::store(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `true` if a committed source exists for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Store`] if the store cannot tell whether the
    /// metadata exists.
    pub async fn exists(&self, url: &str) -> Result<bool, ScriptError> {
        let meta_path = self.metadata_path(url);
        tokio::fs::try_exists(&meta_path)
            .await
            .map_err(|e| ScriptError::store(meta_path.display().to_string(), e))
    }

    /// Read the committed source for `url`.
    ///
    /// # Errors
    ///
    /// - [`ScriptError::NotFound`] if no metadata exists
    /// - [`ScriptError::Store`] if an artifact cannot be read
    /// - [`ScriptError::Metadata`] if the metadata is corrupt
    #[instrument(skip(self))]
    pub async fn get(&self, url: &str) -> Result<ScriptSource, ScriptError> {
        let meta_path = self.metadata_path(url);
        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ScriptError::NotFound {
                    url: url.to_string(),
                });
            }
            Err(e) => return Err(ScriptError::store(meta_path.display().to_string(), e)),
        };
        let metadata: SourceMetadata = serde_json::from_slice(&raw)?;

        let payload_path = self.payload_path(url);
        let bytes = tokio::fs::read(&payload_path)
            .await
            .map_err(|e| ScriptError::store(payload_path.display().to_string(), e))?;

        debug!(size = bytes.len(), "Source read from store");
        Ok(ScriptSource::from_parts(metadata, bytes))
    }

    /// Persist `source`, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Store`] if either artifact cannot be written.
    /// A failed payload write leaves the metadata untouched.
    #[instrument(skip(self, source), fields(url = %source.url(), size = source.size()))]
    pub async fn put(&self, source: &ScriptSource) -> Result<(), ScriptError> {
        let payload_path = self.payload_path(source.url());
        tokio::fs::write(&payload_path, source.bytes())
            .await
            .map_err(|e| ScriptError::store(payload_path.display().to_string(), e))?;

        let metadata = serde_json::to_vec_pretty(&source.metadata())?;
        let meta_path = self.metadata_path(source.url());
        tokio::fs::write(&meta_path, metadata)
            .await
            .map_err(|e| ScriptError::store(meta_path.display().to_string(), e))?;

        debug!(digest = %source.digest(), "Source committed");
        Ok(())
    }

    fn payload_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.src", url_digest(url)))
    }

    fn metadata_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", url_digest(url)))
    }
}
