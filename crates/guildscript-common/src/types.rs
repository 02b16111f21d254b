//! Domain types shared by every crate.
//!
//! - [`TenantId`]: Identity of a guild whose script state is isolated
//! - [`InvocationContext`]: What a dispatcher hands the engine per command
//! - [`ScriptSource`] and [`SourceMetadata`]: A fetched script and its
//!   persisted metadata record

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Identifier of an isolated command-group scope (one guild).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-command context supplied by the dispatcher.
///
/// The engine reads `tenant_id` and `settings` to build the sandbox, and
/// `issuer` to stamp fetch metadata. `command_args` are carried for the
/// dispatcher's benefit and never exposed to scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationContext {
    /// The guild the command was issued in.
    pub tenant_id: TenantId,

    /// Snapshot of the guild's settings at dispatch time.
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Identity of the user who issued the command.
    #[serde(default)]
    pub issuer: String,

    /// Whitespace-split command arguments.
    #[serde(default)]
    pub command_args: Vec<String>,
}

impl InvocationContext {
    /// Create a context with empty settings and no arguments.
    pub fn new(tenant_id: impl Into<TenantId>, issuer: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            settings: serde_json::Value::Object(serde_json::Map::new()),
            issuer: issuer.into(),
            command_args: Vec::new(),
        }
    }

    /// Replace the settings snapshot.
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the command arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Stable SHA-512 digest of a script URL, hex encoded.
///
/// This is the content store key. It hashes the URL, never the content, so
/// a changed script is only picked up through an explicit refresh.
pub fn url_digest(url: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Persisted metadata for one fetched script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Who triggered the fetch.
    pub issuer: String,
    /// The canonical fetch address.
    pub url: String,
    /// When the payload was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Payload size in bytes.
    pub size: usize,
}

/// An immutable fetched script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    url: String,
    digest: String,
    bytes: Vec<u8>,
    fetched_at: DateTime<Utc>,
    issuer: String,
}

impl ScriptSource {
    /// Record a payload fetched just now.
    pub fn new(url: impl Into<String>, bytes: Vec<u8>, issuer: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            digest: url_digest(&url),
            url,
            bytes,
            fetched_at: Utc::now(),
            issuer: issuer.into(),
        }
    }

    /// Rebuild a source from its persisted metadata and payload.
    pub fn from_parts(metadata: SourceMetadata, bytes: Vec<u8>) -> Self {
        Self {
            digest: url_digest(&metadata.url),
            url: metadata.url,
            bytes,
            fetched_at: metadata.fetched_at,
            issuer: metadata.issuer,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The payload as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// The metadata record persisted next to the payload.
    pub fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            issuer: self.issuer.clone(),
            url: self.url.clone(),
            fetched_at: self.fetched_at,
            size: self.size(),
        }
    }
}
