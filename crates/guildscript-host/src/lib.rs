//! Host side of guildscript.
//!
//! This crate connects the core engine to the outside world:
//!
//! - [`linker`]: The `context`/`global` bindings scripts can import
//! - [`logging`]: Guest log capture
//! - [`permissions`]: The URL policy applied before every fetch
//! - [`fetcher`]: Script retrieval over HTTP
//! - [`content_store`]: Fetched sources persisted by URL digest
//! - [`repository`]: The [`ScriptLoader`](guildscript_core::ScriptLoader)
//!   combining the two
//!
//! # Security Model
//!
//! Scripts get no ambient capabilities. Their only bindings are their
//! tenant's identity, the invocation's settings snapshot and a log sink.
//! Fetching is governed by the operator's [`UrlPolicy`]:
//!
//! 1. **Schemes**: Only `http` and `https`
//! 2. **Hosts**: Optional allowlist with wildcard subdomains
//! 3. **SSRF Protection**: Private/internal network addresses are blocked

pub mod content_store;
pub mod fetcher;
pub mod linker;
pub mod logging;
pub mod permissions;
pub mod repository;

pub use content_store::ContentStore;
pub use fetcher::Fetcher;
pub use linker::{create_instance_runner, register_all};
pub use logging::LoggingHost;
pub use permissions::UrlPolicy;
pub use repository::SourceRepository;
