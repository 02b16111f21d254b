//! Error types for guildscript.
//!
//! This module defines the error hierarchy using `thiserror`:
//! - [`ScriptError`]: Every failure the script engine can surface, from URL
//!   rejection through linking to execution
//! - [`ErrorKind`]: Coarse classification used by dispatchers to pick a reply
//!
//! The engine never recovers from these silently. Callers decide how much of
//! each error to show, see [`ScriptError::kind`].

use std::io;

use thiserror::Error;

/// Top-level script engine errors.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The URL is not an absolute `http`/`https` address.
    ///
    /// Raised before any network attempt and never retried.
    #[error("Protocol error for '{url}': {reason}")]
    Protocol {
        /// The rejected URL as given.
        url: String,
        /// Why the URL was rejected.
        reason: String,
    },

    /// The URL policy refused to fetch from this host.
    #[error("Fetch forbidden for '{url}': {reason}")]
    Forbidden {
        /// The refused URL.
        url: String,
        /// Which policy rule refused it.
        reason: String,
    },

    /// Transport failure or non-success status while fetching.
    #[error("Network error fetching '{url}': {reason}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// HTTP status code, if a response was received.
        status: Option<u16>,
        /// Description of the failure.
        reason: String,
    },

    /// The fetched source is not a valid module, or its bindings do not link.
    #[error("Compile error in '{url}': {reason}")]
    Compile {
        /// The module that failed to compile or link.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// The import graph re-entered a module that was still linking.
    #[error("Cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency {
        /// The import path, starting and ending at the re-entered module.
        chain: Vec<String>,
    },

    /// The entry point raised during execution.
    #[error("Script raised: {message}")]
    Runtime {
        /// Short description (usually the trap message).
        message: String,
        /// Full diagnostic including the guest backtrace, if available.
        detail: Option<String>,
    },

    /// Execution exceeded its wall-clock deadline.
    #[error("Execution timed out after {elapsed_ms}ms (deadline {deadline_ms}ms)")]
    TimedOut {
        /// The configured deadline in milliseconds.
        deadline_ms: u64,
        /// Time actually spent before the abort took effect.
        elapsed_ms: u64,
    },

    /// No committed source exists in the content store for this URL.
    #[error("No cached source for '{url}'")]
    NotFound {
        /// The URL that was looked up.
        url: String,
    },

    /// Content store I/O failed.
    #[error("Content store error at '{path}': {source}")]
    Store {
        /// The artifact path involved.
        path: String,
        #[source]
        source: io::Error,
    },

    /// Metadata could not be serialized or parsed.
    #[error("Invalid source metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Coarse classification of a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Protocol,
    Forbidden,
    Network,
    Compile,
    CyclicDependency,
    Runtime,
    TimedOut,
    Storage,
    Config,
}

impl ErrorKind {
    /// Stable snake-case name, used in API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Forbidden => "forbidden",
            Self::Network => "network",
            Self::Compile => "compile",
            Self::CyclicDependency => "cyclic_dependency",
            Self::Runtime => "runtime",
            Self::TimedOut => "timed_out",
            Self::Storage => "storage",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScriptError {
    /// Create a new `Protocol` error.
    pub fn protocol(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Forbidden` error.
    pub fn forbidden(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Forbidden {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Network` error without a status code.
    pub fn network(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            status: None,
            reason: reason.into(),
        }
    }

    /// Create a new `Network` error for a non-success HTTP status.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::Network {
            url: url.into(),
            status: Some(status),
            reason: format!("server responded with status {status}"),
        }
    }

    /// Create a new `Compile` error.
    pub fn compile(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Runtime` error.
    pub fn runtime(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            detail,
        }
    }

    /// Create a new `Store` error.
    pub fn store(path: impl Into<String>, source: io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Network { .. } => ErrorKind::Network,
            Self::Compile { .. } => ErrorKind::Compile,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::Runtime { .. } => ErrorKind::Runtime,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::NotFound { .. } | Self::Store { .. } | Self::Metadata(_) => ErrorKind::Storage,
            Self::InvalidConfig { .. } => ErrorKind::Config,
        }
    }

    /// Returns `true` if the script exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns `true` if this error happened while building a module graph
    /// (before any guest code ran).
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Protocol
                | ErrorKind::Forbidden
                | ErrorKind::Network
                | ErrorKind::Compile
                | ErrorKind::CyclicDependency
                | ErrorKind::Storage
        )
    }

    /// Full diagnostic text for privileged viewers.
    ///
    /// Identical to `Display` except for runtime errors, which append the
    /// guest backtrace when one was captured.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Runtime {
                message,
                detail: Some(detail),
            } => format!("Script raised: {message}\n{detail}"),
            other => other.to_string(),
        }
    }
}
