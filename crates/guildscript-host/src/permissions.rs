//! URL policy for script fetching.
//!
//! This module provides the [`UrlPolicy`] struct, which decides which hosts
//! the fetcher may contact before any request is sent.

use url::{Host, Url};

use guildscript_common::{FetchConfig, ScriptError, parse_script_url};

/// Which URLs scripts may be fetched from.
///
/// Checks run in this order:
/// 1. The scheme must be `http` or `https` ([`ScriptError::Protocol`])
/// 2. The host must match an allowed pattern ([`ScriptError::Forbidden`])
/// 3. Private and loopback addresses are refused unless allowed
///    ([`ScriptError::Forbidden`])
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Host patterns.
    ///
    /// Patterns can be:
    /// - Exact match: `scripts.example.com`
    /// - Wildcard subdomain: `*.example.com` (matches `cdn.example.com` and `example.com`)
    /// - All hosts: `*`
    allowed_hosts: Vec<String>,

    block_private_addresses: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl UrlPolicy {
    /// Build the policy described by the fetch configuration.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            allowed_hosts: config
                .allowed_hosts
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            block_private_addresses: config.block_private_addresses,
        }
    }

    /// A policy accepting any `http(s)` URL, private addresses included.
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: vec!["*".to_string()],
            block_private_addresses: false,
        }
    }

    /// Check a raw URL and return it parsed.
    ///
    /// # Errors
    ///
    /// [`ScriptError::Protocol`] for malformed URLs or disallowed schemes,
    /// [`ScriptError::Forbidden`] for refused hosts.
    pub fn check_str(&self, raw: &str) -> Result<Url, ScriptError> {
        let url = parse_script_url(raw)?;
        self.check(&url)?;
        Ok(url)
    }

    /// Check an already parsed URL.
    ///
    /// # Errors
    ///
    /// See [`UrlPolicy::check_str`].
    pub fn check(&self, url: &Url) -> Result<(), ScriptError> {
        // Re-validates the scheme for URLs built elsewhere
        parse_script_url(url.as_str())?;

        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return Err(ScriptError::forbidden(url.as_str(), "URL has no host"));
        };

        if !self.is_host_allowed(&host) {
            return Err(ScriptError::forbidden(
                url.as_str(),
                format!("host '{host}' is not in the allowed hosts"),
            ));
        }

        if self.block_private_addresses && is_private_address(url) {
            return Err(ScriptError::forbidden(
                url.as_str(),
                format!("host '{host}' is a private address"),
            ));
        }

        Ok(())
    }

    fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|pattern| pattern == "*" || matches_pattern(pattern, host))
    }
}

/// Check if a host matches a permission pattern.
fn matches_pattern(pattern: &str, host: &str) -> bool {
    if let Some(domain) = pattern.strip_prefix("*.") {
        host == domain || host.ends_with(&pattern[1..])
    } else {
        pattern == host
    }
}

/// Check if the URL's host is a private/internal address.
///
/// This covers:
/// - localhost and 127.0.0.0/8
/// - Private IP ranges (10.x.x.x, 172.16-31.x.x, 192.168.x.x)
/// - Link-local addresses (169.254.x.x)
/// - Cloud metadata endpoints (169.254.169.254)
pub fn is_private_address(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain == "metadata.google.internal"
        }
        Some(Host::Ipv4(v4)) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
        }
        Some(Host::Ipv6(v6)) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_private() || v4.is_loopback())
        }
        None => false,
    }
}
