//! Script fetching over HTTP.
//!
//! This module provides [`Fetcher`], which retrieves script payloads with
//! security controls applied before any connection is made.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use reqwest::redirect;
use tracing::{debug, info, warn};
use url::Url;

use crate::permissions::UrlPolicy;
use guildscript_common::{FetchConfig, ScriptError};

/// HTTP script fetcher.
///
/// This struct fetches script sources, providing:
/// - URL policy checks (scheme, allowed hosts, SSRF protection)
/// - A payload size cap
/// - Request and connect timeouts
/// - A fetch counter for observability and tests
pub struct Fetcher {
    /// HTTP client (shared, connection pooled).
    client: Client,

    policy: UrlPolicy,

    max_body_bytes: usize,

    /// Number of requests actually sent.
    fetch_count: AtomicU64,
}

impl Fetcher {
    /// Create a fetcher from the fetch configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::InvalidConfig`] if the HTTP client cannot be
    /// built.
    pub fn new(config: &FetchConfig) -> Result<Self, ScriptError> {
        Self::with_policy(config, UrlPolicy::from_config(config))
    }

    /// Create a fetcher that enforces `policy` instead of the configured one.
    ///
    /// Redirects are followed only while every hop passes the policy.
    ///
    /// # Errors
    ///
    /// See [`Fetcher::new`].
    pub fn with_policy(config: &FetchConfig, policy: UrlPolicy) -> Result<Self, ScriptError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(10)
            .user_agent(config.user_agent.clone())
            .redirect(redirect_policy(policy.clone()))
            .build()
            .map_err(|e| ScriptError::invalid_config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, policy, config.max_body_bytes))
    }

    /// Create with a custom HTTP client and policy.
    ///
    /// The client's redirect handling is used as is; build it with
    /// [`redirect_policy`] to keep redirects inside `policy`.
    pub fn with_client(client: Client, policy: UrlPolicy, max_body_bytes: usize) -> Self {
        Self {
            client,
            policy,
            max_body_bytes,
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Fetch the payload at `url`.
    ///
    /// # Security
    ///
    /// The URL policy is checked before the request is sent, so a refused
    /// URL never touches the network. Redirect targets are checked by the
    /// client's redirect policy before they are followed.
    ///
    /// # Errors
    ///
    /// - [`ScriptError::Protocol`]/[`ScriptError::Forbidden`] from the policy
    /// - [`ScriptError::Network`] on transport failure, non-success status,
    ///   or a body larger than the cap
    pub async fn fetch(&self, url: &Url, requester: &str) -> Result<Vec<u8>, ScriptError> {
        if let Err(err) = self.policy.check(url) {
            warn!(url = %url, requester, error = %err, "Fetch refused by URL policy");
            return Err(err);
        }

        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        debug!(url = %url, requester, "Fetching script");

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| match refused_redirect(&e) {
                Some(refused) => {
                    warn!(url = %url, requester, error = %refused, "Redirect refused by URL policy");
                    refused
                }
                None => ScriptError::network(url.as_str(), describe(&e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Fetch failed");
            return Err(ScriptError::http_status(url.as_str(), status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if usize::try_from(length).map_or(true, |len| len > self.max_body_bytes) {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ScriptError::network(url.as_str(), describe(&e)))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        info!(
            url = %url,
            status = status.as_u16(),
            body_size = body.len(),
            "Script fetched"
        );

        Ok(body)
    }

    /// Get the number of requests sent.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    fn too_large(&self, url: &Url) -> ScriptError {
        ScriptError::network(
            url.as_str(),
            format!("payload exceeds {} bytes", self.max_body_bytes),
        )
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("fetch_count", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

/// Maximum redirect hops followed for one fetch.
const MAX_REDIRECTS: usize = 10;

/// Redirect policy that checks every hop against `policy`.
pub fn redirect_policy(policy: UrlPolicy) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match policy.check(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(err) => attempt.error(err),
        }
    })
}

/// The policy error behind a refused redirect, if any.
fn refused_redirect(err: &reqwest::Error) -> Option<ScriptError> {
    if !err.is_redirect() {
        return None;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        match inner.downcast_ref::<ScriptError>() {
            Some(ScriptError::Forbidden { url, reason } | ScriptError::Protocol { url, reason }) => {
                return Some(ScriptError::forbidden(
                    url.clone(),
                    format!("redirect refused: {reason}"),
                ));
            }
            Some(_) | None => source = inner.source(),
        }
    }
    None
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out ({err})")
    } else if err.is_connect() {
        format!("connection failed ({err})")
    } else {
        err.to_string()
    }
}
