//! Tile fetching.
//!
//! This module provides the [`TileFetcher`] seam the callback adapter fetches
//! through, and [`HttpTileFetcher`], its reqwest implementation with the
//! [`FetchPolicy`] checks applied.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::FetchPolicy;
use tile_bridge_common::{FetchConfig, HostFunctionError, RuntimeError};

/// Retrieves tile payloads by URL.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the full response body for `url`.
    ///
    /// # Errors
    ///
    /// Any error means the tile is silently abandoned by the caller.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, HostFunctionError>;
}

/// HTTP tile fetcher.
///
/// This struct performs tile requests for the module, providing:
/// - Host allow-list and private address checks
/// - Status and body size enforcement
/// - Request timeout enforcement
pub struct HttpTileFetcher {
    /// HTTP client (shared, connection pooled).
    client: Client,

    /// Checks applied to every request.
    policy: FetchPolicy,

    /// Number of requests sent.
    request_count: AtomicU64,
}

impl HttpTileFetcher {
    /// Create a fetcher from the fetch configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(10)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                RuntimeError::invalid_config(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self::with_client(client, FetchPolicy::from_config(config)))
    }

    /// Create with a custom HTTP client.
    pub fn with_client(client: Client, policy: FetchPolicy) -> Self {
        Self {
            client,
            policy,
            request_count: AtomicU64::new(0),
        }
    }

    /// Policy in effect.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Get the number of requests sent.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, HostFunctionError> {
        if let Err(e) = self.policy.check_url(url) {
            warn!(url, error = %e, "Tile request blocked");
            return Err(e);
        }

        self.request_count.fetch_add(1, Ordering::SeqCst);
        debug!(url, "Fetching tile");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HostFunctionError::FetchFailed {
                url: url.to_string(),
                reason: describe(&e),
            })?;

        let status = response.status().as_u16();
        self.policy.check_status(url, status)?;

        if let Some(length) = response.content_length() {
            self.policy
                .check_body(url, usize::try_from(length).unwrap_or(usize::MAX))?;
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| HostFunctionError::FetchFailed {
                url: url.to_string(),
                reason: describe(&e),
            })?;
        self.policy.check_body(url, body.len())?;

        info!(
            url,
            status = status,
            body_size = body.len(),
            "Tile fetched"
        );

        Ok(body.to_vec())
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}
