//! Outbound fetch policy.
//!
//! This module provides the [`FetchPolicy`] struct, which decides whether a
//! tile URL issued by the module may be fetched and whether a response may be
//! handed back to it.

use std::collections::HashSet;

use tile_bridge_common::{FetchConfig, HostFunctionError};

/// Checks applied to every tile fetch.
///
/// The default policy mirrors what a browser page would do: any http or https
/// host is reachable, any status is forwarded, and only the body size is
/// bounded.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Allowed hosts (domain patterns). Empty allows every host.
    ///
    /// Patterns can be:
    /// - Exact match: `tile.openstreetmap.org`
    /// - Wildcard subdomain: `*.openstreetmap.org` (matches `a.tile.openstreetmap.org`)
    /// - All hosts: `*`
    pub allowed_hosts: HashSet<String>,

    /// Refuse loopback, private and link-local targets.
    pub block_private_addresses: bool,

    /// Maximum response body size in bytes.
    pub max_body_bytes: usize,

    /// Treat non-2xx responses as failures instead of forwarding their body.
    pub require_success_status: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl FetchPolicy {
    /// Build a policy from the fetch configuration.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            allowed_hosts: config.allowed_hosts.iter().cloned().collect(),
            block_private_addresses: config.block_private_addresses,
            max_body_bytes: config.max_body_bytes,
            require_success_status: config.require_success_status,
        }
    }

    /// Create a builder starting from the permissive defaults.
    pub fn builder() -> FetchPolicyBuilder {
        FetchPolicyBuilder::default()
    }

    /// Check that `url` may be fetched.
    ///
    /// This performs:
    /// 1. Parse the URL and require an http or https scheme
    /// 2. Match the host against allowed patterns
    /// 3. Block private/internal addresses when configured
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::InvalidArgument`] for an unusable URL and
    /// [`HostFunctionError::PermissionDenied`] when the policy refuses it.
    pub fn check_url(&self, url: &str) -> Result<(), HostFunctionError> {
        let parsed = url::Url::parse(url).map_err(|e| HostFunctionError::InvalidArgument {
            reason: format!("invalid tile URL '{url}': {e}"),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HostFunctionError::InvalidArgument {
                reason: format!("unsupported scheme '{}' in '{url}'", parsed.scheme()),
            });
        }

        if !self.is_host_allowed(&parsed) {
            return Err(HostFunctionError::PermissionDenied {
                resource: format!("host of {url}"),
            });
        }

        if self.block_private_addresses && Self::is_private_address(url) {
            return Err(HostFunctionError::PermissionDenied {
                resource: format!("private address {url}"),
            });
        }

        Ok(())
    }

    /// Check a response status.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::HttpStatus`] for a non-2xx status when
    /// success is required.
    pub fn check_status(&self, url: &str, status: u16) -> Result<(), HostFunctionError> {
        if self.require_success_status && !(200..300).contains(&status) {
            return Err(HostFunctionError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(())
    }

    /// Check a response body size.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::BodyTooLarge`] past the configured limit.
    pub fn check_body(&self, url: &str, size: usize) -> Result<(), HostFunctionError> {
        if size > self.max_body_bytes {
            return Err(HostFunctionError::BodyTooLarge {
                url: url.to_string(),
                size,
                limit: self.max_body_bytes,
            });
        }
        Ok(())
    }

    fn is_host_allowed(&self, url: &url::Url) -> bool {
        if self.allowed_hosts.is_empty() || self.allowed_hosts.contains("*") {
            return true;
        }

        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return false;
        };

        self.allowed_hosts
            .iter()
            .any(|pattern| Self::matches_pattern(pattern, &host))
    }

    /// Check if a host matches an allow pattern.
    fn matches_pattern(pattern: &str, host: &str) -> bool {
        let pattern = pattern.to_lowercase();

        if let Some(domain) = pattern.strip_prefix("*.") {
            host.ends_with(&pattern[1..]) || host == domain
        } else {
            pattern == host
        }
    }

    /// Check if the given URL targets a private/internal address.
    ///
    /// Covers localhost, loopback, the private IPv4 ranges, link-local
    /// addresses and the cloud metadata endpoints.
    pub fn is_private_address(url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };

        match parsed.host() {
            Some(url::Host::Domain(domain)) => {
                let domain = domain.to_lowercase();
                domain == "localhost" || domain == "metadata.google.internal"
            }
            Some(url::Host::Ipv4(v4)) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
            }
            Some(url::Host::Ipv6(v6)) => v6.is_loopback() || v6.is_unspecified(),
            None => false,
        }
    }
}

/// Builder for [`FetchPolicy`].
#[derive(Debug, Default)]
pub struct FetchPolicyBuilder {
    inner: FetchPolicy,
}

impl FetchPolicyBuilder {
    /// Restrict fetches to the given host patterns.
    #[must_use]
    pub fn allow_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Refuse private and loopback targets.
    #[must_use]
    pub fn block_private_addresses(mut self, block: bool) -> Self {
        self.inner.block_private_addresses = block;
        self
    }

    /// Set the maximum body size.
    #[must_use]
    pub fn max_body_bytes(mut self, max: usize) -> Self {
        self.inner.max_body_bytes = max;
        self
    }

    /// Treat non-2xx responses as failures.
    #[must_use]
    pub fn require_success_status(mut self, require: bool) -> Self {
        self.inner.require_success_status = require;
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> FetchPolicy {
        self.inner
    }
}
