//! Backend abstraction.
//!
//! # Responsibilities
//! - Describe a single upstream server (URL, type tag, resource descriptor, weight)
//! - Carry the last known liveness flag
//!
//! Backends carry no lock of their own. The owning [`BackendPool`](super::pool::BackendPool)
//! guards every mutation, and callers only ever see cloned snapshots.

use url::Url;

use crate::config::BackendConfig;
use crate::load_balancer::error::{LoadBalancerError, LoadBalancerResult};

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    url: Url,
    kind: String,
    ram: String,
    weight: u32,
    is_dead: bool,
}

impl Backend {
    /// Create a new backend. Fails if the weight is zero or the URL has no host.
    pub fn new(url: Url, weight: u32) -> LoadBalancerResult<Self> {
        if weight == 0 {
            return Err(LoadBalancerError::InvalidWeight {
                url: url.to_string(),
                weight: 0,
            });
        }
        if url.host_str().is_none() || url.port_or_known_default().is_none() {
            return Err(LoadBalancerError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            url,
            kind: String::new(),
            ram: String::new(),
            weight,
            is_dead: false,
        })
    }

    /// Build a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> LoadBalancerResult<Self> {
        let url = Url::parse(&config.url)
            .map_err(|_| LoadBalancerError::InvalidUrl(config.url.clone()))?;
        Ok(Self::new(url, config.weight)?.with_descriptor(&config.kind, &config.ram))
    }

    /// Attach the informational type tag and resource descriptor.
    pub fn with_descriptor(mut self, kind: impl Into<String>, ram: impl Into<String>) -> Self {
        self.kind = kind.into();
        self.ram = ram.into();
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Type tag from configuration (e.g. "api", "static").
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Resource descriptor from configuration (e.g. "4GB").
    pub fn ram(&self) -> &str {
        &self.ram
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Last recorded liveness flag.
    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    /// `host:port` pair used for transport-level probes.
    pub fn authority(&self) -> String {
        authority(&self.url)
    }

    pub(crate) fn set_dead(&mut self, dead: bool) {
        self.is_dead = dead;
    }
}

/// Format the `host:port` of a URL, falling back to the scheme's default port.
pub fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
