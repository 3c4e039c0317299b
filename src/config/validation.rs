//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend URLs, weights and uniqueness
//! - Validate value ranges (intervals and timeouts > 0, bind address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("backend url '{0}' is not a valid http url")]
    InvalidBackendUrl(String),

    #[error("backend {0} has weight 0, weights must be positive")]
    ZeroWeight(String),

    #[error("backend {0} is listed more than once")]
    DuplicateBackend(String),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("listener.max_connections must be greater than zero")]
    ZeroConnectionLimit,
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        match Url::parse(&backend.url) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {
                if !seen.insert(url) {
                    errors.push(ValidationError::DuplicateBackend(backend.url.clone()));
                }
            }
            _ => errors.push(ValidationError::InvalidBackendUrl(backend.url.clone())),
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight(backend.url.clone()));
        }
    }

    let bind = config.listener.bind_address();
    if bind.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(bind));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnectionLimit);
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health_check.interval_secs"));
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::ZeroDuration("health_check.timeout_secs"));
        }
    }
    if config.dispatch.preflight && config.dispatch.preflight_timeout_ms == 0 {
        errors.push(ValidationError::ZeroDuration("dispatch.preflight_timeout_ms"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroDuration("timeouts.connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroDuration("timeouts.request_secs"));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
