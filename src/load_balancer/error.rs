//! Load balancer error types.

use thiserror::Error;

/// Errors raised by the backend pool and its schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadBalancerError {
    /// A backend was offered with a weight that is not a positive integer.
    #[error("invalid weight {weight} for backend {url}: weight must be positive")]
    InvalidWeight { url: String, weight: i64 },

    /// The backend URL is already present in the pool.
    #[error("backend {0} is already registered")]
    DuplicateBackend(String),

    /// The backend URL could not be parsed or has no usable host.
    #[error("invalid backend url '{0}'")]
    InvalidUrl(String),

    /// No backend with this URL exists in the pool.
    #[error("backend {0} not found")]
    BackendNotFound(String),

    /// Selection attempted on a pool with no entries.
    #[error("no backends available in pool")]
    EmptyPool,

    /// Weighted selection attempted while every weight is zero.
    #[error("all backend weights are zero")]
    AllWeightsZero,

    /// Every backend has been tried for this request and none could serve it.
    #[error("all backends are unavailable")]
    AllBackendsDead,
}

/// Result type for load balancer operations.
pub type LoadBalancerResult<T> = Result<T, LoadBalancerError>;
