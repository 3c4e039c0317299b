//! Per-request dispatch with bounded retry.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → buffer body (bounded) so it can be replayed
//!     → loop, at most once per backend:
//!         pool.select(tried)
//!         → pre-flight probe
//!             dead  → set_dead(true), try next
//!             alive → set_dead(false), forward
//!                 transport error → set_dead(true), try next
//!                 response        → return it
//!     → every backend tried → 503
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header, request::Parts};
use axum::response::IntoResponse;
use http_body_util::LengthLimitError;
use thiserror::Error;
use url::Url;

use crate::config::DispatchConfig;
use crate::health::probe::Prober;
use crate::http::transport::Transport;
use crate::load_balancer::{BackendPool, LoadBalancerError};
use crate::observability::metrics;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Why a request could not be served.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("service unavailable: {0}")]
    Unavailable(#[from] LoadBalancerError),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::Body(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Routes requests to backends from a shared pool.
pub struct Dispatcher<T, P> {
    pool: Arc<BackendPool>,
    transport: T,
    prober: P,
    config: DispatchConfig,
}

impl<T: Transport, P: Prober> Dispatcher<T, P> {
    pub fn new(pool: Arc<BackendPool>, transport: T, prober: P, config: DispatchConfig) -> Self {
        Self {
            pool,
            transport,
            prober,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Serve one inbound request.
    pub async fn dispatch(&self, request: Request<Body>) -> Result<Response<Body>, DispatchError> {
        let start = Instant::now();
        let method = request.method().to_string();

        match self.forward_with_retry(request).await {
            Ok((response, backend)) => {
                metrics::record_request(&method, response.status().as_u16(), backend.as_str(), start);
                Ok(response)
            }
            Err(e) => {
                metrics::record_request(&method, e.status().as_u16(), "none", start);
                Err(e)
            }
        }
    }

    async fn forward_with_retry(&self, request: Request<Body>) -> Result<(Response<Body>, Url), DispatchError> {
        let (parts, body) = request.into_parts();
        let limit = self.config.max_body_bytes;
        if content_length(&parts.headers).is_some_and(|len| len > limit) {
            return Err(DispatchError::BodyTooLarge(limit));
        }
        let body = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| body_error(e, limit))?;

        let max_attempts = self.pool.len();
        if max_attempts == 0 {
            return Err(LoadBalancerError::EmptyPool.into());
        }

        let preflight_timeout = Duration::from_millis(self.config.preflight_timeout_ms);
        let mut tried = HashSet::with_capacity(max_attempts);

        for attempt in 1..=max_attempts {
            let backend = match self.pool.select(&tried) {
                Ok(backend) => backend,
                Err(LoadBalancerError::AllBackendsDead) => break,
                Err(e) => return Err(e.into()),
            };
            let url = backend.url().clone();
            tried.insert(url.clone());

            if self.config.preflight {
                if let Err(e) = self.prober.probe(&url, preflight_timeout).await {
                    tracing::warn!(backend = %url, attempt, error = %e, "Backend dead, retrying");
                    self.record_liveness(&url, false);
                    metrics::record_retry("preflight");
                    continue;
                }
            }
            self.record_liveness(&url, true);

            tracing::debug!(backend = %url, attempt, "Forwarding request");
            match self.transport.forward(&url, replay(&parts, &body)).await {
                Ok(response) => return Ok((response, url)),
                Err(e) => {
                    tracing::warn!(backend = %url, attempt, error = %e, "Cannot establish request, retrying");
                    self.record_liveness(&url, false);
                    metrics::record_retry("transport");
                }
            }
        }

        tracing::error!(attempts = tried.len(), "All backends failed");
        metrics::record_exhausted();
        Err(LoadBalancerError::AllBackendsDead.into())
    }

    fn record_liveness(&self, url: &Url, alive: bool) {
        // A reload may have removed the backend mid-request.
        if let Err(e) = self.pool.set_dead(url, !alive) {
            tracing::debug!(backend = %url, error = %e, "Skipping liveness update");
            return;
        }
        metrics::record_backend_health(url.as_str(), alive);
    }
}

/// Append the client address to `X-Forwarded-For`, folding repeated fields into one.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let mut value = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    if !value.is_empty() {
        value.push_str(", ");
    }
    value.push_str(&client.to_string());

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// A body without `Content-Length` only reveals its size while being read.
fn body_error(error: axum::Error, limit: usize) -> DispatchError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return DispatchError::BodyTooLarge(limit);
        }
        source = std::error::Error::source(e);
    }
    DispatchError::Body(error)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Rebuild the request for one attempt from the buffered parts.
fn replay(parts: &Parts, body: &Bytes) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.headers_mut() = parts.headers.clone();
    request
}
