//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the selected backend
//! - Strip hop-by-hop headers in both directions
//! - Report connection-level failures as `TransportError`
//!
//! HTTP error statuses from the backend are not transport failures and are returned as-is.

use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, Uri, header};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

use crate::load_balancer::backend::authority;

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HeaderName::from_static("keep-alive"),
];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] axum::BoxError),
}

/// Forwards one request to one backend.
pub trait Transport: Send + Sync + 'static {
    fn forward(
        &self,
        target: &Url,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, TransportError>> + Send;
}

/// Transport backed by the hyper-util pooled client.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Transport for HyperTransport {
    async fn forward(&self, target: &Url, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = upstream_uri(target, &parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);

        let response: Response<hyper::body::Incoming> = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| TransportError::Upstream(e.into()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Build the backend URI: the backend's path prefix joined with the request path,
/// and both query strings combined.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, axum::http::Error> {
    let base = target.path().trim_end_matches('/');
    let path = original.path();
    let mut path_and_query = if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };

    match (target.query(), original.query()) {
        (Some(a), Some(b)) => path_and_query.push_str(&format!("?{}&{}", a, b)),
        (Some(q), None) | (None, Some(q)) => path_and_query.push_str(&format!("?{}", q)),
        (None, None) => {}
    }

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority(target))
        .path_and_query(path_and_query)
        .build()
}

/// Remove the fixed hop-by-hop set plus every header the `Connection` field names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<header::HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| header::HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(&listed) {
        headers.remove(name);
    }
}
