//! Transport-level reachability probe.
//!
//! A backend counts as reachable when a TCP connection to its `host:port` can be
//! opened within the timeout. The connection is closed immediately.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;
use url::Url;

use crate::load_balancer::backend::authority;

/// Why a probe considered the backend unreachable.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("probe to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Checks whether a backend is reachable.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// Opens and closes a TCP connection to the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    async fn probe(&self, url: &Url, timeout: Duration) -> Result<(), ProbeError> {
        let addr = authority(url);
        match time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(source)) => Err(ProbeError::Connect { addr, source }),
            Err(_) => Err(ProbeError::Timeout { addr, timeout }),
        }
    }
}
