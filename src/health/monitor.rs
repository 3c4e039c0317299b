//! Periodic liveness monitoring.
//!
//! # Responsibilities
//! - Periodically probe every backend in the pool
//! - Record the result through `BackendPool::set_dead`
//! - Stop when the shutdown signal fires

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::{Prober, TcpProber};
use crate::load_balancer::pool::BackendPool;
use crate::observability::metrics;

pub struct LivenessMonitor<P = TcpProber> {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
    prober: P,
}

impl LivenessMonitor {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig) -> Self {
        Self::with_prober(pool, config, TcpProber)
    }
}

impl<P: Prober> LivenessMonitor<P> {
    pub fn with_prober(pool: Arc<BackendPool>, config: HealthCheckConfig, prober: P) -> Self {
        Self {
            pool,
            config,
            prober,
        }
    }

    /// Run the monitor on a background task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Probe on every tick until shutdown. The first tick fires immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Liveness monitor disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            "Liveness monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A round in progress is abandoned on shutdown.
                    tokio::select! {
                        _ = self.check_all() => {}
                        _ = shutdown.recv() => {
                            tracing::info!("Liveness monitor received shutdown signal during a round, exiting loop");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Liveness monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once, concurrently, and record the outcome.
    ///
    /// A round takes at most one probe timeout regardless of pool size.
    pub async fn check_all(&self) {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let backends = self.pool.snapshot();
        let results = join_all(backends.iter().map(|b| self.prober.probe(b.url(), timeout))).await;

        for (backend, result) in backends.iter().zip(results) {
            let url = backend.url();
            let alive = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(backend = %url, error = %e, "Backend unreachable");
                    false
                }
            };

            // The backend may have been removed by a reload while we were probing.
            if let Err(e) = self.pool.set_dead(url, !alive) {
                tracing::debug!(backend = %url, error = %e, "Skipping liveness update");
                continue;
            }

            tracing::info!(
                backend = %url,
                status = if alive { "OK" } else { "DEAD" },
                kind = backend.kind(),
                ram = backend.ram(),
                "Health check"
            );
            metrics::record_backend_health(url.as_str(), alive);
        }
    }
}
