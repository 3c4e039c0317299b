//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, timeout, in-flight cap)
//! - Start the liveness monitor and the config reload task
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::{LivenessMonitor, TcpProber};
use crate::http::dispatch::{Dispatcher, append_forwarded_for};
use crate::http::transport::HyperTransport;
use crate::load_balancer::{Backend, BackendPool, LoadBalancerResult};

pub type ProxyDispatcher = Dispatcher<HyperTransport, TcpProber>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ProxyDispatcher>,
    pub in_flight: Arc<Semaphore>,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    pool: Arc<BackendPool>,
}

impl HttpServer {
    /// Build the pool from `config` and wire the router around it.
    pub fn new(config: ProxyConfig) -> LoadBalancerResult<Self> {
        let pool = Arc::new(BackendPool::from_config(config.strategy, &config.backends)?);
        let transport = HyperTransport::new(Duration::from_secs(config.timeouts.connect_secs));
        let dispatcher = Dispatcher::new(pool.clone(), transport, TcpProber, config.dispatch.clone());

        let state = AppState {
            dispatcher: Arc::new(dispatcher),
            in_flight: Arc::new(Semaphore::new(config.listener.max_connections)),
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            pool,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server on `listener` until `shutdown` fires.
    ///
    /// Validated configs arriving on `config_updates` replace the pool's backend list.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.pool.len(),
            strategy = self.pool.strategy().name(),
            "HTTP server starting"
        );

        let monitor = LivenessMonitor::new(self.pool.clone(), self.config.health_check.clone())
            .spawn(shutdown.resubscribe());
        let reload = tokio::spawn(apply_config_updates(self.pool.clone(), config_updates));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await;

        reload.abort();
        monitor.abort();

        result?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Catch-all handler: every path and method is dispatched to a backend.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let Ok(_permit) = state.in_flight.clone().try_acquire_owned() else {
        tracing::warn!("In-flight request limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many requests in flight").into_response();
    };

    if let Some(ConnectInfo(client)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied() {
        append_forwarded_for(request.headers_mut(), client.ip());
    }

    match state.dispatcher.dispatch(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Dispatch failed");
            e.into_response()
        }
    }
}

async fn apply_config_updates(pool: Arc<BackendPool>, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
    while let Some(config) = updates.recv().await {
        match apply_config(&pool, &config) {
            Ok(()) => tracing::info!(backends = pool.len(), "Backend list reloaded"),
            Err(e) => tracing::error!(error = %e, "Rejected reloaded backend list, keeping current one"),
        }
    }
}

/// Replace the pool's backends with those of `config`.
///
/// The scheduling strategy is fixed at startup; a different one in `config` is ignored.
pub fn apply_config(pool: &BackendPool, config: &ProxyConfig) -> LoadBalancerResult<()> {
    if config.strategy != pool.strategy() {
        tracing::warn!(
            current = pool.strategy().name(),
            requested = config.strategy.name(),
            "Strategy changes require a restart"
        );
    }

    let backends = config
        .backends
        .iter()
        .map(Backend::from_config)
        .collect::<LoadBalancerResult<Vec<_>>>()?;
    pool.update(backends)
}
