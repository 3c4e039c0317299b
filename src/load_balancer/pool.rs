//! Backend pool management.
//!
//! # Responsibilities
//! - Own the ordered backend list and the scheduler cursor
//! - Apply the configured load balancing algorithm to select backends
//! - Guard liveness flags for concurrent readers and writers
//!
//! Selection mutates the cursor and so takes the exclusive lock. Liveness reads take
//! the shared lock. `parking_lot::RwLock` is task-fair, so a steady stream of readers
//! cannot starve `set_dead` or `select`.

use std::collections::HashSet;

use parking_lot::RwLock;
use url::Url;

use crate::config::BackendConfig;
use crate::load_balancer::{
    Scheduler, Strategy,
    backend::Backend,
    error::{LoadBalancerError, LoadBalancerResult},
};

#[derive(Debug)]
struct PoolState {
    backends: Vec<Backend>,
    scheduler: Box<dyn Scheduler>,
}

impl PoolState {
    fn position(&self, url: &Url) -> Option<usize> {
        self.backends.iter().position(|b| b.url() == url)
    }
}

/// The set of backends a load balancer routes to.
#[derive(Debug)]
pub struct BackendPool {
    strategy: Strategy,
    state: RwLock<PoolState>,
}

impl BackendPool {
    /// Create an empty pool using the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            state: RwLock::new(PoolState {
                backends: Vec::new(),
                scheduler: strategy.build(),
            }),
        }
    }

    /// Create a pool from configuration entries.
    pub fn from_config(strategy: Strategy, configs: &[BackendConfig]) -> LoadBalancerResult<Self> {
        let pool = Self::new(strategy);
        let backends = configs
            .iter()
            .map(Backend::from_config)
            .collect::<LoadBalancerResult<Vec<_>>>()?;
        pool.update(backends)?;
        Ok(pool)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Append a backend with the given weight.
    pub fn add(&self, url: Url, weight: i64) -> LoadBalancerResult<()> {
        let weight = u32::try_from(weight)
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| LoadBalancerError::InvalidWeight {
                url: url.to_string(),
                weight,
            })?;
        self.insert(Backend::new(url, weight)?)
    }

    /// Append a fully described backend. The cursor is kept, cached weights are refreshed.
    pub fn insert(&self, backend: Backend) -> LoadBalancerResult<()> {
        let mut state = self.state.write();
        if state.position(backend.url()).is_some() {
            return Err(LoadBalancerError::DuplicateBackend(backend.url().to_string()));
        }

        state.backends.push(backend);
        let PoolState { backends, scheduler } = &mut *state;
        scheduler.rebuild(backends);
        Ok(())
    }

    /// Atomically replace the whole backend set and restart the cursor.
    ///
    /// The pool is left untouched if the new set contains duplicates.
    pub fn update(&self, backends: Vec<Backend>) -> LoadBalancerResult<()> {
        {
            let mut seen = HashSet::with_capacity(backends.len());
            for backend in &backends {
                if !seen.insert(backend.url()) {
                    return Err(LoadBalancerError::DuplicateBackend(backend.url().to_string()));
                }
            }
        }

        let mut state = self.state.write();
        state.backends = backends;
        let PoolState { backends, scheduler } = &mut *state;
        scheduler.rebuild(backends);
        scheduler.reset();

        tracing::debug!(backends = backends.len(), strategy = scheduler.name(), "Backend pool updated");
        Ok(())
    }

    /// Remove every backend and clear the cursor.
    pub fn remove_all(&self) {
        let mut state = self.state.write();
        state.backends.clear();
        let PoolState { backends, scheduler } = &mut *state;
        scheduler.rebuild(backends);
        scheduler.reset();
    }

    /// Restart the cursor, keeping backends and weights.
    pub fn reset(&self) {
        self.state.write().scheduler.reset();
    }

    /// Record the liveness of one backend.
    pub fn set_dead(&self, url: &Url, dead: bool) -> LoadBalancerResult<()> {
        let mut state = self.state.write();
        let index = state
            .position(url)
            .ok_or_else(|| LoadBalancerError::BackendNotFound(url.to_string()))?;
        state.backends[index].set_dead(dead);
        Ok(())
    }

    /// Read the liveness flag of one backend, `None` if it is not in the pool.
    pub fn is_dead(&self, url: &Url) -> Option<bool> {
        let state = self.state.read();
        state.position(url).map(|i| state.backends[i].is_dead())
    }

    /// Select the next backend.
    pub fn next(&self) -> LoadBalancerResult<Backend> {
        self.select(&HashSet::new())
    }

    /// Select the next backend whose URL is not in `exclude`.
    ///
    /// Excluded backends are skipped but still consume their turn. If every backend is
    /// excluded the cursor is left where it was and `AllBackendsDead` is returned.
    pub fn select(&self, exclude: &HashSet<Url>) -> LoadBalancerResult<Backend> {
        let mut state = self.state.write();
        let PoolState { backends, scheduler } = &mut *state;

        if backends.is_empty() {
            return Err(LoadBalancerError::EmptyPool);
        }
        if backends.iter().all(|b| exclude.contains(b.url())) {
            return Err(LoadBalancerError::AllBackendsDead);
        }

        // Every backend appears at least once per period.
        for _ in 0..scheduler.period(backends) {
            let index = scheduler.next_index(backends)?;
            let backend = &backends[index];
            if !exclude.contains(backend.url()) {
                return Ok(backend.clone());
            }
        }
        Err(LoadBalancerError::AllBackendsDead)
    }

    /// Snapshot of every backend, in configuration order.
    pub fn snapshot(&self) -> Vec<Backend> {
        self.state.read().backends.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().backends.is_empty()
    }
}
