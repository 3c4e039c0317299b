//! Round-robin load balancing strategy.

use crate::load_balancer::{
    Scheduler,
    backend::Backend,
    error::{LoadBalancerError, LoadBalancerResult},
};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends; weights and liveness are ignored.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn next_index(&mut self, backends: &[Backend]) -> LoadBalancerResult<usize> {
        if backends.is_empty() {
            return Err(LoadBalancerError::EmptyPool);
        }

        let index = self.counter % backends.len();
        self.counter = self.counter.wrapping_add(1);
        Ok(index)
    }

    fn rebuild(&mut self, _backends: &[Backend]) {}

    fn reset(&mut self) {
        self.counter = 0;
    }

    fn period(&self, backends: &[Backend]) -> usize {
        backends.len()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
