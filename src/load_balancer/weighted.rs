//! Smooth weighted round-robin load balancing strategy.
//!
//! Every pass over the backend list lowers a moving threshold by the gcd of all
//! weights, starting again from the maximum weight once it reaches zero. A backend
//! is picked whenever its weight is at least the threshold, so over one cycle of
//! `sum(weights)` selections each backend is chosen exactly `weight` times and the
//! heavier backends are interleaved with the lighter ones instead of being served
//! in one burst.

use crate::load_balancer::{
    Scheduler,
    backend::Backend,
    error::{LoadBalancerError, LoadBalancerResult},
};

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct SmoothWeightedRoundRobin {
    /// Last selected position, `None` before the first selection.
    current_index: Option<usize>,
    current_weight: i64,
    gcd_weight: u32,
    max_weight: u32,
}

impl SmoothWeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_weights(&mut self, weights: impl IntoIterator<Item = u32>) {
        let (gcd_weight, max_weight) = weights
            .into_iter()
            .fold((0, 0), |(g, m), w| (gcd(g, w), m.max(w)));
        self.gcd_weight = gcd_weight;
        self.max_weight = max_weight;
    }

    /// Advance the cursor over `n` positions whose weights are given by `weight_of`.
    ///
    /// Terminates as long as the cached maximum is the weight of some position.
    fn next_by(&mut self, n: usize, weight_of: impl Fn(usize) -> u32) -> LoadBalancerResult<usize> {
        if n == 0 {
            return Err(LoadBalancerError::EmptyPool);
        }
        if self.max_weight == 0 {
            return Err(LoadBalancerError::AllWeightsZero);
        }

        loop {
            let index = match self.current_index {
                Some(i) => (i + 1) % n,
                None => 0,
            };
            self.current_index = Some(index);

            if index == 0 {
                self.current_weight -= i64::from(self.gcd_weight);
                if self.current_weight <= 0 {
                    self.current_weight = i64::from(self.max_weight);
                }
            }

            if i64::from(weight_of(index)) >= self.current_weight {
                return Ok(index);
            }
        }
    }
}

impl Scheduler for SmoothWeightedRoundRobin {
    fn next_index(&mut self, backends: &[Backend]) -> LoadBalancerResult<usize> {
        self.next_by(backends.len(), |i| backends[i].weight())
    }

    fn rebuild(&mut self, backends: &[Backend]) {
        self.rebuild_weights(backends.iter().map(Backend::weight));
    }

    fn reset(&mut self) {
        self.current_index = None;
        self.current_weight = 0;
    }

    fn period(&self, backends: &[Backend]) -> usize {
        if self.gcd_weight == 0 {
            return backends.len();
        }
        backends
            .iter()
            .map(|b| (b.weight() / self.gcd_weight) as usize)
            .sum()
    }

    fn name(&self) -> &'static str {
        "smooth_weighted_round_robin"
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}
