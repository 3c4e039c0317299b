//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher asks for a backend (excluding the ones already tried)
//!     → pool.rs (take the exclusive lock)
//!     → Apply the configured scheduler:
//!         - round_robin.rs (rotate through backends, ignore weights)
//!         - weighted.rs (smooth weighted round robin over gcd/max weight)
//!     → Return a snapshot of the selected backend
//! ```
//!
//! # Design Decisions
//! - Scheduler cursor state lives next to the backend list, behind one lock
//! - Selection is independent of liveness; the dispatcher probes before forwarding
//! - Strategy is chosen by configuration, not by separate dispatch paths

use serde::{Deserialize, Serialize};

pub mod backend;
pub mod error;
pub mod pool;
pub mod round_robin;
pub mod weighted;

pub use backend::Backend;
pub use error::{LoadBalancerError, LoadBalancerResult};
pub use pool::BackendPool;

use self::round_robin::RoundRobin;
use self::weighted::SmoothWeightedRoundRobin;

/// A backend selection algorithm.
///
/// Implementations hold only cursor state. They are always driven by the
/// [`BackendPool`] while it holds its exclusive lock, with the same slice the
/// cursor was built for.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    /// Pick the index of the next backend.
    fn next_index(&mut self, backends: &[Backend]) -> LoadBalancerResult<usize>;

    /// Recompute cached data after the backend set changed. The cursor is kept.
    fn rebuild(&mut self, backends: &[Backend]);

    /// Restart the cursor so that the selection sequence replays from the beginning.
    fn reset(&mut self);

    /// Number of selections after which the sequence repeats.
    fn period(&self, backends: &[Backend]) -> usize;

    fn name(&self) -> &'static str;
}

/// Load balancing strategy selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain rotation, weights ignored.
    #[serde(alias = "rr")]
    RoundRobin,
    /// Smooth weighted round robin.
    #[default]
    #[serde(alias = "wrr", alias = "weighted_round_robin")]
    SmoothWeightedRoundRobin,
}

impl Strategy {
    /// Create a fresh scheduler for this strategy.
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::SmoothWeightedRoundRobin => Box::new(SmoothWeightedRoundRobin::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::SmoothWeightedRoundRobin => "smooth_weighted_round_robin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::RoundRobin.build().name(), "round_robin");
        assert_eq!(
            Strategy::SmoothWeightedRoundRobin.build().name(),
            "smooth_weighted_round_robin"
        );
        for strategy in [Strategy::RoundRobin, Strategy::SmoothWeightedRoundRobin] {
            assert_eq!(strategy.name(), strategy.build().name());
        }
    }

    #[test]
    fn test_strategy_deserialize_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: Strategy,
        }

        let w: Wrapper = serde_json::from_str(r#"{"strategy":"rr"}"#).unwrap();
        assert_eq!(w.strategy, Strategy::RoundRobin);

        let w: Wrapper = serde_json::from_str(r#"{"strategy":"weighted_round_robin"}"#).unwrap();
        assert_eq!(w.strategy, Strategy::SmoothWeightedRoundRobin);
    }
}
