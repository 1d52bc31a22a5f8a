//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → upstream_url host identified
//!     → balancer.rs (IP literal, upstream name, or DNS name)
//!     → pool.rs (live weighted targets of the upstream)
//!     → Apply load balancing algorithm:
//!         - random.rs (weight-proportional random choice)
//!         - round_robin.rs (rotate through targets by weight)
//!     → attempt.rs (record the choice for retries)
//!     → Return resolved address or error
//! ```
//!
//! # Design Decisions
//! - Algorithms only see the candidates left after excluding failed targets
//! - Algorithm selection is global; each pool owns its own instance
//! - A target is taken out of rotation by giving it weight 0

pub mod attempt;
pub mod balancer;
pub mod dns;
pub mod pool;
pub mod random;
pub mod round_robin;

pub use attempt::{AttemptOutcome, AttemptRecord, AttemptState, ResolvedAddress, TargetKind, TargetSpec};
pub use balancer::{Balancer, BalancerError};
pub use dns::{DnsAnswer, Resolver, SystemResolver};
pub use pool::{BalancerPool, PoolTarget};

use crate::config::BalancerAlgorithm;

/// Target selection algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `candidates`, or `None` if none can take traffic.
    fn next_target<'a>(&self, candidates: &[&'a PoolTarget]) -> Option<&'a PoolTarget>;
}

/// A fresh strategy instance for `algorithm`.
pub fn strategy_for(algorithm: BalancerAlgorithm) -> Box<dyn LoadBalancer> {
    match algorithm {
        BalancerAlgorithm::WeightedRandom => Box::new(random::WeightedRandom::new()),
        BalancerAlgorithm::RoundRobin => Box::new(round_robin::RoundRobin::new()),
    }
}
