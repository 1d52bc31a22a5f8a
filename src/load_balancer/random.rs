//! Weighted random load balancing strategy.

use rand::Rng;

use crate::load_balancer::{pool::PoolTarget, LoadBalancer};

/// Picks each candidate with probability proportional to its weight.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRandom {
    fn next_target<'a>(&self, candidates: &[&'a PoolTarget]) -> Option<&'a PoolTarget> {
        let total: u64 = candidates.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return None;
        }
        if candidates.len() == 1 {
            return candidates.first().copied();
        }

        let mut point = rand::thread_rng().gen_range(0..total);
        for target in candidates {
            let weight = u64::from(target.weight);
            if point < weight {
                return Some(*target);
            }
            point -= weight;
        }
        candidates.last().copied()
    }
}
