//! Weighted round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{pool::PoolTarget, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter and walks the cumulative weights, so a target
/// of weight 3 is picked three times per cycle.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_target<'a>(&self, candidates: &[&'a PoolTarget]) -> Option<&'a PoolTarget> {
        let total: usize = candidates.iter().map(|t| t.weight as usize).sum();
        if total == 0 {
            return None;
        }

        let mut position = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for target in candidates {
            let weight = target.weight as usize;
            if position < weight {
                return Some(*target);
            }
            position -= weight;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn target(host: &str, weight: u32) -> PoolTarget {
        PoolTarget {
            id: Uuid::new_v4(),
            host: host.into(),
            port: 80,
            weight,
        }
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let b1 = target("h1", 1);
        let b2 = target("h2", 1);
        let candidates = vec![&b1, &b2];

        assert_eq!(lb.next_target(&candidates).unwrap().host, "h1");
        assert_eq!(lb.next_target(&candidates).unwrap().host, "h2");
        assert_eq!(lb.next_target(&candidates).unwrap().host, "h1");
    }

    #[test]
    fn test_weights_respected_per_cycle() {
        let lb = RoundRobin::new();
        let heavy = target("heavy", 3);
        let light = target("light", 1);
        let candidates = vec![&heavy, &light];

        let picks: Vec<_> = (0..8).map(|_| lb.next_target(&candidates).unwrap().host.clone()).collect();
        assert_eq!(picks.iter().filter(|h| *h == "heavy").count(), 6);
        assert_eq!(picks.iter().filter(|h| *h == "light").count(), 2);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(RoundRobin::new().next_target(&[]).is_none());
    }
}
