//! Balancer pool of one upstream.
//!
//! # Responsibilities
//! - Fold an upstream's target history into its live weighted target set
//! - Apply the load balancing algorithm to the non-excluded targets
//!
//! # Design Decisions
//! - A pool is immutable once built; membership only changes by building a
//!   new pool after invalidation
//! - The newest record per `host:port` wins; weight 0 removes the target

use std::collections::HashMap;

use uuid::Uuid;

use crate::events::UpstreamRef;
use crate::load_balancer::LoadBalancer;
use crate::store::Target;

/// A live target of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTarget {
    /// Id of the record this entry was built from.
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug)]
pub struct BalancerPool {
    upstream: UpstreamRef,
    targets: Vec<PoolTarget>,
    strategy: Box<dyn LoadBalancer>,
}

impl BalancerPool {
    /// Build from target records ordered oldest first.
    pub fn from_history(
        upstream: UpstreamRef,
        history: Vec<Target>,
        strategy: Box<dyn LoadBalancer>,
    ) -> Self {
        let mut targets: Vec<PoolTarget> = Vec::new();
        let mut index: HashMap<(String, u16), usize> = HashMap::new();

        for record in history {
            let Some((host, port)) = record.host_port() else {
                tracing::warn!(upstream = %upstream, target = %record.target, "Skipping unparsable target");
                continue;
            };
            let entry = PoolTarget {
                id: record.id,
                host: host.clone(),
                port,
                weight: record.weight,
            };
            match index.get(&(host.clone(), port)) {
                Some(&i) => targets[i] = entry,
                None => {
                    index.insert((host, port), targets.len());
                    targets.push(entry);
                }
            }
        }
        targets.retain(|t| t.weight > 0);

        Self {
            upstream,
            targets,
            strategy,
        }
    }

    pub fn upstream(&self) -> &UpstreamRef {
        &self.upstream
    }

    pub fn targets(&self) -> &[PoolTarget] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Pick a target, skipping those for which `excluded` returns true.
    pub fn select<F>(&self, excluded: F) -> Option<&PoolTarget>
    where
        F: Fn(&PoolTarget) -> bool,
    {
        let candidates: Vec<&PoolTarget> = self.targets.iter().filter(|t| !excluded(t)).collect();
        self.strategy.next_target(&candidates)
    }
}
