//! Per-worker router state.
//!
//! # Responsibilities
//! - Hold the active snapshot behind an atomically swapped pointer
//! - Rebuild from the store when the version token moves on
//! - Keep serving the previous snapshot when a rebuild fails
//!
//! # Design Decisions
//! - No lock around rebuild: two requests observing the same stale token may
//!   both rebuild, and the last store wins; both results are valid
//! - Readers take an `Arc` and keep it for the whole request

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::observability::metrics;
use crate::routing::router::{CompileOptions, RouterError, RouterSnapshot};
use crate::store::DataStore;

#[derive(Debug, Default)]
pub struct RouterState {
    current: ArcSwapOption<RouterSnapshot>,
    options: CompileOptions,
}

impl RouterState {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            options,
        }
    }

    /// The active snapshot, if a build ever succeeded.
    pub fn snapshot(&self) -> Option<Arc<RouterSnapshot>> {
        self.current.load_full()
    }

    /// Build a snapshot for `version` from the store and publish it.
    pub async fn rebuild(
        &self,
        version: &str,
        store: &dyn DataStore,
    ) -> Result<Arc<RouterSnapshot>, RouterError> {
        let result = match store.list_routes().await {
            Ok(routes) => RouterSnapshot::compile(routes, version, &self.options),
            Err(e) => Err(RouterError::DataUnavailable(e)),
        };

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(Some(snapshot.clone()));
                metrics::record_router_rebuild("ok");
                tracing::info!(version, routes = snapshot.len(), "Router rebuilt");
                Ok(snapshot)
            }
            Err(e) => {
                metrics::record_router_rebuild("error");
                Err(e)
            }
        }
    }

    /// Return a snapshot built from `version`, rebuilding if the active one
    /// is older. On rebuild failure the previous snapshot is returned.
    pub async fn ensure_fresh(
        &self,
        version: &str,
        store: &dyn DataStore,
    ) -> Option<Arc<RouterSnapshot>> {
        let current = self.snapshot();
        if let Some(snapshot) = &current {
            if snapshot.version() == version {
                return current;
            }
        }

        match self.rebuild(version, store).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    version,
                    serving = current.as_ref().map(|s| s.version()),
                    "Router rebuild failed, keeping previous router"
                );
                current
            }
        }
    }
}
