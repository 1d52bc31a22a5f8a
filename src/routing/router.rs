//! Route lookup.
//!
//! # Responsibilities
//! - Compile a route set into an immutable snapshot
//! - Look up the single best route for a request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap, plus a bucket of host-less routes
//! - O(n) scan within the candidate buckets
//! - Ties are broken by specificity, then longest matching path prefix,
//!   then creation order; routes are sorted by `(created_at, id)` at compile
//!   time so the lowest index wins a full tie

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::HeaderName;
use thiserror::Error;
use uuid::Uuid;

use crate::routing::context::RequestContext;
use crate::routing::matcher::{AndMatcher, HeaderMatcher, HostMatcher, Matcher, MethodMatcher, PathPrefixMatcher};
use crate::store::{Route, StoreError};

#[derive(Debug, Error)]
pub enum RouterError {
    /// Route definitions could not be read.
    #[error("route data unavailable: {0}")]
    DataUnavailable(#[from] StoreError),

    #[error("route {route_id} cannot be compiled: {reason}")]
    Compile { route_id: Uuid, reason: String },

    #[error("routes {first} and {second} have identical criteria")]
    Ambiguous { first: Uuid, second: Uuid },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Fail compilation when two routes have identical criteria instead of
    /// letting creation order decide.
    pub reject_ambiguous: bool,
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Length of the route path prefix that matched, 0 if the route has none.
    pub prefix_len: usize,
}

#[derive(Debug)]
struct CompiledRoute {
    route: Arc<Route>,
    matcher: AndMatcher,
    paths: Option<PathPrefixMatcher>,
    /// Number of non-wildcard categories.
    specificity: usize,
}

impl CompiledRoute {
    fn compile(route: Arc<Route>) -> Result<Self, RouterError> {
        let fail = |reason: String| RouterError::Compile {
            route_id: route.id,
            reason,
        };

        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();

        if !route.hosts.is_empty() {
            if route.hosts.iter().any(|h| h.trim().is_empty()) {
                return Err(fail("empty host".into()));
            }
            matchers.push(Box::new(HostMatcher::new(&route.hosts)));
        }

        let paths = if route.paths.is_empty() {
            None
        } else {
            if let Some(bad) = route.paths.iter().find(|p| !p.starts_with('/')) {
                return Err(fail(format!("path '{}' must start with '/'", bad)));
            }
            let paths = PathPrefixMatcher::new(route.paths.clone());
            matchers.push(Box::new(paths.clone()));
            Some(paths)
        };

        if !route.methods.is_empty() {
            matchers.push(Box::new(MethodMatcher::new(&route.methods)));
        }

        let mut header_matchers = 0;
        for (name, values) in &route.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| fail(format!("invalid header name '{}'", name)))?;
            if values.is_empty() {
                continue;
            }
            matchers.push(Box::new(HeaderMatcher::new(name, values.clone())));
            header_matchers += 1;
        }

        let specificity = usize::from(!route.hosts.is_empty())
            + usize::from(paths.is_some())
            + usize::from(!route.methods.is_empty())
            + usize::from(header_matchers > 0);

        Ok(Self {
            route,
            matcher: AndMatcher::new(matchers),
            paths,
            specificity,
        })
    }

    /// Path prefix length if the request matches, `None` otherwise.
    fn evaluate(&self, req: &RequestContext) -> Option<usize> {
        if !self.matcher.matches(req) {
            return None;
        }
        match &self.paths {
            Some(paths) => paths.longest_match(req.path()),
            None => Some(0),
        }
    }
}

/// Normalized criteria, equal for routes that match exactly the same requests.
type Criteria = (Vec<String>, Vec<String>, Vec<String>, BTreeMap<String, Vec<String>>);

fn criteria(route: &Route) -> Criteria {
    let sorted = |values: &[String], f: fn(&str) -> String| {
        let mut v: Vec<String> = values.iter().map(|s| f(s)).collect();
        v.sort();
        v.dedup();
        v
    };
    let headers = route
        .headers
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(k, values)| (k.to_ascii_lowercase(), sorted(values, str::to_string)))
        .collect();

    (
        sorted(&route.hosts, str::to_ascii_lowercase),
        sorted(&route.paths, str::to_string),
        sorted(&route.methods, str::to_ascii_uppercase),
        headers,
    )
}

/// An immutable compiled route table, tagged with the version it was built from.
#[derive(Debug)]
pub struct RouterSnapshot {
    version: String,
    routes: Vec<CompiledRoute>,
    by_host: HashMap<String, Vec<usize>>,
    hostless: Vec<usize>,
}

impl RouterSnapshot {
    pub fn compile(
        mut routes: Vec<Route>,
        version: impl Into<String>,
        options: &CompileOptions,
    ) -> Result<Self, RouterError> {
        routes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        if options.reject_ambiguous {
            let mut seen: HashMap<Criteria, Uuid> = HashMap::new();
            for route in &routes {
                if let Some(first) = seen.insert(criteria(route), route.id) {
                    return Err(RouterError::Ambiguous {
                        first,
                        second: route.id,
                    });
                }
            }
        }

        let mut compiled = Vec::with_capacity(routes.len());
        let mut by_host: HashMap<String, Vec<usize>> = HashMap::new();
        let mut hostless = Vec::new();

        for (index, route) in routes.into_iter().enumerate() {
            let route = CompiledRoute::compile(Arc::new(route))?;
            if route.route.hosts.is_empty() {
                hostless.push(index);
            } else {
                for host in &route.route.hosts {
                    let bucket = by_host.entry(host.trim().to_ascii_lowercase()).or_default();
                    if !bucket.contains(&index) {
                        bucket.push(index);
                    }
                }
            }
            compiled.push(route);
        }

        Ok(Self {
            version: version.into(),
            routes: compiled,
            by_host,
            hostless,
        })
    }

    /// Version token this snapshot was built from.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The best matching route, or `None`.
    pub fn find(&self, req: &RequestContext) -> Option<RouteMatch> {
        let host_bucket = req
            .host()
            .and_then(|h| self.by_host.get(h))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        // (specificity, prefix_len, index); lower index wins a full tie.
        let mut best: Option<(usize, usize, usize)> = None;

        for &index in host_bucket.iter().chain(&self.hostless) {
            let candidate = &self.routes[index];
            let Some(prefix_len) = candidate.evaluate(req) else {
                continue;
            };

            let better = match best {
                None => true,
                Some((spec, len, idx)) => {
                    (candidate.specificity, prefix_len) > (spec, len)
                        || ((candidate.specificity, prefix_len) == (spec, len) && index < idx)
                }
            };
            if better {
                best = Some((candidate.specificity, prefix_len, index));
            }
        }

        best.map(|(_, prefix_len, index)| RouteMatch {
            route: self.routes[index].route.clone(),
            prefix_len,
        })
    }
}
