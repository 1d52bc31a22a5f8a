//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive, port stripped)
//! - Match path prefix (case-sensitive)
//! - Match method (case-insensitive)
//! - Match header values (exact)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Each matcher holds the whole value set of one category (OR within)
//! - A category the route leaves empty produces no matcher (wildcard)
//! - No regex to guarantee O(n) matching

use std::collections::HashSet;

use axum::http::HeaderName;

use crate::routing::context::RequestContext;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &RequestContext) -> bool;
}

/// Matches any of a set of hosts.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    hosts: HashSet<String>,
}

impl HostMatcher {
    /// Hosts are normalized to lowercase for case-insensitive matching.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &RequestContext) -> bool {
        req.host().is_some_and(|h| self.hosts.contains(h))
    }
}

/// Matches any of a set of path prefixes.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefixes: Vec<String>,
}

impl PathPrefixMatcher {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// Length of the longest prefix that matches `path`.
    pub fn longest_match(&self, path: &str) -> Option<usize> {
        self.prefixes
            .iter()
            .filter(|p| path.starts_with(p.as_str()))
            .map(|p| p.len())
            .max()
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &RequestContext) -> bool {
        self.longest_match(req.path()).is_some()
    }
}

/// Matches any of a set of methods.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<String>,
}

impl MethodMatcher {
    pub fn new(methods: &[String]) -> Self {
        Self {
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
        }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &RequestContext) -> bool {
        let method = req.method.as_str();
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Matches when one header carries any of the accepted values.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: HeaderName,
    values: Vec<String>,
}

impl HeaderMatcher {
    pub fn new(name: HeaderName, values: Vec<String>) -> Self {
        Self { name, values }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, req: &RequestContext) -> bool {
        req.headers
            .get_all(&self.name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| self.values.iter().any(|accepted| accepted == v))
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &RequestContext) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req))
    }
}
