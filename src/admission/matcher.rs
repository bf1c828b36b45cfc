//! Rule matching
//!
//! A [`Rule`] is the declarative form found in configuration. It compiles into
//! a [`ResourceMatcher`], and the rules of one registration combine into
//! [`ResourceMatchers`], which matches when any single rule does.

use crate::admission::{Operation, Request};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Sentinel that lifts a rule dimension's constraint
pub const WILDCARD: &str = "*";

/// Declarative match condition of a webhook registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub operations: Vec<String>,

    #[serde(default)]
    pub versions: Vec<String>,
}

impl Rule {
    pub fn new<R, O, V>(
        resources: impl IntoIterator<Item = R>,
        operations: impl IntoIterator<Item = O>,
        versions: impl IntoIterator<Item = V>,
    ) -> Self
    where
        R: Into<String>,
        O: Into<String>,
        V: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            operations: operations.into_iter().map(Into::into).collect(),
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    /// A rule matching every request
    pub fn any() -> Self {
        Self::new([WILDCARD], [WILDCARD], [WILDCARD])
    }

    /// Compile into a predicate
    pub fn compile(&self) -> ResourceMatcher {
        ResourceMatcher {
            resources: allow_set(&self.resources, |r| r.to_string()),
            operations: allow_set(&self.operations, |o| Operation::from(o)),
            versions: allow_set(&self.versions, |v| v.to_string()),
        }
    }
}

/// `None` when the values contain the wildcard, otherwise the allow-set.
fn allow_set<T, F>(values: &[String], convert: F) -> Option<HashSet<T>>
where
    T: Eq + std::hash::Hash,
    F: Fn(&str) -> T,
{
    if values.iter().any(|v| v == WILDCARD) {
        return None;
    }
    Some(values.iter().map(|v| convert(v)).collect())
}

/// Compiled form of a single [`Rule`].
///
/// Each dimension is either unconstrained (`None`) or a finite allow-set.
#[derive(Debug, Clone, Default)]
pub struct ResourceMatcher {
    resources: Option<HashSet<String>>,
    operations: Option<HashSet<Operation>>,
    versions: Option<HashSet<String>>,
}

impl ResourceMatcher {
    /// Whether the request passes all three dimensions
    pub fn matches(&self, request: &Request) -> bool {
        self.resources
            .as_ref()
            .map_or(true, |set| set.contains(&*request.resource_path()))
            && self
                .operations
                .as_ref()
                .map_or(true, |set| set.contains(&request.operation))
            && self
                .versions
                .as_ref()
                .map_or(true, |set| set.contains(&request.version))
    }

    pub fn is_unconstrained(&self) -> bool {
        self.resources.is_none() && self.operations.is_none() && self.versions.is_none()
    }
}

/// The compiled rules of one registration, OR-combined
#[derive(Debug, Clone, Default)]
pub struct ResourceMatchers(Vec<ResourceMatcher>);

impl ResourceMatchers {
    pub fn compile<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        Self(rules.into_iter().map(Rule::compile).collect())
    }

    /// True if any rule matches; an empty rule list matches nothing
    pub fn matches(&self, request: &Request) -> bool {
        self.0.iter().any(|matcher| matcher.matches(request))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ResourceMatcher> for ResourceMatchers {
    fn from_iter<I: IntoIterator<Item = ResourceMatcher>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
