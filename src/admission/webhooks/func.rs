//! In-process webhook backed by a closure

use crate::admission::config::FailurePolicy;
use crate::admission::{
    AdmissionResult, Request, ResourceMatchers, Response, Rule, ValidationContext, Webhook,
};
use async_trait::async_trait;
use std::sync::Arc;

type ReviewFn = dyn Fn(&Request) -> AdmissionResult<Response> + Send + Sync;

/// A webhook evaluated in-process.
///
/// Shares rule matching and failure policy semantics with [`HttpWebhook`],
/// which makes it usable both for embedded policies and as a stand-in for a
/// remote server.
///
/// [`HttpWebhook`]: crate::admission::HttpWebhook
#[derive(Clone)]
pub struct FnWebhook {
    name: String,
    matchers: ResourceMatchers,
    failure_policy: FailurePolicy,
    review: Arc<ReviewFn>,
}

impl FnWebhook {
    /// Create a webhook interested in every request, failing closed
    pub fn new<F>(name: impl Into<String>, review: F) -> Self
    where
        F: Fn(&Request) -> AdmissionResult<Response> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matchers: ResourceMatchers::compile(&[Rule::any()]),
            failure_policy: FailurePolicy::Fail,
            review: Arc::new(review),
        }
    }

    /// Restrict interest to the given rules
    pub fn with_rules(mut self, rules: &[Rule]) -> Self {
        self.matchers = ResourceMatchers::compile(rules);
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}

#[async_trait]
impl Webhook for FnWebhook {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self, request: &Request) -> bool {
        self.matchers.matches(request)
    }

    async fn handle(
        &self,
        _ctx: &ValidationContext,
        request: &Request,
    ) -> AdmissionResult<Response> {
        (self.review)(request)
    }

    fn ignore_error(&self) -> bool {
        self.failure_policy == FailurePolicy::Ignore
    }
}
