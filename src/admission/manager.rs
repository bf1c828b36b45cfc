//! Central admission manager implementation
//!
//! `validating` fans a request out to every registered validating webhook in
//! parallel and returns on the first objection: a denial, or a malfunction of
//! a webhook that does not ignore its errors. Workers always run to
//! completion: each deposits its verdict into a queue sized to the worker
//! count, and the call's derived context is cancelled on every return path so
//! abandoned HTTP calls stop early.

use crate::admission::config::AdmissionConfig;
use crate::admission::{
    AdmissionError, AdmissionResult, Request, ValidationContext, Webhook, WebhookRegistry,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What a single webhook contributed to a validation call
#[derive(Debug)]
enum Verdict {
    /// Not interested, or malfunctioned under the `ignore` policy
    Abstain,
    Allowed,
    Denied { webhook: String, reason: String },
    Failed(AdmissionError),
}

/// Entry point for validating mutations against the registered webhooks
#[derive(Clone)]
pub struct AdmissionManager {
    /// Registered webhooks, read-only from here on
    registry: Arc<WebhookRegistry>,

    /// Worker tasks still running, across all calls
    in_flight: Arc<watch::Sender<usize>>,
}

impl AdmissionManager {
    /// Create a manager over an already built registry
    pub fn new(registry: Arc<WebhookRegistry>) -> Self {
        Self {
            registry,
            in_flight: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Build the registry from configuration and wrap it
    pub fn from_config(config: &AdmissionConfig) -> AdmissionResult<Self> {
        let registry = WebhookRegistry::from_config(config)?;
        Ok(Self::new(Arc::new(registry)))
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    /// Number of webhook reviews still running
    pub fn in_flight_reviews(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until no webhook review is running. Returns `false` if reviews
    /// are still running after `timeout`.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let mut in_flight = self.in_flight.subscribe();
        let idle = tokio::time::timeout(timeout, async move {
            // the sender lives in `self`, so this cannot fail
            let _ = in_flight.wait_for(|running| *running == 0).await;
        });
        idle.await.is_ok()
    }

    /// Ask every validating webhook whether `request` may proceed.
    ///
    /// `Ok(())` means allowed. An error is either a denial
    /// ([`AdmissionError::Denied`], carrying the webhook's reason) or a
    /// malfunction that prevented a verdict. With no validating webhooks
    /// registered, every request is allowed.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn validating(
        &self,
        ctx: &ValidationContext,
        request: &Request,
    ) -> AdmissionResult<()> {
        let webhooks = self.registry.validating();
        if webhooks.is_empty() {
            return Ok(());
        }

        let call = CancelOnDrop(ctx.child());
        let request = Arc::new(request.clone());
        let (tx, mut rx) = mpsc::channel(webhooks.len());

        for webhook in webhooks {
            let span = info_span!(
                "admission_review",
                webhook = %webhook.name(),
                request_id = %ctx.request_id()
            );
            let guard = InFlight::enter(&self.in_flight);
            let webhook = Arc::clone(webhook);
            let ctx = call.0.clone();
            let request = Arc::clone(&request);
            let tx = tx.clone();

            tokio::spawn(
                async move {
                    let _guard = guard;
                    let verdict = review(webhook.as_ref(), &ctx, &request).await;
                    // One verdict per worker into a queue sized to the worker
                    // count: this never waits. It only fails once the caller
                    // has already decided and dropped the receiver.
                    let _ = tx.try_send(verdict);
                }
                .instrument(span),
            );
        }
        drop(tx);

        while let Some(verdict) = rx.recv().await {
            match verdict {
                Verdict::Abstain | Verdict::Allowed => continue,
                Verdict::Denied { webhook, reason } => {
                    info!(
                        webhook = %webhook,
                        request_id = %ctx.request_id(),
                        operation = %request.operation,
                        resource = %request.resource_path(),
                        reason = %reason,
                        "Admission denied"
                    );
                    return Err(AdmissionError::Denied { webhook, reason });
                }
                Verdict::Failed(error) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        webhook = ?error.webhook(),
                        error = %error,
                        "Admission failed"
                    );
                    return Err(error);
                }
            }
        }

        debug!(
            request_id = %ctx.request_id(),
            operation = %request.operation,
            resource = %request.resource_path(),
            "Admission allowed"
        );
        Ok(())
    }
}

/// Run one webhook against the request and apply its failure policy
async fn review(webhook: &dyn Webhook, ctx: &ValidationContext, request: &Request) -> Verdict {
    let name = webhook.name().to_string();

    let consulted = AssertUnwindSafe(async {
        if !webhook.interest(request) {
            return Ok(None);
        }
        webhook.handle(ctx, request).await.map(Some)
    })
    .catch_unwind()
    .await;

    let outcome = match consulted {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(message = %message, "Webhook panicked while reviewing request");
            Err(AdmissionError::WorkerPanicked {
                webhook: name.clone(),
                message,
            })
        }
    };

    match outcome {
        Ok(None) => {
            debug!("Webhook not interested in request");
            Verdict::Abstain
        }
        Ok(Some(response)) => match response.allowed {
            Some(true) => {
                debug!("Webhook allowed request");
                Verdict::Allowed
            }
            Some(false) => Verdict::Denied {
                webhook: name,
                reason: response.result,
            },
            None if webhook.ignore_error() => {
                warn!("Ignoring malformed webhook response: missing 'allowed'");
                Verdict::Abstain
            }
            None => Verdict::Failed(AdmissionError::malformed_response(name)),
        },
        // failure policy covers malfunctions only, never an explicit denial
        Err(AdmissionError::Denied { webhook, reason }) => Verdict::Denied { webhook, reason },
        Err(error) if webhook.ignore_error() => {
            warn!(error = %error, "Ignoring webhook failure");
            Verdict::Abstain
        }
        Err(error) => Verdict::Failed(error),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cancels the per-call context however `validating` exits, including when
/// the caller drops its future.
struct CancelOnDrop(ValidationContext);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Counts a running worker until dropped
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|running| *running += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|running| *running -= 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::config::{FailurePolicy, WebhookKind};
    use crate::admission::{FnWebhook, Response, Rule};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    /// Waits for cancellation, or a long time, before allowing
    struct SlowHandler {
        name: String,
        failure_policy: FailurePolicy,
        observed_cancel: Arc<AtomicBool>,
    }

    impl SlowHandler {
        fn new(name: &str, failure_policy: FailurePolicy) -> (Self, Arc<AtomicBool>) {
            let observed_cancel = Arc::new(AtomicBool::new(false));
            let handler = Self {
                name: name.to_string(),
                failure_policy,
                observed_cancel: observed_cancel.clone(),
            };
            (handler, observed_cancel)
        }
    }

    #[async_trait]
    impl Webhook for SlowHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn interest(&self, _request: &Request) -> bool {
            true
        }

        async fn handle(
            &self,
            ctx: &ValidationContext,
            _request: &Request,
        ) -> AdmissionResult<Response> {
            tokio::select! {
                _ = ctx.done() => {
                    self.observed_cancel.store(true, Ordering::SeqCst);
                    Err(AdmissionError::Cancelled { webhook: self.name.clone() })
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Response::allow()),
            }
        }

        fn ignore_error(&self) -> bool {
            self.failure_policy == FailurePolicy::Ignore
        }
    }

    /// Allows once the gate is opened, ignoring cancellation
    struct GatedHandler {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Webhook for GatedHandler {
        fn name(&self) -> &str {
            "gated"
        }

        fn interest(&self, _request: &Request) -> bool {
            true
        }

        async fn handle(
            &self,
            _ctx: &ValidationContext,
            _request: &Request,
        ) -> AdmissionResult<Response> {
            self.gate.notified().await;
            Ok(Response::allow())
        }

        fn ignore_error(&self) -> bool {
            false
        }
    }

    fn manager(webhooks: Vec<Arc<dyn Webhook>>) -> AdmissionManager {
        let mut registry = WebhookRegistry::new();
        for webhook in webhooks {
            registry.register_arc(WebhookKind::Validating, webhook).unwrap();
        }
        AdmissionManager::new(Arc::new(registry))
    }

    fn respond(name: &str, response: Response) -> Arc<dyn Webhook> {
        Arc::new(FnWebhook::new(name, move |_: &Request| Ok(response.clone())))
    }

    fn fail(name: &str, failure_policy: FailurePolicy) -> Arc<dyn Webhook> {
        let webhook = name.to_string();
        Arc::new(
            FnWebhook::new(name, move |_: &Request| {
                Err(AdmissionError::UnexpectedStatus {
                    webhook: webhook.clone(),
                    status: 500,
                })
            })
            .with_failure_policy(failure_policy),
        )
    }

    fn malformed(name: &str, failure_policy: FailurePolicy) -> Arc<dyn Webhook> {
        Arc::new(
            FnWebhook::new(name, |_: &Request| Ok(Response::default()))
                .with_failure_policy(failure_policy),
        )
    }

    fn panicking(name: &str, failure_policy: FailurePolicy) -> Arc<dyn Webhook> {
        Arc::new(
            FnWebhook::new(name, |_: &Request| -> AdmissionResult<Response> {
                panic!("policy exploded")
            })
            .with_failure_policy(failure_policy),
        )
    }

    fn create_cluster() -> Request {
        Request::new("create", "applications")
            .with_sub_resource("clusters")
            .with_version("v2")
            .with_object(json!({"name": "demo"}))
    }

    #[tokio::test]
    async fn test_no_webhooks_allows() {
        let manager = manager(vec![]);
        let ctx = ValidationContext::new();
        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
        assert!(manager
            .validating(&ctx, &Request::new("delete", "anything"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_mutating_webhooks_not_consulted() {
        let mut registry = WebhookRegistry::new();
        registry
            .register(
                WebhookKind::Mutating,
                FnWebhook::new("mutator", |_: &Request| Ok(Response::deny("never asked"))),
            )
            .unwrap();
        let manager = AdmissionManager::new(Arc::new(registry));

        let ctx = ValidationContext::new();
        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_allow() {
        let manager = manager(vec![
            respond("a", Response::allow()),
            respond("b", Response::allow()),
        ]);
        let ctx = ValidationContext::new();
        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
    }

    #[tokio::test]
    async fn test_denial_propagation() {
        let manager = manager(vec![
            respond("ok", Response::allow()),
            respond("nay", Response::deny("nope")),
        ]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(err.is_denial());
        assert!(err.to_string().contains("nope"));
        assert_eq!(err.webhook(), Some("nay"));
    }

    #[tokio::test]
    async fn test_denial_not_suppressed_by_ignore_policy() {
        let denier = FnWebhook::new("nay", |_: &Request| Ok(Response::deny("nope")))
            .with_failure_policy(FailurePolicy::Ignore);
        let manager = manager(vec![Arc::new(denier)]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(err.is_denial());
    }

    #[tokio::test]
    async fn test_denial_returned_as_error_still_denies() {
        let denier = FnWebhook::new("nay", |_: &Request| Err(AdmissionError::denied("nay", "nope")))
            .with_failure_policy(FailurePolicy::Ignore);
        let manager = manager(vec![Arc::new(denier)]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(err.is_denial());
    }

    #[tokio::test]
    async fn test_uninterested_webhooks_are_neutral() {
        let denier = FnWebhook::new("deletes-only", |_: &Request| Ok(Response::deny("nope")))
            .with_rules(&[Rule::new(["*"], ["delete"], ["*"])]);
        let broken = FnWebhook::new("other-resource", |_: &Request| Ok(Response::default()))
            .with_rules(&[Rule::new(["projects"], ["*"], ["*"])]);
        let manager = manager(vec![Arc::new(denier), Arc::new(broken)]);
        let ctx = ValidationContext::new();

        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_policy_fail() {
        let manager = manager(vec![
            respond("ok", Response::allow()),
            fail("broken", FailurePolicy::Fail),
        ]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::UnexpectedStatus { status: 500, .. }));
        assert!(err.is_malfunction());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_policy_ignore() {
        let manager = manager(vec![
            respond("ok", Response::allow()),
            fail("broken", FailurePolicy::Ignore),
        ]);
        let ctx = ValidationContext::new();

        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
        assert!(logs_contain("Ignoring webhook failure"));
        assert!(!logs_contain("Ignoring malformed webhook response"));
    }

    #[tokio::test]
    async fn test_malformed_response_fail() {
        let manager = manager(vec![malformed("vague", FailurePolicy::Fail)]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::MalformedResponse { .. }));
        assert_eq!(err.webhook(), Some("vague"));
        assert!(!err.is_denial());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_response_ignore() {
        let manager = manager(vec![malformed("vague", FailurePolicy::Ignore)]);
        let ctx = ValidationContext::new();

        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
        assert!(logs_contain("Ignoring malformed webhook response"));
        assert!(!logs_contain("Ignoring webhook failure"));
    }

    #[tokio::test]
    async fn test_panicking_webhook_fail() {
        let manager = manager(vec![
            respond("ok", Response::allow()),
            panicking("boom", FailurePolicy::Fail),
        ]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        match err {
            AdmissionError::WorkerPanicked { webhook, message } => {
                assert_eq!(webhook, "boom");
                assert!(message.contains("policy exploded"));
            }
            other => panic!("Expected WorkerPanicked, got {:?}", other),
        }
        assert!(manager.drained(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_panicking_webhook_ignore() {
        let manager = manager(vec![panicking("boom", FailurePolicy::Ignore)]);
        let ctx = ValidationContext::new();

        assert!(manager.validating(&ctx, &create_cluster()).await.is_ok());
    }

    #[tokio::test]
    async fn test_early_denial_releases_workers() {
        let (slow, observed_cancel) = SlowHandler::new("slow", FailurePolicy::Fail);
        let manager = manager(vec![Arc::new(slow), respond("nay", Response::deny("nope"))]);
        let ctx = ValidationContext::new();

        let started = Instant::now();
        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(started.elapsed() < Duration::from_secs(5));

        // the slow worker is told to stop and finishes promptly
        assert!(manager.drained(Duration::from_secs(2)).await);
        assert_eq!(manager.in_flight_reviews(), 0);
        assert!(observed_cancel.load(Ordering::SeqCst));

        // the caller's own context is untouched
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_cancellation_reaches_webhooks() {
        let (slow, observed_cancel) = SlowHandler::new("slow", FailurePolicy::Fail);
        let manager = manager(vec![Arc::new(slow)]);
        let ctx = ValidationContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Cancelled { .. }));
        assert!(observed_cancel.load(Ordering::SeqCst));
        assert!(manager.drained(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_dropped_call_cancels_workers() {
        let (slow, observed_cancel) = SlowHandler::new("slow", FailurePolicy::Fail);
        let manager = manager(vec![Arc::new(slow)]);
        let ctx = ValidationContext::new();

        let request = create_cluster();
        let call = manager.validating(&ctx, &request);
        let outcome = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(outcome.is_err());

        assert!(manager.drained(Duration::from_secs(1)).await);
        assert!(observed_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drained_waits_for_running_reviews() {
        let gate = Arc::new(Notify::new());
        let manager = manager(vec![Arc::new(GatedHandler { gate: gate.clone() })]);
        assert!(manager.drained(Duration::from_millis(10)).await);

        let call = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let ctx = ValidationContext::new();
                manager.validating(&ctx, &create_cluster()).await
            })
        };

        // the review is parked on the gate
        tokio::task::yield_now().await;
        assert_eq!(manager.in_flight_reviews(), 1);
        assert!(!manager.drained(Duration::from_millis(50)).await);

        gate.notify_one();
        assert!(manager.drained(Duration::from_secs(1)).await);
        assert_eq!(manager.in_flight_reviews(), 0);
        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_single_denial_surfaced() {
        let manager = manager(vec![
            respond("first", Response::deny("reason one")),
            respond("second", Response::deny("reason two")),
        ]);
        let ctx = ValidationContext::new();

        let err = manager.validating(&ctx, &create_cluster()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("reason one") ^ message.contains("reason two"));
        assert!(manager.drained(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_scoped_cluster_policy() {
        // Fixture policy: cluster creation needs a scope tag and a valid name.
        let policy = FnWebhook::new("cluster-scope", |request: &Request| {
            let scoped = request
                .options
                .get("scope")
                .and_then(Value::as_array)
                .map_or(false, |tags| tags.iter().any(|t| t == "team-a"));
            if !scoped {
                return Ok(Response::deny("missing scope tag"));
            }
            let name = request
                .object
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if name.contains("invalid") {
                return Ok(Response::deny(format!("forbidden cluster name '{}'", name)));
            }
            Ok(Response::allow())
        })
        .with_rules(&[Rule::new(["applications/clusters"], ["create"], ["v2"])]);
        let manager = manager(vec![Arc::new(policy)]);
        let ctx = ValidationContext::new();

        let allowed = create_cluster().with_option("scope", json!(["team-a"]));
        assert!(manager.validating(&ctx, &allowed).await.is_ok());

        let forbidden = allowed.clone().with_object(json!({"name": "invalid-cluster"}));
        let err = manager.validating(&ctx, &forbidden).await.unwrap_err();
        assert!(err.to_string().contains("forbidden cluster name"));

        let unscoped = create_cluster();
        assert!(manager.validating(&ctx, &unscoped).await.is_err());
    }
}
