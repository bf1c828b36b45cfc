//! The webhook capability consulted by the admission manager

use crate::admission::{AdmissionResult, Request, Response, ValidationContext};
use async_trait::async_trait;

/// A policy endpoint that can review requests.
///
/// Implementations decide which requests they care about (`interest`), produce
/// a verdict for those (`handle`), and declare how their own malfunctions are
/// treated (`ignore_error`).
#[async_trait]
pub trait Webhook: Send + Sync {
    /// Get the webhook name
    fn name(&self) -> &str;

    /// Whether this webhook wants to review the request
    fn interest(&self, request: &Request) -> bool;

    /// Review the request.
    ///
    /// Should return promptly once `ctx` is cancelled.
    async fn handle(&self, ctx: &ValidationContext, request: &Request) -> AdmissionResult<Response>;

    /// Whether errors and malformed responses from this webhook are ignored
    fn ignore_error(&self) -> bool;
}
