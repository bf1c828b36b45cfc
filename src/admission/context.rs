//! Validation context
//!
//! Carries request correlation data and cancellation through one validation
//! call. Cancelling a context cancels every context derived from it; a child
//! can be cancelled on its own without touching its parent.

use chrono::{DateTime, Utc};
use futures::future::{self, FutureExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    Cancelled,
    DeadlineExceeded,
}

/// Context passed to webhooks during a validation call
#[derive(Clone)]
pub struct ValidationContext {
    /// Correlation id for logs
    request_id: String,

    /// Acting user, if the caller knows it
    user: Option<String>,

    /// Call start time
    start_time: DateTime<Utc>,

    /// Point after which the context counts as done
    deadline: Option<Instant>,

    /// This context's own cancellation switch
    cancel: Arc<watch::Sender<bool>>,

    /// Switches of this context and all its ancestors
    signals: Vec<watch::Receiver<bool>>,
}

impl ValidationContext {
    /// Create a new root context
    pub fn new() -> Self {
        let (cancel, signal) = watch::channel(false);
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user: None,
            start_time: Utc::now(),
            deadline: None,
            cancel: Arc::new(cancel),
            signals: vec![signal],
        }
    }

    /// Create a builder for the context
    pub fn builder() -> ValidationContextBuilder {
        ValidationContextBuilder::default()
    }

    /// Derive a context that is cancelled when this one is, and that can
    /// also be cancelled independently.
    pub fn child(&self) -> Self {
        let (cancel, signal) = watch::channel(false);
        let mut signals = self.signals.clone();
        signals.push(signal);

        Self {
            request_id: self.request_id.clone(),
            user: self.user.clone(),
            start_time: Utc::now(),
            deadline: self.deadline,
            cancel: Arc::new(cancel),
            signals,
        }
    }

    /// Derive a child whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        let deadline = Instant::now() + timeout;
        child.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        child
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and everything derived from it
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Check if the context has been cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.signals.iter().any(|signal| *signal.borrow())
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Resolve once the context is cancelled or its deadline passes
    pub async fn done(&self) -> Done {
        let cancelled = future::select_all(
            self.signals
                .iter()
                .map(|signal| wait_cancelled(signal.clone()).boxed()),
        );

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => Done::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Done::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                Done::Cancelled
            }
        }
    }
}

/// Resolves when the switch flips. A dropped switch can never flip, so the
/// future then stays pending.
async fn wait_cancelled(mut signal: watch::Receiver<bool>) {
    let closed = signal.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        future::pending::<()>().await;
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("request_id", &self.request_id)
            .field("user", &self.user)
            .field("start_time", &self.start_time)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Builder for ValidationContext
#[derive(Default)]
pub struct ValidationContextBuilder {
    request_id: Option<String>,
    user: Option<String>,
    timeout: Option<Duration>,
}

impl ValidationContextBuilder {
    /// Use a caller-provided correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the acting user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Bound the whole validation call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the context
    pub fn build(self) -> ValidationContext {
        let mut context = ValidationContext::new();

        if let Some(request_id) = self.request_id {
            context.request_id = request_id;
        }
        context.user = self.user;
        context.deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        context
    }
}
