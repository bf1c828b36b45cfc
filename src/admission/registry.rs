//! Registry of active webhooks
//!
//! Built once during startup and then shared read-only (behind an `Arc`) with
//! every validation call, so reads need no locking.

use crate::admission::config::{AdmissionConfig, WebhookKind};
use crate::admission::{AdmissionError, AdmissionResult, HttpWebhook, Webhook};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Webhooks by admission kind, in registration order
#[derive(Default)]
pub struct WebhookRegistry {
    webhooks: HashMap<WebhookKind, Vec<Arc<dyn Webhook>>>,
}

impl WebhookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one HTTP webhook per registration and register each under its kind.
    ///
    /// The configuration is validated first; a registration whose client cannot
    /// be built fails the whole load.
    pub fn from_config(config: &AdmissionConfig) -> AdmissionResult<Self> {
        config.validate()?;

        let mut registry = Self::new();
        for webhook_config in &config.webhooks {
            let webhook = HttpWebhook::from_config(webhook_config)?;
            info!(
                webhook = %webhook_config.name,
                kind = %webhook_config.kind,
                url = %webhook_config.client_config.url,
                rules = webhook_config.rules.len(),
                "Registered admission webhook"
            );
            registry.register(webhook_config.kind, webhook)?;
        }

        Ok(registry)
    }

    /// Register a webhook under `kind`
    pub fn register<W: Webhook + 'static>(
        &mut self,
        kind: WebhookKind,
        webhook: W,
    ) -> AdmissionResult<()> {
        self.register_arc(kind, Arc::new(webhook))
    }

    /// Register an already shared webhook under `kind`
    pub fn register_arc(
        &mut self,
        kind: WebhookKind,
        webhook: Arc<dyn Webhook>,
    ) -> AdmissionResult<()> {
        let entries = self.webhooks.entry(kind).or_default();

        // Check for duplicate registration
        if entries.iter().any(|w| w.name() == webhook.name()) {
            return Err(AdmissionError::invalid_config(format!(
                "Webhook '{}' already registered as {}",
                webhook.name(),
                kind
            )));
        }

        entries.push(webhook);
        Ok(())
    }

    /// Webhooks of the given kind
    pub fn webhooks(&self, kind: WebhookKind) -> &[Arc<dyn Webhook>] {
        self.webhooks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validating webhooks, the only kind consulted by the admission manager
    pub fn validating(&self) -> &[Arc<dyn Webhook>] {
        self.webhooks(WebhookKind::Validating)
    }

    /// Names of the webhooks of the given kind
    pub fn names(&self, kind: WebhookKind) -> Vec<&str> {
        self.webhooks(kind).iter().map(|w| w.name()).collect()
    }

    /// Total number of registered webhooks across kinds
    pub fn len(&self) -> usize {
        self.webhooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
