//! Webhook Admission System
//!
//! Before a create, update or delete is applied, the admission manager asks
//! every registered validating webhook whether the operation may proceed.
//! Webhooks are consulted in parallel; the first denial or unignored failure
//! rejects the operation.

pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod manager;
pub mod matcher;
pub mod registry;
pub mod types;
pub mod webhook;
pub mod webhooks;

// Re-export commonly used types
pub use self::client::AdmissionClient;
pub use self::config::{
    AdmissionConfig, ClientConfig, FailurePolicy, WebhookConfig, WebhookKind,
};
pub use self::context::{Done, ValidationContext, ValidationContextBuilder};
pub use self::errors::{AdmissionError, AdmissionResult};
pub use self::manager::AdmissionManager;
pub use self::matcher::{ResourceMatcher, ResourceMatchers, Rule};
pub use self::registry::WebhookRegistry;
pub use self::types::{Operation, Request, Response};
pub use self::webhook::Webhook;
pub use self::webhooks::{FnWebhook, HttpWebhook};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        AdmissionConfig, AdmissionError, AdmissionManager, AdmissionResult, FailurePolicy,
        FnWebhook, Operation, Request, Response, Rule, ValidationContext, Webhook, WebhookKind,
        WebhookRegistry,
    };
}
