//! HTTP-backed webhook

use crate::admission::config::{FailurePolicy, WebhookConfig};
use crate::admission::{
    AdmissionClient, AdmissionResult, Request, ResourceMatchers, Response, ValidationContext,
    Webhook,
};
use async_trait::async_trait;

/// A webhook reached over HTTP(S), built from one registration
pub struct HttpWebhook {
    name: String,
    matchers: ResourceMatchers,
    failure_policy: FailurePolicy,
    client: AdmissionClient,
}

impl HttpWebhook {
    /// Build the client and compile the rules of a registration
    pub fn from_config(config: &WebhookConfig) -> AdmissionResult<Self> {
        let client = AdmissionClient::new(&config.name, &config.client_config, config.timeout())?;

        Ok(Self {
            name: config.name.clone(),
            matchers: ResourceMatchers::compile(&config.rules),
            failure_policy: config.failure_policy,
            client,
        })
    }

    pub fn client(&self) -> &AdmissionClient {
        &self.client
    }
}

#[async_trait]
impl Webhook for HttpWebhook {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self, request: &Request) -> bool {
        self.matchers.matches(request)
    }

    async fn handle(
        &self,
        ctx: &ValidationContext,
        request: &Request,
    ) -> AdmissionResult<Response> {
        self.client.get(ctx, request).await
    }

    fn ignore_error(&self) -> bool {
        self.failure_policy == FailurePolicy::Ignore
    }
}
