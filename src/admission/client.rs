//! HTTP client for webhook servers

use crate::admission::config::ClientConfig;
use crate::admission::context::Done;
use crate::admission::{AdmissionError, AdmissionResult, Request, Response, ValidationContext};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends requests to one webhook server.
///
/// Built once per registration; the underlying connection pool is reused
/// across calls. Each call is a single attempt.
#[derive(Debug, Clone)]
pub struct AdmissionClient {
    webhook: String,
    url: Url,
    timeout: Duration,
    http: reqwest::Client,
}

impl AdmissionClient {
    /// Create a client for the named webhook.
    ///
    /// TLS trust: `insecure` disables verification; otherwise a CA bundle
    /// replaces the platform roots; otherwise the platform roots are used.
    pub fn new(
        webhook: impl Into<String>,
        config: &ClientConfig,
        timeout: Duration,
    ) -> AdmissionResult<Self> {
        let webhook = webhook.into();
        let url = Url::parse(&config.url).map_err(|e| {
            AdmissionError::invalid_config(format!(
                "Webhook '{}' has an invalid url '{}': {}",
                webhook, config.url, e
            ))
        })?;

        let mut builder = reqwest::Client::builder().timeout(timeout);

        if config.insecure {
            if config.ca_bundle.is_some() {
                warn!(
                    webhook = %webhook,
                    "Both insecure and caBundle are set; TLS verification is disabled"
                );
            }
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(pem) = config.ca_bundle_pem()? {
            let certificates = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| AdmissionError::tls(&webhook, e.to_string()))?;
            if certificates.is_empty() {
                return Err(AdmissionError::tls(
                    &webhook,
                    "caBundle contains no certificates",
                ));
            }

            builder = builder.tls_built_in_root_certs(false);
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        let http = builder
            .build()
            .map_err(|e| AdmissionError::tls(&webhook, e.to_string()))?;

        Ok(Self {
            webhook,
            url,
            timeout,
            http,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST the request and decode the verdict.
    ///
    /// The call is abandoned as soon as `ctx` is cancelled or its deadline
    /// passes. A `null` body decodes to a response without a verdict.
    pub async fn get(
        &self,
        ctx: &ValidationContext,
        request: &Request,
    ) -> AdmissionResult<Response> {
        let body = serde_json::to_vec(request)?;

        let exchange = async {
            let response = self
                .http
                .post(self.url.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AdmissionError::UnexpectedStatus {
                    webhook: self.webhook.clone(),
                    status: status.as_u16(),
                });
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| self.transport_error(e))?;
            let verdict: Option<Response> =
                serde_json::from_slice(&bytes).map_err(|source| AdmissionError::InvalidResponse {
                    webhook: self.webhook.clone(),
                    source,
                })?;
            Ok(verdict.unwrap_or_default())
        };

        tokio::select! {
            biased;
            done = ctx.done() => {
                debug!(webhook = %self.webhook, ?done, "Abandoning webhook call");
                Err(match done {
                    Done::Cancelled => AdmissionError::Cancelled {
                        webhook: self.webhook.clone(),
                    },
                    Done::DeadlineExceeded => AdmissionError::DeadlineExceeded {
                        webhook: self.webhook.clone(),
                    },
                })
            }
            result = exchange => result,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> AdmissionError {
        if error.is_timeout() {
            AdmissionError::Timeout {
                webhook: self.webhook.clone(),
                duration: self.timeout,
            }
        } else {
            AdmissionError::Transport {
                webhook: self.webhook.clone(),
                source: error,
            }
        }
    }
}
