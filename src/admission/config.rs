//! Webhook registration configuration
//!
//! Registrations are loaded once at startup, from TOML (preferred) or JSON.
//! Keys follow the wire conventions of admission webhook configurations
//! (`failurePolicy`, `timeoutSeconds`, `clientConfig`, ...).

use crate::admission::matcher::Rule;
use crate::admission::{AdmissionError, AdmissionResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Longest timeout a registration may ask for
pub const MAX_TIMEOUT_SECONDS: u64 = 30;

/// Main admission configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Webhook registrations
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Which admission phase a webhook takes part in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    #[default]
    Validating,
    /// Accepted in configuration, never consulted
    Mutating,
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => f.write_str("validating"),
            Self::Mutating => f.write_str("mutating"),
        }
    }
}

/// What to do when a webhook malfunctions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the malfunction and treat the webhook as having no opinion
    Ignore,
    /// Fail the whole validation
    #[default]
    Fail,
}

/// One webhook registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Webhook name, unique across the configuration
    pub name: String,

    #[serde(default)]
    pub kind: WebhookKind,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Requests the webhook is interested in; any matching rule suffices
    #[serde(default)]
    pub rules: Vec<Rule>,

    pub client_config: ClientConfig,
}

/// How to reach a webhook server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Endpoint receiving the POSTed request
    pub url: String,

    /// PEM certificates to trust instead of the platform roots, either as
    /// PEM text or base64-encoded PEM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    /// Skip TLS verification entirely; takes precedence over `ca_bundle`
    #[serde(default)]
    pub insecure: bool,
}

impl AdmissionConfig {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Save configuration to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from JSON string
    pub fn from_json(json_str: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json_str)
    }

    /// Load and validate a configuration file. `.json` files are read as
    /// JSON, everything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> AdmissionResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json(&contents).map_err(|e| {
                AdmissionError::invalid_config(format!("{}: {}", path.display(), e))
            })?
        } else {
            Self::from_toml(&contents).map_err(|e| {
                AdmissionError::invalid_config(format!("{}: {}", path.display(), e))
            })?
        };

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            webhooks = config.webhooks.len(),
            "Loaded admission configuration"
        );
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AdmissionResult<()> {
        let mut names = HashSet::new();
        for webhook in &self.webhooks {
            if !names.insert(&webhook.name) {
                return Err(AdmissionError::invalid_config(format!(
                    "Duplicate webhook name: {}",
                    webhook.name
                )));
            }
        }

        for webhook in &self.webhooks {
            webhook.validate()?;
        }

        Ok(())
    }

    /// Registrations of the given kind
    pub fn webhooks_of_kind(&self, kind: WebhookKind) -> impl Iterator<Item = &WebhookConfig> {
        self.webhooks.iter().filter(move |w| w.kind == kind)
    }

    /// A small configuration showing every field, used by `admission-check init`
    pub fn example() -> Self {
        Self {
            webhooks: vec![WebhookConfig {
                name: "cluster-policy".to_string(),
                kind: WebhookKind::Validating,
                failure_policy: FailurePolicy::Fail,
                timeout_seconds: default_timeout_seconds(),
                rules: vec![Rule::new(
                    ["applications/clusters"],
                    ["create", "update"],
                    ["v2"],
                )],
                client_config: ClientConfig {
                    url: "https://policy.example.internal/validate".to_string(),
                    ca_bundle: None,
                    insecure: false,
                },
            }],
        }
    }
}

impl WebhookConfig {
    /// Validate a single registration
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.name.trim().is_empty() {
            return Err(AdmissionError::invalid_config(
                "Webhook name cannot be empty",
            ));
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AdmissionError::invalid_config(format!(
                "Webhook '{}' timeoutSeconds must be between 1 and {}, got {}",
                self.name, MAX_TIMEOUT_SECONDS, self.timeout_seconds
            )));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.resources.is_empty() || rule.operations.is_empty() || rule.versions.is_empty()
            {
                return Err(AdmissionError::invalid_config(format!(
                    "Webhook '{}' rule {} must list resources, operations and versions \
                     (use \"*\" for any)",
                    self.name, index
                )));
            }
        }

        let url = reqwest::Url::parse(&self.client_config.url).map_err(|e| {
            AdmissionError::invalid_config(format!(
                "Webhook '{}' has an invalid url '{}': {}",
                self.name, self.client_config.url, e
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AdmissionError::invalid_config(format!(
                "Webhook '{}' url must use http or https, got '{}'",
                self.name,
                url.scheme()
            )));
        }

        self.client_config.ca_bundle_pem()?;

        Ok(())
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether malfunctions of this webhook are ignored
    pub fn ignores_errors(&self) -> bool {
        self.failure_policy == FailurePolicy::Ignore
    }
}

impl ClientConfig {
    /// The CA bundle as PEM bytes, decoding base64 when needed
    pub fn ca_bundle_pem(&self) -> AdmissionResult<Option<Vec<u8>>> {
        let bundle = match self.ca_bundle.as_deref().map(str::trim) {
            Some(bundle) if !bundle.is_empty() => bundle,
            _ => return Ok(None),
        };

        if bundle.starts_with("-----BEGIN") {
            return Ok(Some(bundle.as_bytes().to_vec()));
        }

        let compact: String = bundle.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map(Some)
            .map_err(|e| {
                AdmissionError::invalid_config(format!("caBundle is neither PEM nor base64: {}", e))
            })
    }
}

// Default value functions for serde
fn default_timeout_seconds() -> u64 {
    10
}
