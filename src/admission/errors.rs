//! Error handling for the admission engine

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Result type for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Admission engine error types
#[derive(Debug)]
pub enum AdmissionError {
    /// A webhook returned a well-formed verdict with `allowed: false`
    Denied {
        webhook: String,
        reason: String,
    },

    /// The webhook answered with a non-2xx status
    UnexpectedStatus {
        webhook: String,
        status: u16,
    },

    /// Connection, TLS handshake or body read failed
    Transport {
        webhook: String,
        source: reqwest::Error,
    },

    /// The webhook did not answer within its configured timeout
    Timeout {
        webhook: String,
        duration: Duration,
    },

    /// The validation context was cancelled while the call was in flight
    Cancelled {
        webhook: String,
    },

    /// The validation context deadline passed while the call was in flight
    DeadlineExceeded {
        webhook: String,
    },

    /// The webhook answered, but without an `allowed` verdict
    MalformedResponse {
        webhook: String,
    },

    /// The webhook answered 2xx with a body that is not a JSON verdict
    InvalidResponse {
        webhook: String,
        source: serde_json::Error,
    },

    /// Request encoding failed
    Serialization(serde_json::Error),

    /// A webhook implementation panicked while reviewing a request
    WorkerPanicked {
        webhook: String,
        message: String,
    },

    /// Invalid webhook configuration
    InvalidConfiguration(String),

    /// The TLS trust configuration could not be built
    Tls {
        webhook: String,
        message: String,
    },

    /// IO error
    Io(std::io::Error),
}

impl AdmissionError {
    /// Create a denial error
    pub fn denied(webhook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Denied {
            webhook: webhook.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed_response(webhook: impl Into<String>) -> Self {
        Self::MalformedResponse {
            webhook: webhook.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a TLS configuration error
    pub fn tls(webhook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tls {
            webhook: webhook.into(),
            message: message.into(),
        }
    }

    /// Whether this error carries a webhook's explicit denial
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Whether this error reports a webhook malfunction rather than an opinion.
    ///
    /// Failure policy applies only to these.
    pub fn is_malfunction(&self) -> bool {
        !matches!(
            self,
            Self::Denied { .. } | Self::InvalidConfiguration(_) | Self::Io(_)
        )
    }

    /// Name of the webhook the error originated from, if any
    pub fn webhook(&self) -> Option<&str> {
        match self {
            Self::Denied { webhook, .. }
            | Self::UnexpectedStatus { webhook, .. }
            | Self::Transport { webhook, .. }
            | Self::Timeout { webhook, .. }
            | Self::Cancelled { webhook }
            | Self::DeadlineExceeded { webhook }
            | Self::MalformedResponse { webhook }
            | Self::InvalidResponse { webhook, .. }
            | Self::WorkerPanicked { webhook, .. }
            | Self::Tls { webhook, .. } => Some(webhook),
            Self::Serialization(_) | Self::InvalidConfiguration(_) | Self::Io(_) => None,
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied { webhook, reason } => {
                write!(f, "admission webhook '{}' denied the request: {}", webhook, reason)
            }
            Self::UnexpectedStatus { webhook, status } => write!(
                f,
                "admission webhook '{}': HTTP response not as expected (status {})",
                webhook, status
            ),
            Self::Transport { webhook, source } => {
                write!(f, "admission webhook '{}' call failed: {}", webhook, source)
            }
            Self::Timeout { webhook, duration } => {
                write!(f, "admission webhook '{}' timed out after {:?}", webhook, duration)
            }
            Self::Cancelled { webhook } => {
                write!(f, "admission webhook '{}' call was cancelled", webhook)
            }
            Self::DeadlineExceeded { webhook } => write!(
                f,
                "admission webhook '{}' call exceeded the validation deadline",
                webhook
            ),
            Self::MalformedResponse { webhook } => write!(
                f,
                "admission webhook '{}' returned a malformed response: missing 'allowed'",
                webhook
            ),
            Self::InvalidResponse { webhook, source } => write!(
                f,
                "admission webhook '{}' returned an invalid response: {}",
                webhook, source
            ),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::WorkerPanicked { webhook, message } => {
                write!(f, "admission webhook '{}' panicked: {}", webhook, message)
            }
            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::Tls { webhook, message } => write!(
                f,
                "admission webhook '{}' TLS configuration failed: {}",
                webhook, message
            ),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for AdmissionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::InvalidResponse { source, .. } => Some(source),
            Self::Serialization(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

impl From<std::io::Error> for AdmissionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}
