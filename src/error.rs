//! Error types for the conduit operator

use thiserror::Error;

/// Main error type for conduit operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Pipeline spec failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced secret or secret key does not exist (yet)
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    /// A secret exists but could not be turned into a credential
    #[error("secret resolution error: {0}")]
    SecretResolution(String),

    /// Collector configuration could not be synthesized from admitted pipelines
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Applying configuration or scaling collector workloads failed
    #[error("deployment error: {0}")]
    Deployment(String),

    /// An external call exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant broken (actor gone, channel closed, ...)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a secret-not-found error for the given reference
    pub fn secret_not_found(reference: impl Into<String>) -> Self {
        Self::SecretNotFound(reference.into())
    }

    /// Create a secret resolution error with the given message
    pub fn secret_resolution(msg: impl Into<String>) -> Self {
        Self::SecretResolution(msg.into())
    }

    /// Create a synthesis error with the given message
    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    /// Create a deployment error with the given message
    pub fn deployment(msg: impl Into<String>) -> Self {
        Self::Deployment(msg.into())
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout(operation.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Validation and synthesis failures are deterministic for a given input,
    /// so they surface as status conditions instead of being retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_)
            | Self::SecretNotFound(_)
            | Self::SecretResolution(_)
            | Self::Deployment(_)
            | Self::Timeout(_) => true,
            Self::Validation(_) | Self::Synthesis(_) | Self::Serialization(_) | Self::Internal(_) => {
                false
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
