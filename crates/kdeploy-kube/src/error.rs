//! Error types for kdeploy-kube

use kdeploy_core::{CoreError, HintedError};
use kdeploy_engine::EngineError;
use thiserror::Error;

/// Result type for kdeploy-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Failure carrying an operator hint and the captured CLI output
    #[error(transparent)]
    Hinted(#[from] HintedError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// History object exists but cannot be read back
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Actionable hint, when the error carries one
    pub fn hint(&self) -> Option<&str> {
        match self {
            KubeError::Hinted(e) => Some(&e.hint),
            KubeError::Core(e) => e.hint(),
            KubeError::Engine(e) => e.hint(),
            KubeError::Timeout(_) => Some("Increase the timeout or check cluster connectivity"),
            _ => None,
        }
    }

    /// Root-cause explanation, when the error carries one
    pub fn explanation(&self) -> Option<&str> {
        match self {
            KubeError::Hinted(e) => Some(&e.explanation),
            KubeError::Core(e) => e.explanation(),
            KubeError::Engine(e) => e.explanation(),
            _ => None,
        }
    }
}
