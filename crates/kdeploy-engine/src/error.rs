//! Engine error types

use kdeploy_core::{CoreError, HintedError};
use thiserror::Error;

/// Errors raised while fetching, rendering or evaluating expressions
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Hinted(#[from] HintedError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A rendering tool exited non-zero
    #[error("{message}")]
    RenderFailed {
        message: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Unsupported {what}: [{value}]")]
    Unsupported { what: String, value: String },

    #[error("Unable to find one of 'kustomization.yaml' or 'kustomization.yml' in directory {path}")]
    KustomizationNotFound { path: String },

    #[error("Failed to fetch manifests from {store}: {message}")]
    Fetch { store: String, message: String },

    #[error("Invalid expression `{expression}`: {message}")]
    Expression { expression: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn hint(&self) -> Option<&str> {
        match self {
            EngineError::Hinted(e) => Some(&e.hint),
            EngineError::Core(e) => e.hint(),
            EngineError::RenderFailed { .. } => {
                Some("Check the manifests and values overrides render locally with the same tool")
            }
            EngineError::KustomizationNotFound { .. } => {
                Some("Point the kustomize directory at a folder containing kustomization.yaml")
            }
            EngineError::Expression { .. } => {
                Some("Steady state conditions look like ${response.status.ready == true}")
            }
            _ => None,
        }
    }

    pub fn explanation(&self) -> Option<&str> {
        match self {
            EngineError::Hinted(e) => Some(&e.explanation),
            EngineError::Core(e) => e.explanation(),
            EngineError::RenderFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
