//! CLI error types with exit code handling
//!
//! Library errors are converted into [`CliError`] so every failure renders
//! through miette with its hint as help text and maps to an exit code.

use kdeploy_core::CoreError;
use kdeploy_engine::EngineError;
use kdeploy_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid request, manifests or annotations
    #[error("Invalid input: {message}")]
    #[diagnostic(code(kdeploy::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Manifests could not be fetched or rendered
    #[error("Render error: {message}")]
    #[diagnostic(code(kdeploy::cli::render))]
    Render {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The deployment itself failed
    #[error("Deployment failed: {message}")]
    #[diagnostic(code(kdeploy::cli::deploy))]
    Deploy {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Kubernetes API unreachable or refusing requests
    #[error("Cluster error: {message}")]
    #[diagnostic(code(kdeploy::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(kdeploy::cli::io))]
    Io { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } => exit_codes::INPUT_ERROR,
            CliError::Render { .. } => exit_codes::RENDER_ERROR,
            CliError::Deploy { .. } => exit_codes::DEPLOY_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            help: Some("Check the kubeconfig and that the cluster is reachable".to_string()),
        }
    }
}

/// Message plus explanation, when the error carries one
fn describe(message: String, explanation: Option<&str>) -> String {
    match explanation {
        Some(explanation) if !explanation.is_empty() && !message.contains(explanation) => {
            format!("{message}\n{explanation}")
        }
        _ => message,
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let help = err.hint().map(String::from);
        let message = describe(err.to_string(), err.explanation());
        match err {
            CoreError::Io(_) => CliError::Io { message },
            CoreError::Spawn { .. } | CoreError::Timeout { .. } => {
                CliError::Deploy { message, help }
            }
            _ => CliError::Input { message, help },
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(core) => core.into(),
            other => CliError::Render {
                help: other.hint().map(String::from),
                message: describe(other.to_string(), other.explanation()),
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(core) => core.into(),
            KubeError::Engine(engine) => engine.into(),
            KubeError::Api(e) => CliError::cluster(e.to_string()),
            KubeError::Io(e) => e.into(),
            other => CliError::Deploy {
                help: other.hint().map(String::from),
                message: describe(other.to_string(), other.explanation()),
            },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::input(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
