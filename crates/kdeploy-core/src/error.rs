//! Core error types

use std::time::Duration;

use thiserror::Error;

/// Boxed error used as the cause of a [`HintedError`]
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error enriched with an actionable hint and an explanation of the root cause
///
/// `message` is the short summary shown first, `hint` tells the operator what to
/// try, `explanation` carries the details (usually the captured CLI output).
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HintedError {
    pub message: String,
    pub hint: String,
    pub explanation: String,
    #[source]
    pub cause: Option<BoxedCause>,
}

impl HintedError {
    pub fn new(
        message: impl Into<String>,
        hint: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            hint: hint.into(),
            explanation: explanation.into(),
            cause: None,
        }
    }

    /// Attach the underlying error
    pub fn with_cause(mut self, cause: impl Into<BoxedCause>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Hinted(#[from] HintedError),

    #[error("Invalid argument(s): {argument}: {message}")]
    InvalidArguments { argument: String, message: String },

    #[error("Invalid values file: {reason}")]
    InvalidValues { reason: String },

    #[error("Release {number} already exists in release history")]
    DuplicateRelease { number: u32 },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unsupported {what}: [{value}]")]
    Unsupported { what: String, value: String },

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Actionable hint, when the error carries one
    pub fn hint(&self) -> Option<&str> {
        match self {
            CoreError::Hinted(e) => Some(&e.hint),
            CoreError::InvalidArguments { .. } => {
                Some("Add the missing annotation or argument and run the deployment again")
            }
            CoreError::InvalidValues { .. } => Some("Fix the YAML syntax of the values file"),
            CoreError::Timeout { .. } => Some("Increase the timeout or check cluster connectivity"),
            _ => None,
        }
    }

    /// Root-cause explanation, when the error carries one
    pub fn explanation(&self) -> Option<&str> {
        match self {
            CoreError::Hinted(e) => Some(&e.explanation),
            _ => None,
        }
    }

    /// Check if this error came from a command that exceeded its time limit
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
