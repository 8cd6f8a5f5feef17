//! kdeploy Engine - manifest acquisition and rendering
//!
//! This crate turns a manifest source into plain Kubernetes YAML:
//! - `ManifestFetcher`: fetches raw files through pluggable `FileProvider`s
//! - `Renderer`: go-template, Helm, Kustomize and OpenShift template rendering
//! - `ExpressionEvaluator`: `${...}` steady-state condition expressions

pub mod config;
pub mod error;
pub mod expression;
pub mod fetch;
pub mod render;
pub mod values;

pub use config::{HelmVersion, ManifestDelegateConfig, StoreDelegateConfig, StoreType};
pub use error::{EngineError, Result};
pub use expression::ExpressionEvaluator;
pub use fetch::{FileProvider, LocalDirectoryProvider, ManifestFetcher};
pub use render::{RenderContext, Renderer, render_template, renderer_for};
