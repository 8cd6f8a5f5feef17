//! kdeploy Core - foundational types for the deployment orchestration core
//!
//! This crate provides the types shared by every other kdeploy crate:
//! - `KubernetesResource` / `KubernetesResourceId`: parsed manifest documents and their identity
//! - `ResourceCategory`: creation and deletion ordering by kind
//! - `ReleaseHistory`: ordered log of releases persisted in the cluster
//! - `CommandRunner`: external CLI execution (kubectl, oc, helm, kustomize)
//! - `ExecutionLog`: operator-facing log sink
//! - `HintedError`: structured error with hint and explanation

pub mod annotations;
pub mod config;
pub mod error;
pub mod kind;
pub mod log;
pub mod manifest;
pub mod process;
pub mod release;
pub mod resource;

pub use config::ToolPaths;
pub use error::{CoreError, HintedError, Result};
pub use kind::ResourceCategory;
pub use log::{CommandStatus, ExecutionLog, LogLevel, MemoryLog, NullLog};
pub use manifest::FileData;
pub use process::{
    CommandLine, CommandRunner, LineSink, MockRunner, OutputLine, ProcessOutput, ProcessRunner,
    RunningProcess,
};
pub use release::{Release, ReleaseHistory, ReleaseStatus};
pub use resource::{KubernetesResource, KubernetesResourceId};
