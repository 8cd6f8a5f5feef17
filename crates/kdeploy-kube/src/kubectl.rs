//! kubectl / oc command builders
//!
//! Every cluster operation is a CLI invocation built here, so the exact
//! argument layout lives in one place and is covered by snapshot tests.

use std::path::{Path, PathBuf};

use kdeploy_core::{CommandLine, KubernetesResource, KubernetesResourceId, ToolPaths};

/// Columns printed by the event watchers
pub const EVENT_OUTPUT_FORMAT: &str = "custom-columns=KIND:involvedObject.kind,NAME:.involvedObject.name,NAMESPACE:.involvedObject.namespace,MESSAGE:.message,REASON:.reason";

/// Kinds only the OpenShift client can apply
const OPENSHIFT_ONLY_KINDS: &[&str] = &["Route"];

/// Builder for kubectl-compatible command lines
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    kubeconfig: Option<String>,
    working_dir: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            program: tools.kubectl.clone(),
            kubeconfig: tools.kubeconfig_arg(),
            working_dir: None,
        }
    }

    /// The `oc` client, with the same kubeconfig
    pub fn oc(tools: &ToolPaths) -> Self {
        Self {
            program: tools.oc.clone(),
            ..Self::new(tools)
        }
    }

    /// `oc` when any resource is an OpenShift-only kind, `kubectl` otherwise
    pub fn for_resources(tools: &ToolPaths, resources: &[KubernetesResource]) -> Self {
        if resources
            .iter()
            .any(|r| OPENSHIFT_ONLY_KINDS.contains(&r.kind()))
        {
            Self::oc(tools)
        } else {
            Self::new(tools)
        }
    }

    /// Run every command from this directory
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> CommandLine {
        let mut command = CommandLine::new(&self.program);
        if let Some(kubeconfig) = &self.kubeconfig {
            command = command.arg(kubeconfig);
        }
        if let Some(dir) = &self.working_dir {
            command = command.current_dir(dir);
        }
        command
    }

    pub fn apply(&self, file: &str, record: bool) -> CommandLine {
        let command = self.command().args(["apply", "-f", file]);
        if record { command.arg("--record") } else { command }
    }

    pub fn apply_dry_run(&self, file: &str, use_new_kubectl: bool) -> CommandLine {
        let flag = if use_new_kubectl {
            "--dry-run=client"
        } else {
            "--dry-run"
        };
        self.command().args(["apply", "-f", file, flag])
    }

    pub fn delete_file(&self, file: &str) -> CommandLine {
        self.command().args(["delete", "-f", file])
    }

    pub fn describe_file(&self, file: &str) -> CommandLine {
        self.command().args(["describe", "-f", file])
    }

    pub fn delete(&self, id: &KubernetesResourceId) -> CommandLine {
        with_namespace(self.command().args(["delete", &id.kind_name_ref()]), &id.namespace)
    }

    pub fn scale(&self, id: &KubernetesResourceId, replicas: u32) -> CommandLine {
        with_namespace(
            self.command()
                .args(["scale", &id.kind_name_ref()])
                .arg(format!("--replicas={replicas}")),
            &id.namespace,
        )
    }

    pub fn get_json(&self, id: &KubernetesResourceId) -> CommandLine {
        with_namespace(self.command().args(["get", &id.kind_name_ref()]), &id.namespace)
            .args(["-o", "json"])
    }

    /// `get kind/name -o jsonpath=<path>`; the path is passed through verbatim
    pub fn get_jsonpath(&self, id: &KubernetesResourceId, jsonpath: &str) -> CommandLine {
        with_namespace(self.command().args(["get", &id.kind_name_ref()]), &id.namespace)
            .args(["-o", &format!("jsonpath={jsonpath}")])
    }

    pub fn rollout_status(&self, id: &KubernetesResourceId) -> CommandLine {
        with_namespace(
            self.command().args(["rollout", "status", &id.kind_name_ref()]),
            &id.namespace,
        )
        .arg("--watch=true")
    }

    pub fn rollout_history(&self, id: &KubernetesResourceId) -> CommandLine {
        with_namespace(
            self.command().args(["rollout", "history", &id.kind_name_ref()]),
            &id.namespace,
        )
    }

    /// Long-running event stream for one namespace
    pub fn watch_events(&self, namespace: &str) -> CommandLine {
        with_namespace(self.command().args(["get", "events"]), namespace)
            .arg(format!("--output={EVENT_OUTPUT_FORMAT}"))
            .arg("--watch-only")
    }

    /// `get jobs <name> --output=jsonpath='<path>'`
    ///
    /// The single quotes reach kubectl verbatim and come back in the output.
    pub fn job_jsonpath(&self, name: &str, namespace: &str, jsonpath: &str) -> CommandLine {
        with_namespace(self.command().args(["get", "jobs", name]), namespace)
            .arg(format!("--output=jsonpath='{jsonpath}'"))
    }
}

fn with_namespace(command: CommandLine, namespace: &str) -> CommandLine {
    if namespace.is_empty() {
        command
    } else {
        command.arg(format!("--namespace={namespace}"))
    }
}

/// Latest revision number in `rollout history` output
///
/// The last non-blank line starts with the revision, separated by spaces for
/// kubectl and by a tab for oc.
pub fn parse_latest_revision(output: &str) -> Option<String> {
    let last = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let revision = last.split_whitespace().next()?;
    revision
        .chars()
        .all(|c| c.is_ascii_digit())
        .then(|| revision.to_string())
}
