//! Operator hints and explanations attached to structured errors

use kdeploy_core::{CommandLine, HintedError, ProcessOutput};

pub const APPLY_FAILED: &str = "Apply manifest failed";
pub const APPLY_FAILED_HINT: &str =
    "Check the rendered manifests and the kubectl output below, then deploy again";

pub const DRY_RUN_FAILED: &str = "Dry run of manifests failed";
pub const DRY_RUN_FAILED_HINT: &str =
    "The manifests were rejected client-side. Fix the reported fields before applying";

pub const STEADY_STATE_FAILED: &str = "Resources did not reach steady state";
pub const STEADY_STATE_FAILED_HINT: &str =
    "Check the events above and `kubectl describe` the failing workload";

pub const CUSTOM_RESOURCE_FAILED: &str = "Failed to execute the status check of the custom resources";
pub const CRD_CONDITION_WRONG: &str = "The steady check condition is wrong";
pub const CONTROLLER_NOT_RUNNING: &str = "The custom controller is not running";

pub const JOB_FAILED: &str = "Job execution failed";
pub const JOB_FAILED_HINT: &str = "Inspect the job pods with `kubectl logs` to find the cause";

pub const SCALE_FAILED_HINT: &str = "Check that the workload exists and the user may scale it";

/// Failed process, formatted as the explanation every CLI failure carries
pub fn process_failure(command: &CommandLine, output: &ProcessOutput) -> String {
    format!(
        "Command [{}] exited with value [{}] and output: [{}]",
        command.printable(),
        output.exit_code,
        output.combined()
    )
}

pub fn apply_failed(command: &CommandLine, output: &ProcessOutput) -> HintedError {
    HintedError::new(APPLY_FAILED, APPLY_FAILED_HINT, process_failure(command, output))
}

pub fn dry_run_failed(command: &CommandLine, output: &ProcessOutput) -> HintedError {
    HintedError::new(DRY_RUN_FAILED, DRY_RUN_FAILED_HINT, process_failure(command, output))
}

pub fn steady_state_failed(namespace: &str, detail: impl Into<String>) -> HintedError {
    HintedError::new(
        format!("{STEADY_STATE_FAILED} in namespace [{namespace}]"),
        STEADY_STATE_FAILED_HINT,
        detail,
    )
}

pub fn custom_resource_failed(condition: &str, detail: impl Into<String>) -> HintedError {
    HintedError::new(
        CUSTOM_RESOURCE_FAILED,
        format!("1. {CRD_CONDITION_WRONG}: [{condition}]\n2. {CONTROLLER_NOT_RUNNING}"),
        detail,
    )
}

pub fn job_failed(job_name: &str, detail: impl Into<String>) -> HintedError {
    HintedError::new(format!("{JOB_FAILED}: {job_name}"), JOB_FAILED_HINT, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failure_quotes_output() {
        let command = CommandLine::new("/usr/bin/kubectl").args(["apply", "-f", "manifests.yaml"]);
        let output = ProcessOutput::failure(1, "error: unknown field \"replica\"\n");
        insta::assert_snapshot!(
            process_failure(&command, &output),
            @r#"Command [kubectl apply -f manifests.yaml] exited with value [1] and output: [error: unknown field "replica"]"#
        );
    }

    #[test]
    fn test_custom_resource_hint_names_both_reasons() {
        let err = custom_resource_failed("${response.status.ready}", "timed out");
        assert!(err.hint.contains(CRD_CONDITION_WRONG));
        assert!(err.hint.contains("${response.status.ready}"));
        assert!(err.hint.contains(CONTROLLER_NOT_RUNNING));
        assert_eq!(err.explanation, "timed out");
    }
}
