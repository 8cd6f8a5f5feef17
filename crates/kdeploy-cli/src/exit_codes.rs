//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.
//! Clap reports usage errors with 2 as well, so both mean "fix the input".

/// Input error - invalid request, manifests or annotations
pub const INPUT_ERROR: i32 = 2;

/// Render error - fetching or rendering manifests failed
pub const RENDER_ERROR: i32 = 3;

/// Deploy error - apply, steady-state check or history update failed
pub const DEPLOY_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Cluster error - the Kubernetes API is unreachable or refused the request
pub const CLUSTER_ERROR: i32 = 6;
