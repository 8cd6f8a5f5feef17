//! Annotation and label keys read or written by kdeploy

use std::collections::BTreeMap;
use std::time::Duration;

/// kdeploy-native annotations
pub mod kdeploy {
    /// Expression evaluated against the JSON of a custom resource to decide steady state
    pub const STEADY_STATE_CONDITION: &str = "kdeploy.io/steadyStateCondition";
    /// Marks a custom resource as a workload whose steady state must be checked
    pub const MANAGED_WORKLOAD: &str = "kdeploy.io/managed-workload";
    /// Never prune this resource, even when it disappears from the manifests
    pub const SKIP_PRUNING: &str = "kdeploy.io/skip-pruning";
    /// Opt a ConfigMap or Secret out of versioning
    pub const SKIP_VERSIONING: &str = "kdeploy.io/skip-versioning";
    /// Apply the resource as-is, without workload handling
    pub const DIRECT_APPLY: &str = "kdeploy.io/direct-apply";
}

/// Upstream Kubernetes annotations
pub mod kubernetes {
    /// Set by `kubectl apply --record`
    pub const CHANGE_CAUSE: &str = "kubernetes.io/change-cause";
}

/// Pod labels used for release/track/color selection
pub mod labels {
    pub const RELEASE: &str = "release";
    pub const TRACK: &str = "kdeploy.io/track";
    pub const COLOR: &str = "kdeploy.io/color";
}

/// First-line marker of a manifest file that must not be applied
pub const SKIP_FILE_MARKER: &str = "# kdeploy:skip-file";

/// Default deployment timeout when none (or a non-positive one) is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Check whether a boolean annotation is set to `true` (case-insensitive)
pub fn is_true(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations
        .get(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Convert a timeout in minutes to a duration, defaulting when missing or non-positive
pub fn timeout_from_minutes(minutes: Option<i64>) -> Duration {
    match minutes {
        Some(m) if m > 0 => Duration::from_secs((m as u64).saturating_mul(60)),
        _ => DEFAULT_TIMEOUT,
    }
}

/// Parse a CLI duration: plain seconds (`90`) or unit-suffixed parts
/// (`500ms`, `30s`, `5m`, `1h`, `1h30m`)
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}
