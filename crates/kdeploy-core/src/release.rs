//! Release history model
//!
//! A [`ReleaseHistory`] is the ordered log of every deployment of a release
//! name. It is what pruning and failure cleanup compute their delete sets
//! from, so release numbers are unique and strictly increasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::resource::{KubernetesResource, KubernetesResourceId};

/// Current release history format
pub const HISTORY_VERSION: &str = "v1";

/// Outcome of a release
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReleaseStatus {
    #[default]
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// One deployment of a release name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub number: u32,

    pub status: ReleaseStatus,

    /// Ids of every resource applied by this release
    #[serde(default)]
    pub resources: Vec<KubernetesResourceId>,

    /// Full resources as applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_with_spec: Vec<KubernetesResource>,

    /// SHA-256 of the applied manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Release {
    pub fn new(number: u32, status: ReleaseStatus) -> Self {
        Self {
            number,
            status,
            resources: Vec::new(),
            resources_with_spec: Vec::new(),
            manifest_hash: None,
            created_at: Some(Utc::now()),
        }
    }

    /// Builder-style setter for the resource ids
    pub fn with_resources(mut self, resources: Vec<KubernetesResourceId>) -> Self {
        self.resources = resources;
        self
    }

    /// Record the applied resources, their ids and the manifest hash
    pub fn record_resources(&mut self, resources: &[KubernetesResource]) {
        self.resources = resources.iter().map(|r| r.resource_id.clone()).collect();
        self.resources_with_spec = resources.to_vec();
        self.manifest_hash = Some(manifest_hash(resources));
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ReleaseStatus::Succeeded
    }

    /// Versioned resource ids of this release
    pub fn versioned_resources(&self) -> impl Iterator<Item = &KubernetesResourceId> {
        self.resources.iter().filter(|id| id.versioned)
    }
}

/// SHA-256 over the specs of the given resources, hex encoded
pub fn manifest_hash(resources: &[KubernetesResource]) -> String {
    let mut hasher = Sha256::new();
    for resource in resources {
        hasher.update(resource.spec.as_bytes());
        hasher.update(b"\n---\n");
    }
    hex::encode(hasher.finalize())
}

/// Ordered log of releases, newest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseHistory {
    pub version: String,
    #[serde(default)]
    pub releases: Vec<Release>,
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.status == other.status
            && self.resources == other.resources
            && self.manifest_hash == other.manifest_hash
    }
}

impl Default for ReleaseHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseHistory {
    pub fn new() -> Self {
        Self {
            version: HISTORY_VERSION.to_string(),
            releases: Vec::new(),
        }
    }

    /// Parse stored YAML; blank input is an empty history
    ///
    /// Releases are sorted newest first. A release number stored twice is
    /// rejected.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let mut history: Self = serde_yaml::from_str(yaml)?;
        history.releases.sort_by(|a, b| b.number.cmp(&a.number));
        if let Some(pair) = history
            .releases
            .windows(2)
            .find(|pair| pair[0].number == pair[1].number)
        {
            return Err(CoreError::DuplicateRelease {
                number: pair[0].number,
            });
        }
        Ok(history)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    fn max_number(&self) -> u32 {
        self.releases.iter().map(|r| r.number).max().unwrap_or(0)
    }

    /// Allocate the next release number and insert an in-progress release
    pub fn create_new_release(&mut self) -> &mut Release {
        let release = Release::new(self.max_number() + 1, ReleaseStatus::InProgress);
        self.releases.insert(0, release);
        &mut self.releases[0]
    }

    /// Insert an existing release, keeping newest-first order
    pub fn add_release(&mut self, release: Release) -> Result<()> {
        if self.release(release.number).is_some() {
            return Err(CoreError::DuplicateRelease {
                number: release.number,
            });
        }
        let position = self
            .releases
            .iter()
            .position(|r| r.number < release.number)
            .unwrap_or(self.releases.len());
        self.releases.insert(position, release);
        Ok(())
    }

    pub fn latest_release(&self) -> Option<&Release> {
        self.releases.first()
    }

    pub fn latest_release_mut(&mut self) -> Option<&mut Release> {
        self.releases.first_mut()
    }

    /// Set the status of the newest release; no-op on an empty history
    pub fn set_latest_status(&mut self, status: ReleaseStatus) {
        if let Some(release) = self.latest_release_mut() {
            release.status = status;
        }
    }

    pub fn release(&self, number: u32) -> Option<&Release> {
        self.releases.iter().find(|r| r.number == number)
    }

    /// Highest-numbered succeeded release
    pub fn last_successful_release(&self) -> Option<&Release> {
        self.releases
            .iter()
            .filter(|r| r.is_succeeded())
            .max_by_key(|r| r.number)
    }

    pub fn retain(&mut self, keep: impl FnMut(&Release) -> bool) {
        self.releases.retain(keep);
    }

    pub fn remove(&mut self, number: u32) -> Option<Release> {
        let index = self.releases.iter().position(|r| r.number == number)?;
        Some(self.releases.remove(index))
    }
}
