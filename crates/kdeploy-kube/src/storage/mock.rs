//! In-memory history store for testing
//!
//! Keeps histories in memory, useful for unit tests without requiring a
//! Kubernetes cluster.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use kdeploy_core::{KubernetesResourceId, ReleaseHistory};

use super::ReleaseHistoryStore;
use crate::error::{KubeError, Result};

/// In-memory history store for testing
#[derive(Clone)]
pub struct MockHistoryStore {
    namespace: String,
    /// release name -> (history, stored as secret)
    store: Arc<RwLock<HashMap<String, (ReleaseHistory, bool)>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    fail_saves: Arc<RwLock<bool>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub loads: usize,
    pub saves: usize,
    pub deletes: usize,
}

impl MockHistoryStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            store: Arc::new(RwLock::new(HashMap::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
            fail_saves: Arc::new(RwLock::new(false)),
        }
    }

    /// Pre-populate the history of a release
    pub fn with_history(self, release_name: &str, history: ReleaseHistory) -> Self {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(release_name.to_string(), (history, true));
        self
    }

    /// Make every subsequent save fail
    pub fn fail_saves(&self) {
        *self.fail_saves.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last saved history of a release
    pub fn history(&self, release_name: &str) -> Option<ReleaseHistory> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(release_name)
            .map(|(history, _)| history.clone())
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.write().unwrap_or_else(PoisonError::into_inner));
    }
}

#[async_trait]
impl ReleaseHistoryStore for MockHistoryStore {
    async fn load(&self, release_name: &str) -> Result<ReleaseHistory> {
        self.count(|ops| ops.loads += 1);
        Ok(self.history(release_name).unwrap_or_default())
    }

    async fn save(
        &self,
        release_name: &str,
        history: &ReleaseHistory,
        prefer_secret: bool,
    ) -> Result<()> {
        self.count(|ops| ops.saves += 1);
        if *self.fail_saves.read().unwrap_or_else(PoisonError::into_inner) {
            return Err(KubeError::Storage("history store unavailable".to_string()));
        }
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(release_name.to_string(), (history.clone(), prefer_secret));
        Ok(())
    }

    async fn history_objects(&self, release_name: &str) -> Result<Vec<KubernetesResourceId>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store
            .get(release_name)
            .map(|(_, secret)| {
                let kind = if *secret { "Secret" } else { "ConfigMap" };
                KubernetesResourceId::new(kind, release_name, &self.namespace)
            })
            .into_iter()
            .collect())
    }

    async fn delete(&self, release_name: &str) -> Result<()> {
        self.count(|ops| ops.deletes += 1);
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(release_name);
        Ok(())
    }
}
