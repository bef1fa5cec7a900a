use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{DiffStore, StateStore};
use super::models::ResourceState;
use crate::planner::diff::InstanceDiff;

/// In-memory state store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    resources: DashMap<String, ResourceState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub fn insert(&self, id: &str, resource: ResourceState) {
        self.resources.insert(id.to_string(), resource);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceState>> {
        Ok(self.resources.get(id).map(|r| r.value().clone()))
    }

    async fn put_resource(&self, id: &str, resource: &ResourceState) -> Result<()> {
        if resource.is_vacant() {
            self.resources.remove(id);
        } else {
            self.resources.insert(id.to_string(), resource.clone());
        }
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<(String, ResourceState)>> {
        let mut states: Vec<(String, ResourceState)> = self
            .resources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(states)
    }
}

/// In-memory diff store.
#[derive(Debug, Default)]
pub struct MemoryDiffStore {
    diffs: DashMap<String, InstanceDiff>,
}

impl MemoryDiffStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiffStore for MemoryDiffStore {
    async fn read_diff(&self, id: &str) -> Result<Option<InstanceDiff>> {
        Ok(self.diffs.get(id).map(|d| d.value().clone()))
    }

    async fn write_diff(&self, id: &str, diff: Option<&InstanceDiff>) -> Result<()> {
        match diff {
            Some(diff) => {
                self.diffs.insert(id.to_string(), diff.clone());
            }
            None => {
                self.diffs.remove(id);
            }
        }
        Ok(())
    }

    async fn list_diffs(&self) -> Result<Vec<(String, InstanceDiff)>> {
        let mut diffs: Vec<(String, InstanceDiff)> = self
            .diffs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        diffs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::InstanceState;

    fn meta() -> ResourceState {
        ResourceState::new("widget", "widget")
    }

    #[tokio::test]
    async fn write_then_read_primary() {
        let store = MemoryStateStore::new();
        let state = InstanceState::new("w-1");
        store.write_state("widget.x", &meta(), Some(&state)).await.unwrap();
        assert_eq!(store.read_state("widget.x").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn clearing_primary_drops_record() {
        let store = MemoryStateStore::new();
        store
            .write_state("widget.x", &meta(), Some(&InstanceState::new("w-1")))
            .await
            .unwrap();
        store.write_state("widget.x", &meta(), None).await.unwrap();
        assert!(store.get_resource("widget.x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn depose_and_undepose() {
        let store = MemoryStateStore::new();
        let original = InstanceState::new("old");
        store.write_state("widget.x", &meta(), Some(&original)).await.unwrap();

        assert!(store.depose("widget.x").await.unwrap());
        assert_eq!(store.read_state("widget.x").await.unwrap(), None);
        assert_eq!(store.deposed("widget.x").await.unwrap(), vec![original.clone()]);

        let failed = InstanceState::new("new");
        assert!(store.undepose("widget.x", Some(&failed)).await.unwrap());
        assert_eq!(store.read_state("widget.x").await.unwrap(), Some(original));
        assert_eq!(store.deposed("widget.x").await.unwrap(), vec![failed]);
    }

    #[tokio::test]
    async fn undepose_without_replacement_clears_slot() {
        let store = MemoryStateStore::new();
        store
            .write_state("widget.x", &meta(), Some(&InstanceState::new("old")))
            .await
            .unwrap();
        store.depose("widget.x").await.unwrap();
        store.undepose("widget.x", None).await.unwrap();
        assert!(store.deposed("widget.x").await.unwrap().is_empty());
        assert!(!store.undepose("widget.x", None).await.unwrap());
    }

    #[tokio::test]
    async fn depose_nothing_is_false() {
        let store = MemoryStateStore::new();
        assert!(!store.depose("widget.x").await.unwrap());
    }

    #[tokio::test]
    async fn diff_write_clear() {
        let store = MemoryDiffStore::new();
        let diff = InstanceDiff::destroy_only();
        store.write_diff("widget.x", Some(&diff)).await.unwrap();
        assert_eq!(store.read_diff("widget.x").await.unwrap(), Some(diff));
        store.write_diff("widget.x", None).await.unwrap();
        assert_eq!(store.read_diff("widget.x").await.unwrap(), None);
    }
}
