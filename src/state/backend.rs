use anyhow::Result;
use async_trait::async_trait;

use super::models::{InstanceState, ResourceState};
use crate::planner::diff::InstanceDiff;

/// Where a resource's persisted state is written.
///
/// Implementations serialize concurrent access; each state id is only touched
/// by one node per run.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the full record for a state id.
    async fn get_resource(&self, id: &str) -> Result<Option<ResourceState>>;

    /// Replace the full record for a state id. A vacant record removes the entry.
    async fn put_resource(&self, id: &str, resource: &ResourceState) -> Result<()>;

    /// List every recorded state id with its record, ordered by id.
    async fn list_states(&self) -> Result<Vec<(String, ResourceState)>>;

    // ─── Provided operations ────────────────────────────────────────────────

    /// The primary instance for a state id.
    async fn read_state(&self, id: &str) -> Result<Option<InstanceState>> {
        Ok(self.get_resource(id).await?.and_then(|r| r.primary))
    }

    /// Write the primary instance, together with the resource metadata.
    /// `None` (or an instance without an id) clears the primary.
    async fn write_state(
        &self,
        id: &str,
        meta: &ResourceState,
        state: Option<&InstanceState>,
    ) -> Result<()> {
        let mut resource = self.get_resource(id).await?.unwrap_or_default();
        resource.resource_type = meta.resource_type.clone();
        resource.provider = meta.provider.clone();
        resource.dependencies = meta.dependencies.clone();
        resource.primary = state.filter(|s| !s.is_empty()).cloned();
        self.put_resource(id, &resource).await
    }

    /// Move the primary instance aside. Returns false when there was nothing to depose.
    async fn depose(&self, id: &str) -> Result<bool> {
        let Some(mut resource) = self.get_resource(id).await? else {
            return Ok(false);
        };
        let Some(primary) = resource.primary.take() else {
            return Ok(false);
        };
        resource.deposed.push(primary);
        self.put_resource(id, &resource).await?;
        Ok(true)
    }

    /// Restore the most recently deposed instance as primary.
    ///
    /// `replacement` is the instance that failed to take its place; when it
    /// exists it takes over the deposed slot so it stays tracked, otherwise the
    /// slot is cleared. Returns false when nothing was deposed.
    async fn undepose(&self, id: &str, replacement: Option<&InstanceState>) -> Result<bool> {
        let Some(mut resource) = self.get_resource(id).await? else {
            return Ok(false);
        };
        let Some(restored) = resource.deposed.pop() else {
            return Ok(false);
        };
        resource.primary = Some(restored);
        if let Some(failed) = replacement.filter(|s| !s.is_empty()) {
            resource.deposed.push(failed.clone());
        }
        self.put_resource(id, &resource).await?;
        Ok(true)
    }

    /// Instances currently deposed for a state id, oldest first.
    async fn deposed(&self, id: &str) -> Result<Vec<InstanceState>> {
        Ok(self
            .get_resource(id)
            .await?
            .map(|r| r.deposed)
            .unwrap_or_default())
    }
}

/// Where planned diffs wait to be applied.
#[async_trait]
pub trait DiffStore: Send + Sync {
    /// Read the diff saved for a state id.
    async fn read_diff(&self, id: &str) -> Result<Option<InstanceDiff>>;

    /// Save a diff; `None` clears it.
    async fn write_diff(&self, id: &str, diff: Option<&InstanceDiff>) -> Result<()>;

    /// Every pending diff, ordered by state id.
    async fn list_diffs(&self) -> Result<Vec<(String, InstanceDiff)>>;
}
