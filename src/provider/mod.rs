//! Provider and provisioner contracts, and the registries the pipeline resolves them from.

pub mod builtin;
pub mod local_exec;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::types::ResolvedConfig;
use crate::planner::diff::InstanceDiff;
use crate::state::models::InstanceState;

/// Minimal description of the instance being operated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// State id, e.g. "null_resource.web.0".
    pub id: String,
    pub module_path: Vec<String>,
    pub resource_type: String,
}

/// Result of validating a resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            warnings: vec![],
            errors: vec![msg.into()],
        }
    }
}

/// What a provider reports back from an apply.
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// The instance after apply; `None` (or an empty id) means nothing exists.
    pub state: Option<InstanceState>,
    /// A new underlying instance was created.
    pub create_new: bool,
    pub error: Option<anyhow::Error>,
}

/// Performs create/read/update operations against a real system.
///
/// Handles are shared between concurrently running nodes.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn validate_resource(&self, resource_type: &str, config: &ResolvedConfig) -> Validation;

    async fn diff(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        config: &ResolvedConfig,
    ) -> Result<Option<InstanceDiff>>;

    async fn apply(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> ApplyResult;
}

/// A post-creation action run against a new instance.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        info: &InstanceInfo,
        state: &InstanceState,
        config: &ResolvedConfig,
        connection: &ResolvedConfig,
    ) -> Result<()>;
}

/// Named plugin handles. Lookups take the read lock, so concurrent nodes never
/// wait on each other; a handle is cloned out and the lock released immediately.
pub struct Registry<T: ?Sized> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str, handle: Arc<T>) {
        self.entries.write().await.insert(name.to_string(), handle);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }
}

pub type ProviderRegistry = Registry<dyn ResourceProvider>;
pub type ProvisionerRegistry = Registry<dyn Provisioner>;

/// Default provider name for a resource type: the prefix before the first `_`,
/// or the whole type when it has none. An alias always wins.
pub fn resource_provider(resource_type: &str, alias: Option<&str>) -> String {
    if let Some(alias) = alias.filter(|a| !a.is_empty()) {
        return alias.to_string();
    }
    match resource_type.split_once('_') {
        Some((prefix, _)) => prefix.to_string(),
        None => resource_type.to_string(),
    }
}
