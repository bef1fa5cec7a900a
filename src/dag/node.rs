use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use super::capability::{
    AttachResourceConfig, AttachResourceState, GraphNode, ProviderConsumer, ProvisionerConsumer,
    Referenceable, Referencer, SubPath,
};
use crate::config::address::ResourceAddress;
use crate::config::types::ResourceConfig;
use crate::executor::error::ApplyError;
use crate::executor::pipeline::ApplyPipeline;
use crate::interpolate::Interpolator;
use crate::provider::resource_provider;
use crate::state::models::ResourceState;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("{address}: resource {what} is already attached")]
    AlreadyAttached {
        address: String,
        what: &'static str,
    },
}

/// A resource instance that can be applied.
///
/// Built in two phases: an address-only skeleton first, then enriched with
/// its configuration and/or recorded state once those are known.
#[derive(Clone)]
pub struct ApplyableResource {
    address: ResourceAddress,
    config: Option<Arc<ResourceConfig>>,
    state: Option<Arc<ResourceState>>,
    interpolator: Arc<dyn Interpolator>,
}

impl std::fmt::Debug for ApplyableResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyableResource")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ApplyableResource {
    pub fn new(address: ResourceAddress, interpolator: Arc<dyn Interpolator>) -> Self {
        Self {
            address,
            config: None,
            state: None,
            interpolator,
        }
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    pub fn config(&self) -> Option<&Arc<ResourceConfig>> {
        self.config.as_ref()
    }

    pub fn state(&self) -> Option<&Arc<ResourceState>> {
        self.state.as_ref()
    }

    /// The dependency list recorded into state when this resource is written:
    /// `depends_on` plus references in `count` and the attributes, sorted.
    pub fn state_dependencies(&self) -> Vec<String> {
        let Some(config) = &self.config else {
            return self
                .state
                .as_ref()
                .map(|s| s.dependencies.clone())
                .unwrap_or_default();
        };

        let mut deps: BTreeSet<String> = config.depends_on.iter().cloned().collect();
        if let Some(count) = &config.count {
            deps.extend(self.interpolator.references(count));
        }
        deps.extend(self.interpolator.config_references(&config.attributes));
        deps.into_iter().collect()
    }

    /// Build the apply pipeline for this instance. Requires configuration.
    pub fn apply_pipeline(&self) -> Result<ApplyPipeline, ApplyError> {
        let Some(config) = &self.config else {
            return Err(ApplyError::MissingConfig {
                address: self.address.to_string(),
            });
        };
        Ok(ApplyPipeline::new(
            self.address.clone(),
            Arc::clone(config),
            self.provided_by(),
            self.state_dependencies(),
            Arc::clone(&self.interpolator),
        ))
    }
}

impl GraphNode for ApplyableResource {
    fn name(&self) -> String {
        self.address.to_string()
    }
}

impl SubPath for ApplyableResource {
    fn path(&self) -> &[String] {
        self.address.path()
    }
}

impl Referenceable for ApplyableResource {
    fn referenceable_names(&self) -> Vec<String> {
        self.config.iter().map(|c| c.id()).collect()
    }
}

impl Referencer for ApplyableResource {
    fn references(&self) -> Vec<String> {
        let Some(config) = &self.config else {
            return self
                .state
                .as_ref()
                .map(|s| s.dependencies.clone())
                .unwrap_or_default();
        };

        let mut refs = config.depends_on.clone();
        if let Some(count) = &config.count {
            refs.extend(self.interpolator.references(count));
        }
        refs.extend(self.interpolator.config_references(&config.attributes));
        for provisioner in &config.provisioners {
            refs.extend(self.interpolator.config_references(&provisioner.connection));
            refs.extend(self.interpolator.config_references(&provisioner.config));
        }

        let mut seen = HashSet::new();
        refs.retain(|r| seen.insert(r.clone()));
        refs
    }
}

impl ProviderConsumer for ApplyableResource {
    fn provided_by(&self) -> String {
        if let Some(config) = &self.config {
            return resource_provider(&config.resource_type, config.provider.as_deref());
        }
        if let Some(state) = self.state.as_ref().filter(|s| !s.provider.is_empty()) {
            return state.provider.clone();
        }
        resource_provider(self.address.resource_type(), None)
    }
}

impl ProvisionerConsumer for ApplyableResource {
    fn provisioned_by(&self) -> Vec<String> {
        self.config
            .iter()
            .flat_map(|c| c.provisioners.iter().map(|p| p.provisioner_type.clone()))
            .collect()
    }
}

impl AttachResourceConfig for ApplyableResource {
    fn attach_resource_config(&mut self, config: Arc<ResourceConfig>) -> Result<(), NodeError> {
        if self.config.is_some() {
            return Err(NodeError::AlreadyAttached {
                address: self.address.to_string(),
                what: "configuration",
            });
        }
        self.config = Some(config);
        Ok(())
    }
}

impl AttachResourceState for ApplyableResource {
    fn attach_resource_state(&mut self, state: Arc<ResourceState>) -> Result<(), NodeError> {
        if self.state.is_some() {
            return Err(NodeError::AlreadyAttached {
                address: self.address.to_string(),
                what: "state",
            });
        }
        self.state = Some(state);
        Ok(())
    }
}
