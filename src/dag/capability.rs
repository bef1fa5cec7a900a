//! The questions graph construction asks of a node, one trait per concern.

use std::sync::Arc;

use crate::config::types::ResourceConfig;
use crate::state::models::ResourceState;

use super::node::NodeError;

/// A vertex in the dependency graph.
pub trait GraphNode {
    /// Display name, unique within a graph.
    fn name(&self) -> String;
}

/// Nodes that live inside a module.
pub trait SubPath {
    fn path(&self) -> &[String];
}

/// Nodes other nodes can depend on by name.
pub trait Referenceable {
    fn referenceable_names(&self) -> Vec<String>;
}

/// Nodes that depend on other nodes by name.
pub trait Referencer {
    fn references(&self) -> Vec<String>;
}

pub trait ProviderConsumer {
    /// The provider identity this node needs.
    fn provided_by(&self) -> String;
}

pub trait ProvisionerConsumer {
    /// Provisioner types in declaration order, duplicates kept.
    fn provisioned_by(&self) -> Vec<String>;
}

pub trait AttachResourceConfig {
    fn attach_resource_config(&mut self, config: Arc<ResourceConfig>) -> Result<(), NodeError>;
}

pub trait AttachResourceState {
    fn attach_resource_state(&mut self, state: Arc<ResourceState>) -> Result<(), NodeError>;
}
