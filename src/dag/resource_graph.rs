use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};

use super::capability::{
    AttachResourceConfig, AttachResourceState, GraphNode, ProviderConsumer, ProvisionerConsumer,
    Referenceable, Referencer,
};
use super::node::ApplyableResource;
use crate::config::address::{ResourceAddress, NO_INDEX};
use crate::config::types::{ResourceConfig, WorkspaceConfig};
use crate::interpolate::{Interpolator, Resource, Scope};
use crate::state::models::ResourceState;

/// Upper bound on `count`; larger values are almost certainly a typo.
const MAX_COUNT: u64 = 10_000;

/// The type of dependency between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyEdge {
    /// Explicitly declared via `depends_on`.
    Explicit,
    /// Inferred from expression references (e.g. `null_resource.base.id`).
    Implicit,
}

/// A resource-instance dependency graph. Edges point from a dependency to its dependent.
pub type ResourceGraph = DiGraph<ApplyableResource, DependencyEdge>;

/// One node per resource instance: every `count` index of every configured
/// resource, plus recorded instances that no longer have configuration.
///
/// Each node is enriched with its configuration and with its recorded state
/// when the store has one.
pub fn expand_nodes(
    workspace: &WorkspaceConfig,
    recorded: &[(String, ResourceState)],
    interpolator: Arc<dyn Interpolator>,
) -> Result<Vec<ApplyableResource>> {
    let mut states: HashMap<&str, Arc<ResourceState>> = recorded
        .iter()
        .map(|(id, state)| (id.as_str(), Arc::new(state.clone())))
        .collect();
    let mut nodes = Vec::new();

    for resource in &workspace.resources {
        let config = Arc::new(resource.clone());
        let indices = match evaluate_count(resource, interpolator.as_ref())? {
            Some(count) => 0..count as i64,
            None => NO_INDEX..NO_INDEX + 1,
        };

        for index in indices {
            let address =
                ResourceAddress::new(&resource.resource_type, &resource.name).with_index(index);
            let mut node = ApplyableResource::new(address.clone(), Arc::clone(&interpolator));
            node.attach_resource_config(Arc::clone(&config))?;
            if let Some(state) = states.remove(address.state_id().as_str()) {
                node.attach_resource_state(state)?;
            }
            nodes.push(node);
        }
    }

    let mut orphans: Vec<(&str, Arc<ResourceState>)> = states.into_iter().collect();
    orphans.sort_by(|a, b| a.0.cmp(b.0));
    for (id, state) in orphans {
        let Some(address) = ResourceAddress::from_state_id(id) else {
            tracing::warn!(id = id, "Ignoring state entry with malformed id");
            continue;
        };
        let mut node = ApplyableResource::new(address, Arc::clone(&interpolator));
        node.attach_resource_state(state)?;
        nodes.push(node);
    }

    Ok(nodes)
}

/// Evaluate the count expression, or None if no count is set.
fn evaluate_count(
    resource: &ResourceConfig,
    interpolator: &dyn Interpolator,
) -> Result<Option<u64>> {
    let Some(count_expr) = &resource.count else {
        return Ok(None);
    };
    let scope_resource = Resource {
        name: resource.name.clone(),
        resource_type: resource.resource_type.clone(),
        count_index: NO_INDEX,
    };
    let val = interpolator
        .evaluate(count_expr, Scope::resource(&scope_resource))
        .with_context(|| format!("Cannot determine count for {}", resource.id()))?;

    let count = match &val {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    match count {
        Some(count) if count > MAX_COUNT => bail!(
            "count for {} is {}, above the limit of {}",
            resource.id(),
            count,
            MAX_COUNT
        ),
        Some(count) => Ok(Some(count)),
        None => bail!(
            "count for {} must be a non-negative integer, got {}",
            resource.id(),
            val
        ),
    }
}

/// Build the dependency graph from capability queries.
///
/// Every referenced name gets an edge from each node that is referenceable
/// under that name. Self edges are dropped and cycles are rejected.
pub fn build_graph(
    nodes: Vec<ApplyableResource>,
) -> Result<(ResourceGraph, HashMap<String, NodeIndex>)> {
    let mut graph = DiGraph::new();
    let mut node_map: HashMap<String, NodeIndex> = HashMap::new();
    let mut referenceable: HashMap<String, Vec<NodeIndex>> = HashMap::new();
    let mut state_ids: HashSet<String> = HashSet::new();

    for node in nodes {
        let name = node.name();
        let state_id = node.address().state_id();
        if !state_ids.insert(state_id.clone()) {
            bail!("Graph nodes share the state id '{}' ({})", state_id, name);
        }
        let names = node.referenceable_names();
        let idx = graph.add_node(node);
        if node_map.insert(name.clone(), idx).is_some() {
            bail!("Duplicate graph node '{}'", name);
        }
        for n in names {
            referenceable.entry(n).or_default().push(idx);
        }
    }

    let indices: Vec<NodeIndex> = graph.node_indices().collect();
    for to_idx in indices {
        let explicit: Vec<String> = graph[to_idx]
            .config()
            .map(|c| c.depends_on.clone())
            .unwrap_or_default();
        for reference in graph[to_idx].references() {
            let kind = if explicit.contains(&reference) {
                DependencyEdge::Explicit
            } else {
                DependencyEdge::Implicit
            };
            let Some(from_indices) = referenceable.get(&reference) else {
                tracing::debug!(
                    node = %graph[to_idx].name(),
                    reference = %reference,
                    "Reference has no node in this graph"
                );
                continue;
            };
            for &from_idx in from_indices {
                if from_idx != to_idx && graph.find_edge(from_idx, to_idx).is_none() {
                    graph.add_edge(from_idx, to_idx, kind);
                }
            }
        }
    }

    if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
        bail!(
            "Circular dependency detected in resource graph involving '{}'",
            graph[cycle.node_id()].name()
        );
    }

    Ok((graph, node_map))
}

/// Provider identities the graph needs, sorted.
pub fn required_providers(graph: &ResourceGraph) -> BTreeSet<String> {
    graph
        .node_weights()
        .filter(|n| n.config().is_some())
        .map(|n| n.provided_by())
        .collect()
}

/// Provisioner types the graph needs, sorted.
pub fn required_provisioners(graph: &ResourceGraph) -> BTreeSet<String> {
    graph
        .node_weights()
        .flat_map(|n| n.provisioned_by())
        .collect()
}

/// Generate DOT representation of the resource graph.
pub fn to_dot(graph: &ResourceGraph) -> String {
    let mut dot = String::from("digraph resources {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=filled];\n\n");

    for idx in graph.node_indices() {
        let node = &graph[idx];
        // Nodes without configuration are only known from state.
        let color = if node.config().is_some() {
            "#a8d8a8"
        } else {
            "#d8d8d8"
        };
        dot.push_str(&format!(
            "  n{} [label=\"{}\\n{}\", fillcolor=\"{}\"];\n",
            idx.index(),
            node.name(),
            node.provided_by(),
            color
        ));
    }

    dot.push('\n');

    for edge in graph.edge_indices() {
        if let Some((from, to)) = graph.edge_endpoints(edge) {
            let style = match graph[edge] {
                DependencyEdge::Explicit => "solid",
                DependencyEdge::Implicit => "dashed",
            };
            dot.push_str(&format!(
                "  n{} -> n{} [style={}];\n",
                from.index(),
                to.index(),
                style
            ));
        }
    }

    dot.push_str("}\n");
    dot
}
