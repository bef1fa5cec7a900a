use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use tracing::{debug, info};

use super::error::ApplyOutcome;
use super::hook::{format_duration, Hook};
use super::pipeline::ApplyContext;
use crate::config::types::WorkspaceConfig;
use crate::dag::capability::GraphNode;
use crate::dag::node::ApplyableResource;
use crate::dag::resource_graph::{self, ResourceGraph};
use crate::dag::walker::{DagWalker, NodeExecutor, NodeResult, NodeStatus};
use crate::interpolate::{ExpressionEvaluator, Interpolator};
use crate::provider::{ProviderRegistry, ProvisionerRegistry};
use crate::state::{DiffStore, StateStore};

/// Summary of an apply operation.
#[derive(Debug)]
pub struct ApplySummary {
    pub results: Vec<NodeResult>,
    pub added: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_secs: u64,
}

impl ApplySummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

impl std::fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Apply complete! Resources: {} added, {} changed, {} unchanged",
            self.added, self.changed, self.unchanged,
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        write!(f, ". Total time: {}.", format_duration(self.elapsed_secs))
    }
}

/// Runs the apply pipeline of every resource instance in dependency order.
pub struct ApplyEngine {
    state: Arc<dyn StateStore>,
    diffs: Arc<dyn DiffStore>,
    providers: Arc<ProviderRegistry>,
    provisioners: Arc<ProvisionerRegistry>,
    hooks: Arc<dyn Hook>,
    parallelism: usize,
}

impl ApplyEngine {
    pub fn new(
        state: Arc<dyn StateStore>,
        diffs: Arc<dyn DiffStore>,
        providers: Arc<ProviderRegistry>,
        provisioners: Arc<ProvisionerRegistry>,
        hooks: Arc<dyn Hook>,
        parallelism: usize,
    ) -> Self {
        Self {
            state,
            diffs,
            providers,
            provisioners,
            hooks,
            parallelism,
        }
    }

    /// Build the instance graph for a workspace against the recorded state.
    pub async fn graph(
        &self,
        workspace: &WorkspaceConfig,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<ResourceGraph> {
        let recorded = self.state.list_states().await?;
        let nodes = resource_graph::expand_nodes(workspace, &recorded, interpolator)?;
        let (graph, _node_map) = resource_graph::build_graph(nodes)?;
        Ok(graph)
    }

    /// Apply every pending diff in the workspace.
    pub async fn apply(&self, workspace: &WorkspaceConfig) -> Result<ApplySummary> {
        let started = Instant::now();
        let evaluator = self.evaluator(workspace).await?;
        let graph = self
            .graph(workspace, Arc::clone(&evaluator) as Arc<dyn Interpolator>)
            .await?;
        self.check_plugins(&graph).await?;
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            parallelism = self.parallelism,
            "Starting apply"
        );

        let ctx = self.context();

        let executor: NodeExecutor = Box::new(move |_idx: NodeIndex, node: ApplyableResource| {
            let ctx = ctx.clone();
            let evaluator = Arc::clone(&evaluator);
            async move {
                if node.config().is_none() {
                    debug!(address = %node.name(), "No configuration, left for the destroy pass");
                    return Ok(ApplyOutcome::NoOp);
                }
                let pipeline = node.apply_pipeline()?;
                let outcome = pipeline.run(&ctx).await?;
                if let Some(state) = outcome.state() {
                    evaluator.publish(&pipeline.address().state_id(), state.attributes_json());
                }
                Ok::<_, anyhow::Error>(outcome)
            }
            .boxed()
        });

        let walker = DagWalker::new(self.parallelism);
        let results = walker.walk(&graph, Arc::new(executor)).await?;

        let mut summary = ApplySummary {
            results: Vec::new(),
            added: 0,
            changed: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            elapsed_secs: started.elapsed().as_secs(),
        };
        for result in &results {
            match (&result.status, &result.outcome) {
                (NodeStatus::Succeeded, Some(ApplyOutcome::Applied { create_new: true, .. })) => {
                    summary.added += 1
                }
                (NodeStatus::Succeeded, Some(ApplyOutcome::Applied { .. })) => summary.changed += 1,
                (NodeStatus::Succeeded, _) => summary.unchanged += 1,
                (NodeStatus::Failed(_), _) => summary.failed += 1,
                (NodeStatus::Skipped(_), _) => summary.skipped += 1,
                (NodeStatus::Pending | NodeStatus::Running, _) => {}
            }
        }
        summary.results = results;
        Ok(summary)
    }

    /// An evaluator that already sees every recorded primary instance, so
    /// dependents of unchanged resources can resolve their references.
    async fn evaluator(&self, workspace: &WorkspaceConfig) -> Result<Arc<ExpressionEvaluator>> {
        let evaluator = Arc::new(ExpressionEvaluator::new(workspace.variables.clone()));
        for (id, resource) in self.state.list_states().await? {
            if let Some(primary) = &resource.primary {
                evaluator.publish(&id, primary.attributes_json());
            }
        }
        Ok(evaluator)
    }

    fn context(&self) -> ApplyContext {
        ApplyContext {
            state: Arc::clone(&self.state),
            diffs: Arc::clone(&self.diffs),
            providers: Arc::clone(&self.providers),
            provisioners: Arc::clone(&self.provisioners),
            hooks: Arc::clone(&self.hooks),
        }
    }

    /// Fail before the walk starts when a plugin the graph needs is missing.
    async fn check_plugins(&self, graph: &ResourceGraph) -> Result<()> {
        let mut missing = Vec::new();
        for provider in resource_graph::required_providers(graph) {
            if !self.providers.contains(&provider).await {
                missing.push(format!("provider '{}'", provider));
            }
        }
        for provisioner in resource_graph::required_provisioners(graph) {
            if !self.provisioners.contains(&provisioner).await {
                missing.push(format!("provisioner '{}'", provisioner));
            }
        }
        if !missing.is_empty() {
            bail!("Missing plugins: {}", missing.join(", "));
        }
        Ok(())
    }
}
