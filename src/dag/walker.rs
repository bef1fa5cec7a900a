use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use colored::Colorize;
use dashmap::DashMap;
use petgraph::graph::NodeIndex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

use super::capability::GraphNode;
use super::node::ApplyableResource;
use super::resource_graph::ResourceGraph;
use crate::executor::error::ApplyOutcome;
use crate::executor::hook::format_duration;

const HEARTBEAT: Duration = Duration::from_secs(10);

/// Status of a node during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Skipped(String),
}

/// Result of executing a single node.
#[derive(Debug)]
pub struct NodeResult {
    pub node_index: NodeIndex,
    pub address: String,
    pub status: NodeStatus,
    pub outcome: Option<ApplyOutcome>,
}

type NodeFuture = futures::future::BoxFuture<'static, Result<ApplyOutcome>>;

/// Callback signature for node execution.
pub type NodeExecutor = Box<dyn Fn(NodeIndex, ApplyableResource) -> NodeFuture + Send + Sync>;

type Statuses = Arc<DashMap<NodeIndex, NodeStatus>>;
type Running = Arc<DashMap<NodeIndex, (String, Instant)>>;

/// Event-driven DAG walker that executes nodes as their dependencies are satisfied.
///
/// A failed node never stops nodes already running; its transitive dependents
/// are marked skipped instead of being started.
pub struct DagWalker {
    max_parallelism: usize,
}

impl DagWalker {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Walk the DAG, executing nodes via the provided executor function.
    pub async fn walk(
        &self,
        graph: &ResourceGraph,
        executor: Arc<NodeExecutor>,
    ) -> Result<Vec<NodeResult>> {
        let node_count = graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let topology = Topology::of(graph);
        let statuses: Statuses = Arc::new(DashMap::new());
        for idx in graph.node_indices() {
            statuses.insert(idx, NodeStatus::Pending);
        }

        let workers = Workers {
            graph,
            executor,
            semaphore: Arc::new(Semaphore::new(self.max_parallelism)),
            statuses: Arc::clone(&statuses),
            running: Arc::new(DashMap::new()),
        };
        let (tx, mut rx) = mpsc::channel::<NodeResult>(node_count);
        let all_done = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(Arc::clone(&workers.running), Arc::clone(&all_done));

        for idx in topology.roots() {
            workers.spawn(idx, &tx);
        }

        let mut settled = 0;
        let mut results: Vec<NodeResult> = Vec::with_capacity(node_count);

        while settled < node_count {
            let Some(result) = rx.recv().await else {
                break;
            };
            let idx = result.node_index;
            let elapsed_secs = workers
                .running
                .remove(&idx)
                .map(|(_, (_, t))| t.elapsed().as_secs())
                .unwrap_or(0);
            statuses.insert(idx, result.status.clone());
            settled += 1;

            debug!(
                address = %result.address,
                status = ?result.status,
                elapsed_secs = elapsed_secs,
                progress = format!("{}/{}", settled, node_count),
                "Node completed"
            );

            if result.status == NodeStatus::Succeeded {
                for &next in topology.dependents_of(idx) {
                    if topology.dependencies_met(next, &statuses) {
                        workers.spawn(next, &tx);
                    }
                }
            } else {
                for skipped in topology.transitive_dependents(idx) {
                    // A diamond can reach the same dependent from two failures.
                    let pending = statuses
                        .get(&skipped)
                        .map(|s| *s == NodeStatus::Pending)
                        .unwrap_or(false);
                    if !pending {
                        continue;
                    }

                    let address = graph[skipped].name();
                    let reason = format!("Dependency '{}' failed", result.address);
                    println!("{}: {}: {}", address.bold(), "Skipped".yellow(), reason.dimmed());

                    statuses.insert(skipped, NodeStatus::Skipped(reason.clone()));
                    settled += 1;
                    results.push(NodeResult {
                        node_index: skipped,
                        address,
                        status: NodeStatus::Skipped(reason),
                        outcome: None,
                    });
                }
            }

            results.push(result);
        }

        all_done.store(true, Ordering::Relaxed);
        heartbeat.abort();

        Ok(results)
    }
}

// ─── Topology ────────────────────────────────────────────────────────────────

/// Adjacency of the graph in both directions, computed once per walk.
struct Topology {
    dependents: HashMap<NodeIndex, Vec<NodeIndex>>,
    dependencies: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl Topology {
    fn of(graph: &ResourceGraph) -> Self {
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut dependencies: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for idx in graph.node_indices() {
            dependents.insert(idx, Vec::new());
            dependencies.insert(idx, Vec::new());
        }
        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                dependents.entry(from).or_default().push(to);
                dependencies.entry(to).or_default().push(from);
            }
        }
        Self {
            dependents,
            dependencies,
        }
    }

    /// Nodes with no dependencies, in index order.
    fn roots(&self) -> Vec<NodeIndex> {
        let mut roots: Vec<NodeIndex> = self
            .dependencies
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(&idx, _)| idx)
            .collect();
        roots.sort();
        roots
    }

    fn dependents_of(&self, idx: NodeIndex) -> &[NodeIndex] {
        self.dependents.get(&idx).map(Vec::as_slice).unwrap_or(&[])
    }

    fn dependencies_met(&self, idx: NodeIndex, statuses: &Statuses) -> bool {
        self.dependencies
            .get(&idx)
            .map(|deps| {
                deps.iter().all(|dep| {
                    statuses
                        .get(dep)
                        .map(|s| *s == NodeStatus::Succeeded)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(true)
    }

    /// Everything downstream of a node, sorted by index.
    fn transitive_dependents(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dep in self.dependents_of(node) {
                if visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        let mut found: Vec<NodeIndex> = visited.into_iter().collect();
        found.sort();
        found
    }
}

// ─── Workers ─────────────────────────────────────────────────────────────────

struct Workers<'g> {
    graph: &'g ResourceGraph,
    executor: Arc<NodeExecutor>,
    semaphore: Arc<Semaphore>,
    statuses: Statuses,
    running: Running,
}

impl Workers<'_> {
    /// Run one node on its own task once a permit is free.
    fn spawn(&self, idx: NodeIndex, tx: &mpsc::Sender<NodeResult>) {
        let node = self.graph[idx].clone();
        let address = node.name();
        let executor = Arc::clone(&self.executor);
        let semaphore = Arc::clone(&self.semaphore);
        let running = Arc::clone(&self.running);
        let tx = tx.clone();

        self.statuses.insert(idx, NodeStatus::Running);

        tokio::spawn(async move {
            let (status, outcome) = match semaphore.acquire().await {
                Ok(_permit) => {
                    running.insert(idx, (address.clone(), Instant::now()));
                    match executor(idx, node).await {
                        Ok(outcome) => (NodeStatus::Succeeded, Some(outcome)),
                        Err(e) => (NodeStatus::Failed(format!("{:#}", e)), None),
                    }
                }
                Err(e) => (NodeStatus::Failed(format!("worker pool closed: {}", e)), None),
            };

            let _ = tx
                .send(NodeResult {
                    node_index: idx,
                    address,
                    status,
                    outcome,
                })
                .await;
        });
    }
}

/// Prints "Still applying... [10s elapsed]" for long-running nodes.
fn spawn_heartbeat(running: Running, all_done: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT).await;
            if all_done.load(Ordering::Relaxed) {
                break;
            }
            for entry in running.iter() {
                let (address, start) = entry.value();
                let elapsed = start.elapsed().as_secs();
                if elapsed >= HEARTBEAT.as_secs() {
                    println!(
                        "{}: Still {}... [{} elapsed]",
                        address,
                        "applying".cyan(),
                        format_duration(elapsed).bold(),
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;
    use crate::config::address::ResourceAddress;
    use crate::dag::resource_graph::DependencyEdge;
    use crate::interpolate::ExpressionEvaluator;

    fn node(name: &str) -> ApplyableResource {
        ApplyableResource::new(
            ResourceAddress::new("null_resource", name),
            Arc::new(ExpressionEvaluator::default()),
        )
    }

    /// a -> b, a -> c, b -> d, c -> d
    fn diamond() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let a = graph.add_node(node("a"));
        let b = graph.add_node(node("b"));
        let c = graph.add_node(node("c"));
        let d = graph.add_node(node("d"));
        for (from, to) in [(a, b), (a, c), (b, d), (c, d)] {
            graph.add_edge(from, to, DependencyEdge::Implicit);
        }
        graph
    }

    fn executor(fail: &'static str, calls: Arc<AtomicUsize>) -> Arc<NodeExecutor> {
        let exec: NodeExecutor = Box::new(move |_idx: NodeIndex, node: ApplyableResource| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if node.address().name() == fail {
                    anyhow::bail!("boom");
                }
                Ok(ApplyOutcome::NoOp)
            }
            .boxed()
        });
        Arc::new(exec)
    }

    #[tokio::test]
    async fn runs_every_node_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = DagWalker::new(2)
            .walk(&diamond(), executor("none", Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(results.iter().all(|r| r.status == NodeStatus::Succeeded));
        // d can only finish after both of its dependencies.
        assert_eq!(results.last().unwrap().address, "null_resource.d");
    }

    #[tokio::test]
    async fn failure_skips_each_dependent_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = DagWalker::new(4)
            .walk(&diamond(), executor("a", Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, NodeStatus::Skipped(_)))
            .count();
        assert_eq!(skipped, 3);
    }

    #[tokio::test]
    async fn empty_graph() {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = DagWalker::new(0)
            .walk(&ResourceGraph::new(), executor("none", calls))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
