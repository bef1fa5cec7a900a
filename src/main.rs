use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `converge graph | dot`) exits cleanly
/// instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use converge::config::address::ResourceAddress;
use converge::config::loader;
use converge::config::types::WorkspaceConfig;
use converge::dag::resource_graph;
use converge::executor::engine::ApplyEngine;
use converge::executor::hook::{Hooks, LogHook, UiHook};
use converge::interpolate::ExpressionEvaluator;
use converge::output::formatter;
use converge::planner::diff::InstanceDiff;
use converge::provider::builtin::register_builtins;
use converge::provider::{ProviderRegistry, ProvisionerRegistry};
use converge::state::sqlite::SqliteBackend;
use converge::state::{DiffStore, StateStore};

/// converge - apply planned resource changes in dependency order
#[derive(Parser)]
#[command(name = "converge", version, about, long_about = None)]
struct Cli {
    /// Path to a workspace YAML file or a directory of them
    #[arg(short, long, default_value = ".")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// State database path (overrides settings.state_path)
    #[arg(long)]
    state: Option<String>,

    /// Maximum parallelism for resource operations (overrides settings.parallelism)
    #[arg(short, long)]
    parallelism: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the saved diffs with resource-level parallelism
    Apply,

    /// Show the resource dependency graph as DOT
    Graph,

    /// Manage saved diffs
    Diff {
        #[command(subcommand)]
        command: DiffCommands,
    },

    /// Inspect recorded state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
enum DiffCommands {
    /// Save diffs from a JSON file mapping state ids to diffs
    Import {
        /// Path to the JSON file
        path: String,
    },

    /// List the diffs waiting to be applied
    List,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List all resources in state
    List {
        /// Filter by resource type (e.g. null_resource)
        #[arg(long)]
        filter: Option<String>,
    },

    /// Show details for a specific resource
    Show {
        /// State id (e.g. null_resource.web or null_resource.web.0)
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Apply => cmd_apply(&cli).await,
        Commands::Graph => cmd_graph(&cli).await,
        Commands::Diff { ref command } => cmd_diff(&cli, command).await,
        Commands::State { ref command } => cmd_state(&cli, command).await,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn load_workspace(cli: &Cli) -> Result<WorkspaceConfig> {
    loader::load_workspace(Path::new(&cli.config))
}

/// The state database named by `--state`, else by the workspace settings.
fn open_backend(cli: &Cli, workspace: Option<&WorkspaceConfig>) -> Result<Arc<SqliteBackend>> {
    let db_path = match (&cli.state, workspace) {
        (Some(path), _) => path.clone(),
        (None, Some(ws)) => ws.settings.state_path.clone(),
        (None, None) => converge::config::types::Settings::default().state_path,
    };
    let backend = SqliteBackend::open(&db_path)?;
    backend.initialize()?;
    Ok(Arc::new(backend))
}

async fn engine(cli: &Cli, workspace: &WorkspaceConfig) -> Result<ApplyEngine> {
    let backend = open_backend(cli, Some(workspace))?;

    let providers = Arc::new(ProviderRegistry::new());
    let provisioners = Arc::new(ProvisionerRegistry::new());
    register_builtins(&providers, &provisioners).await;

    let hooks = Hooks::new()
        .with(Arc::new(LogHook))
        .with(Arc::new(UiHook::new()));
    let parallelism = cli.parallelism.unwrap_or(workspace.settings.parallelism);

    Ok(ApplyEngine::new(
        Arc::clone(&backend) as Arc<dyn StateStore>,
        backend as Arc<dyn DiffStore>,
        providers,
        provisioners,
        Arc::new(hooks),
        parallelism,
    ))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_apply(cli: &Cli) -> Result<()> {
    let workspace = load_workspace(cli)?;
    let engine = engine(cli, &workspace).await?;

    let summary = engine.apply(&workspace).await?;

    for result in &summary.results {
        if let converge::dag::walker::NodeStatus::Failed(ref e) = result.status {
            println!("{}: {}: {}", result.address.bold(), "Error".red(), e);
        }
    }
    formatter::print_apply_summary(&summary);

    if !summary.is_success() {
        bail!(
            "Apply failed: {} failed, {} skipped",
            summary.failed,
            summary.skipped
        );
    }
    Ok(())
}

async fn cmd_graph(cli: &Cli) -> Result<()> {
    let workspace = load_workspace(cli)?;
    let backend = open_backend(cli, Some(&workspace))?;

    let recorded = backend.list_states().await?;
    let evaluator = Arc::new(ExpressionEvaluator::new(workspace.variables.clone()));
    let nodes = resource_graph::expand_nodes(&workspace, &recorded, evaluator)?;
    let (graph, _) = resource_graph::build_graph(nodes)?;

    print!("{}", resource_graph::to_dot(&graph));
    Ok(())
}

async fn cmd_diff(cli: &Cli, command: &DiffCommands) -> Result<()> {
    let workspace = load_workspace(cli).ok();
    let backend = open_backend(cli, workspace.as_ref())?;

    match command {
        DiffCommands::Import { path } => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path))?;
            let diffs: BTreeMap<String, InstanceDiff> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse diffs in {}", path))?;

            for id in diffs.keys() {
                if ResourceAddress::from_state_id(id).is_none() {
                    bail!("'{}' is not a valid state id", id);
                }
            }
            for (id, diff) in &diffs {
                backend.write_diff(id, Some(diff)).await?;
            }
            formatter::print_success(&format!("Imported {} diff(s).", diffs.len()));
        }
        DiffCommands::List => {
            let diffs = backend.list_diffs().await?;
            formatter::print_pending_diffs(&diffs);
        }
    }
    Ok(())
}

async fn cmd_state(cli: &Cli, command: &StateCommands) -> Result<()> {
    let workspace = load_workspace(cli).ok();
    let backend = open_backend(cli, workspace.as_ref())?;

    match command {
        StateCommands::List { filter } => {
            let mut resources = backend.list_states().await?;
            if let Some(resource_type) = filter {
                resources.retain(|(_, r)| &r.resource_type == resource_type);
            }
            formatter::print_resource_list(&resources);
        }
        StateCommands::Show { id } => match backend.get_resource(id).await? {
            Some(resource) => formatter::print_resource_detail(id, &resource),
            None => bail!("Resource '{}' not found in state.", id),
        },
    }
    Ok(())
}
