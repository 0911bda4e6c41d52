use anyhow::{Context, Result, bail};
use autoflow_core::storage::{read_workflow, write_workflow};
use autoflow_core::{NodeKind, Workflow, graph_issues, parse_branch_list};
use autoflow_engine::integrity::sweep;
use autoflow_engine::layout::layout;
use autoflow_engine::mutation::{InsertTarget, NewNode};
use autoflow_engine::{EditorConfig, EditorSession};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "autoflow", about = "Edit and lay out workflow graphs")]
struct Cli {
    /// Editor config file (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Output {
    /// Write the resulting workflow here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workflow holding only the trigger placeholder
    New {
        name: String,
        #[command(flatten)]
        out: Output,
    },
    /// Recompute node positions
    Layout {
        file: PathBuf,
        #[command(flatten)]
        out: Output,
    },
    /// List structural problems; fails when any are found
    Validate { file: PathBuf },
    /// Prune orphan edges and realign branch edges with declared branches
    Sweep {
        file: PathBuf,
        #[command(flatten)]
        out: Output,
    },
    /// Insert a node on an edge or into a placeholder
    Insert {
        file: PathBuf,
        /// Split this edge
        #[arg(long, conflicts_with = "placeholder", required_unless_present = "placeholder")]
        edge: Option<String>,
        /// Fill this placeholder
        #[arg(long)]
        placeholder: Option<String>,
        #[command(flatten)]
        node: NodeArgs,
        /// Initial branch names, comma separated or a JSON array
        #[arg(long)]
        branches: Option<String>,
        #[command(flatten)]
        out: Output,
    },
    /// Delete a node, bridging its neighbours
    Delete {
        file: PathBuf,
        node: String,
        #[command(flatten)]
        out: Output,
    },
    /// Replace a node's kind and label in place
    Swap {
        file: PathBuf,
        node: String,
        #[command(flatten)]
        replacement: NodeArgs,
        #[command(flatten)]
        out: Output,
    },
    /// Edit the branches of a condition or parallel node
    Branches {
        file: PathBuf,
        node: String,
        #[command(subcommand)]
        action: BranchAction,
        #[command(flatten)]
        out: Output,
    },
}

#[derive(Args)]
struct NodeArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    label: String,
    /// Node parameters as a JSON object
    #[arg(long)]
    params: Option<String>,
}

#[derive(Subcommand)]
enum BranchAction {
    /// Replace the whole branch list
    Set { list: String },
    Insert { index: usize, name: String },
    Remove { index: usize },
    Rename { index: usize, name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Action,
    Trigger,
    Condition,
    Parallel,
    Loop,
    Wait,
    End,
}

impl From<KindArg> for NodeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Action => NodeKind::Action,
            KindArg::Trigger => NodeKind::Custom,
            KindArg::Condition => NodeKind::Condition,
            KindArg::Parallel => NodeKind::Parallel,
            KindArg::Loop => NodeKind::Loop,
            KindArg::Wait => NodeKind::Wait,
            KindArg::End => NodeKind::End,
        }
    }
}

impl NodeArgs {
    fn to_new_node(&self) -> Result<NewNode> {
        let mut node = NewNode::new(self.kind.into(), self.label.clone());
        if let Some(raw) = &self.params {
            node = node.with_params(parse_params(raw)?);
        }
        Ok(node)
    }
}

fn parse_params(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Failed to parse --params")? {
        Value::Object(map) => Ok(map),
        other => bail!("--params must be a JSON object, got {}", other),
    }
}

// ── Logging ─────────────────────────────────────────────────────

/// Console logs go to stderr so stdout stays clean for workflow JSON.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("autoflow")
                .filename_suffix("txt")
                .build(dir)
                .context("Failed to create log file appender")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

// ── Commands ────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    match path {
        Some(path) => EditorConfig::load(path),
        None => Ok(EditorConfig::default()),
    }
}

fn emit(workflow: &Workflow, out: &Output) -> Result<()> {
    match &out.output {
        Some(path) => {
            write_workflow(path, workflow)?;
            info!(path = %path.display(), "Workflow written");
        }
        None => {
            let json =
                serde_json::to_string_pretty(workflow).context("Failed to serialize workflow")?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Open `file` in an editor session, run `apply` and emit the result.
fn edit(
    file: &Path,
    config: EditorConfig,
    out: &Output,
    apply: impl FnOnce(&mut EditorSession) -> Result<()>,
) -> Result<()> {
    let workflow = read_workflow(file)?;
    let mut session = EditorSession::new(workflow, config);
    apply(&mut session)?;
    emit(session.workflow(), out)
}

fn run(command: Command, config: EditorConfig) -> Result<()> {
    match command {
        Command::New { name, out } => {
            let mut workflow = Workflow::new(name);
            workflow.graph = layout(&workflow.graph, &config.layout);
            emit(&workflow, &out)
        }
        Command::Layout { file, out } => {
            let mut workflow = read_workflow(&file)?;
            workflow.graph = layout(&workflow.graph, &config.layout);
            emit(&workflow, &out)
        }
        Command::Validate { file } => {
            let workflow = read_workflow(&file)?;
            let issues = graph_issues(&workflow.graph);
            for issue in &issues {
                println!("{}", issue);
            }
            if !issues.is_empty() {
                bail!("{} issue(s) found in {}", issues.len(), file.display());
            }
            info!(nodes = workflow.graph.nodes.len(), "Workflow is valid");
            Ok(())
        }
        Command::Sweep { file, out } => {
            let mut workflow = read_workflow(&file)?;
            let outcome = sweep(&workflow.graph);
            if outcome.repaired() {
                warn!(
                    pruned_edges = outcome.pruned_edges,
                    reconciled = ?outcome.reconciled_nodes,
                    "Graph repaired"
                );
            } else {
                debug!("Nothing to repair");
            }
            workflow.graph = layout(&outcome.graph, &config.layout);
            emit(&workflow, &out)
        }
        Command::Insert {
            file,
            edge,
            placeholder,
            node,
            branches,
            out,
        } => {
            let target = match (edge, placeholder) {
                (Some(edge), _) => InsertTarget::Edge(edge),
                (None, Some(placeholder)) => InsertTarget::Placeholder(placeholder),
                (None, None) => bail!("Either --edge or --placeholder is required"),
            };
            let mut new = node.to_new_node()?;
            if let Some(raw) = branches {
                new = new.with_branches(parse_branch_list(&raw)?);
            }
            edit(&file, config, &out, |s| Ok(s.insert(target, new)?))
        }
        Command::Delete { file, node, out } => {
            edit(&file, config, &out, |s| Ok(s.delete(&node)?))
        }
        Command::Swap {
            file,
            node,
            replacement,
            out,
        } => {
            let new = replacement.to_new_node()?;
            edit(&file, config, &out, |s| Ok(s.swap(&node, new)?))
        }
        Command::Branches {
            file,
            node,
            action,
            out,
        } => edit(&file, config, &out, |s| {
            match action {
                BranchAction::Set { list } => s.set_branches_from_input(&node, &list)?,
                BranchAction::Insert { index, name } => s.insert_branch(&node, index, &name)?,
                BranchAction::Remove { index } => s.remove_branch(&node, index)?,
                BranchAction::Rename { index, name } => s.rename_branch(&node, index, &name)?,
            }
            Ok(())
        }),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;
    let config = load_config(cli.config.as_deref())?;
    run(cli.command, config)
}
