use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plangraph_core::config::AppConfig;
use plangraph_core::error::PlanGraphError;
use plangraph_core::event::EventBus;
use plangraph_core::traits::LlmClient;
use plangraph_core::types::{GraphEvent, RunId};

use plangraph_agent::{brief_to_plan_executor, open_checkpoint_store, MarkdownReport, RunState};

#[derive(Parser)]
#[command(name = "plangraph", version, about = "Turn a product brief into a technical implementation plan")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "plangraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the brief-to-plan pipeline
    Run {
        /// Reuse a run id to resume from its checkpoint
        #[arg(long)]
        run_id: Option<String>,
        /// Write the Markdown report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the boxed summary instead of the full report
        #[arg(long)]
        compact: bool,
        /// The brief (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        brief: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Inspect or remove stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List stored runs, most recent first
    List,
    /// Render the report for a stored run
    Show {
        run_id: String,
        #[arg(long)]
        compact: bool,
    },
    /// Delete a run's checkpoint
    Delete { run_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plangraph=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            run_id,
            output,
            compact,
            brief,
        } => {
            let brief = if brief.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                brief.join(" ")
            };
            let run_id = run_id.map(|id| RunId::from_str(&id)).unwrap_or_default();
            run_pipeline(&config, &run_id, brief, output.as_deref(), compact).await?;
        }
        Commands::Checkpoints { action } => {
            let store = open_checkpoint_store(&config)?;
            match action {
                CheckpointAction::List => {
                    let checkpoints = store.list()?;
                    if checkpoints.is_empty() {
                        println!("No checkpoints.");
                    }
                    for cp in checkpoints {
                        println!(
                            "{}  {}  last={}  completed={}",
                            cp.run_id,
                            cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
                            cp.last_node,
                            cp.completed.join(",")
                        );
                    }
                }
                CheckpointAction::Show { run_id, compact } => {
                    let cp = store
                        .load(&RunId::from_str(&run_id))?
                        .with_context(|| format!("No checkpoint for run {}", run_id))?;
                    println!("{}", render(&cp.state, compact));
                }
                CheckpointAction::Delete { run_id } => {
                    if store.delete(&RunId::from_str(&run_id))? {
                        println!("Deleted checkpoint for run {}", run_id);
                    } else {
                        println!("No checkpoint for run {}", run_id);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Load the TOML config, falling back to environment variables when the
/// file does not exist.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    match AppConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config");
            Ok(config)
        }
        Err(PlanGraphError::ConfigNotFound(_)) => {
            info!(path = %path.display(), "Config file not found, using environment");
            Ok(AppConfig::from_env())
        }
        Err(e) => Err(e.into()),
    }
}

fn render(state: &RunState, compact: bool) -> String {
    let report = MarkdownReport::new();
    if compact {
        report.render_compact(state)
    } else {
        report.render(state)
    }
}

async fn run_pipeline(
    config: &AppConfig,
    run_id: &RunId,
    brief: String,
    output: Option<&Path>,
    compact: bool,
) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::from(plangraph_llm::create_retrying_client(config)?);
    let store = open_checkpoint_store(config)?;
    let resuming = store.load(run_id)?.is_some();
    if brief.trim().is_empty() && !resuming {
        anyhow::bail!("A brief is required (pass it as arguments or on stdin)");
    }

    let event_bus = Arc::new(EventBus::default());
    let executor = brief_to_plan_executor(config, llm, store)?.with_event_bus(event_bus.clone());

    let mut rx = event_bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                GraphEvent::RunResumed { last_node, completed, .. } => {
                    eprintln!("[resume] {} node(s) done, last: {}", completed, last_node);
                }
                GraphEvent::NodeStarted { node, .. } => eprintln!("[{}] started", node),
                GraphEvent::NodeCompleted { node, elapsed_ms, .. } => {
                    eprintln!("[{}] done in {}ms", node, elapsed_ms)
                }
                GraphEvent::NodeFailed { node, error, .. } => eprintln!("[{}] FAILED: {}", node, error),
                GraphEvent::RunComplete { .. } => break,
                GraphEvent::RunStarted { .. } => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Interrupted, cancelling run");
        cancel_clone.cancel();
    });

    eprintln!("Run id: {}", run_id);
    let result = executor.run(RunState::from_brief(brief), run_id, cancel).await;
    drop(executor);
    drop(event_bus);
    printer.await.ok();

    let result = result.with_context(|| {
        format!("Run {} did not finish; re-run with --run-id {} to resume", run_id, run_id)
    })?;

    let text = render(&result.state, compact);
    match output {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", text),
    }

    eprintln!(
        "Run {} complete: {} node(s) executed in {}ms{}",
        run_id,
        result.node_results.len(),
        result.total_elapsed_ms,
        if result.resumed { " (resumed)" } else { "" }
    );
    Ok(())
}
