use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use orchestra_core::ExecutionContext;
use orchestra_engine::{Orchestrator, OrchestratorConfig};

mod logging;
mod output;
mod plan_file;
mod workers;

use plan_file::{FilePlanner, PlanFile};

#[derive(Parser)]
#[command(name = "orchestra")]
#[command(about = "Run multi-step plans across a set of workers")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true, env = "ORCHESTRA_DEBUG")]
    debug: bool,

    /// Orchestrator config file (YAML)
    #[arg(long, short, global = true, env = "ORCHESTRA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file
    Run {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Prompt recorded on the task; defaults to the plan objective
        #[arg(long, short)]
        prompt: Option<String>,

        /// Also print status changes and log lines
        #[arg(long, short)]
        verbose: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a plan file against the available workers
    Validate {
        /// Plan file (YAML)
        plan: PathBuf,
    },
    /// List the built-in workers
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            plan,
            prompt,
            verbose,
            json,
        } => run_plan(config, &plan, prompt, verbose, json).await,
        Commands::Validate { plan } => validate_plan(&config, &plan),
        Commands::Workers => list_workers(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    match path {
        Some(path) => {
            let config = OrchestratorConfig::load_from_file(path)?;
            log::info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(OrchestratorConfig::default()),
    }
}

async fn run_plan(
    config: OrchestratorConfig,
    path: &Path,
    prompt: Option<String>,
    verbose: bool,
    json: bool,
) -> anyhow::Result<()> {
    let file = PlanFile::load(path)?;
    let prompt = prompt.unwrap_or_else(|| file.plan.objective.clone());
    let registry = workers::demo_registry(&config.coordinator_agent)?;

    let orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(FilePlanner::new(file)))
        .with_config(config);
    let (_subscription, mut events) = orchestrator.event_bus().subscribe_channel();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = output::render_event(&event, verbose) {
                println!("{line}");
            }
        }
    });

    let ctx = Arc::new(ExecutionContext::new(
        format!("task-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")),
        prompt,
    ));

    let interrupt_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted; cancelling after the current step".yellow());
            interrupt_ctx.cancel();
        }
    });

    let report = orchestrator.run(&ctx).await;

    // Closing the bus ends the printer once it has drained.
    drop(orchestrator);
    printer.await.context("event printer stopped unexpectedly")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
    }

    if report.success {
        Ok(())
    } else {
        anyhow::bail!("task ended {}", report.status.as_str())
    }
}

fn validate_plan(config: &OrchestratorConfig, path: &Path) -> anyhow::Result<()> {
    let file = PlanFile::load(path)?;
    let registry = workers::demo_registry(&config.coordinator_agent)?;

    let missing: Vec<String> = file
        .agents()
        .into_iter()
        .filter(|agent| !registry.contains(agent))
        .collect();

    println!(
        "{}: {} steps, {} mode, version {}",
        path.display(),
        file.plan.steps.len(),
        file.plan.mode.as_str(),
        file.plan.version
    );

    if missing.is_empty() {
        println!("{}", "All workers available".green());
        Ok(())
    } else {
        anyhow::bail!("unknown workers: {}", missing.join(", "))
    }
}

fn list_workers(config: &OrchestratorConfig) -> anyhow::Result<()> {
    let registry = workers::demo_registry(&config.coordinator_agent)?;

    for name in registry.names() {
        let description = registry
            .get(&name)
            .map(|worker| worker.description().to_string())
            .unwrap_or_default();
        println!("{:<14} {}", name.bold(), description);
    }

    Ok(())
}
