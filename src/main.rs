// selfevolve - self-repairing test loop
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use selfevolve::config::constants::LOG_TAIL_LINES;
use selfevolve::config::{load_config, RunConfig};
use selfevolve::controller::{Controller, RunReport};
use selfevolve::logging;
use selfevolve::runner::tail;
use selfevolve::store::{Heuristic, HeuristicStore};

/// Repair a failing Python test suite with learned fix heuristics
#[derive(Parser, Debug)]
#[command(name = "selfevolve")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Workspace root containing the application subtree
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Config file (default: <workspace>/.selfevolve/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the repair loop until the suite passes or the budget is spent
    Run(RunArgs),

    /// Inspect or seed the heuristic store
    Heuristics {
        #[command(subcommand)]
        command: HeuristicsCommand,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Files a single patch may touch
    #[arg(long)]
    max_files: Option<usize>,

    /// Changed lines a single patch may carry
    #[arg(long)]
    max_lines: Option<usize>,

    /// Test suite timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Run the suite once before the first iteration
    #[arg(long)]
    baseline: bool,

    /// Append iteration records to .selfevolve/runs/run_<date>.jsonl
    #[arg(long)]
    jsonl: bool,
}

#[derive(Subcommand, Debug)]
enum HeuristicsCommand {
    /// Print stored heuristics, best first
    List,

    /// Merge a JSON list of heuristics into the store
    Import {
        file: PathBuf,

        /// Overwrite heuristics that share a pattern
        #[arg(long)]
        replace: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let config = load_config(&cli.workspace, cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Heuristics { command } => {
            let store_path = config.store_path();
            match command {
                HeuristicsCommand::List => list_heuristics(&store_path)?,
                HeuristicsCommand::Import { file, replace } => {
                    import_heuristics(&store_path, &file, replace)?
                }
            }
            Ok(0)
        }
    }
}

async fn run(mut config: RunConfig, args: RunArgs) -> Result<u8> {
    if let Some(n) = args.max_iterations {
        config.max_iterations = n;
    }
    if let Some(n) = args.max_files {
        config.max_files_per_patch = n;
    }
    if let Some(n) = args.max_lines {
        config.max_changed_lines = n;
    }
    if let Some(secs) = args.timeout {
        config.tests.timeout_secs = secs;
    }
    config.baseline_probe |= args.baseline;
    config.audit.jsonl |= args.jsonl;

    let controller = Controller::from_config(config)?;
    let report = controller.run().await.context("Run aborted")?;
    print_report(&report);
    Ok(report.stop_reason.exit_code())
}

fn print_report(report: &RunReport) {
    println!(
        "{} after {} iteration(s)",
        report.stop_reason, report.iterations
    );
    for record in &report.records {
        let applied = record
            .applied
            .as_ref()
            .map(|p| format!("{} [{}]", p.origin, p.files.join(", ")))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  #{} {:?} signature={} applied={} rejected={}",
            record.index,
            record.verdict,
            record.signature_in,
            applied,
            record.rejected.len()
        );
    }
    let created = report.heuristics_created();
    if created > 0 {
        println!("{} new heuristic(s) learned", created);
    }

    if let Some(outcome) = report.final_outcome.as_ref().filter(|o| !o.passed) {
        if !outcome.log_tail.is_empty() {
            println!("\nLast test output:\n{}", tail(&outcome.log_tail, LOG_TAIL_LINES));
        }
    }
}

fn list_heuristics(store_path: &Path) -> Result<()> {
    let store = HeuristicStore::load(store_path)
        .with_context(|| format!("Failed to load {}", store_path.display()))?;
    if store.is_empty() {
        println!("No heuristics in {}", store_path.display());
        return Ok(());
    }

    for h in store.ranked() {
        println!(
            "{:.2}  {}/{}  {}  {}",
            h.confidence,
            h.times_succeeded,
            h.times_applied,
            h.key(),
            h.description
        );
    }
    Ok(())
}

fn import_heuristics(store_path: &Path, file: &Path, replace: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let imported: Vec<Heuristic> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse heuristics from {}", file.display()))?;

    let mut store = HeuristicStore::load(store_path)?;
    let summary = store.merge(imported, replace);
    store
        .save(store_path)
        .with_context(|| format!("Failed to save {}", store_path.display()))?;

    println!(
        "Imported into {}: {} added, {} replaced, {} skipped",
        store_path.display(),
        summary.added,
        summary.replaced,
        summary.skipped
    );
    Ok(())
}
