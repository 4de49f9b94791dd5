//! SafeGate - safe execution gateway CLI
//!
//! The `safegate` command drives the gateway from a terminal.
//!
//! ## Commands
//!
//! - `check`: Show the permission decision and risk score for an action
//! - `exec`: Run a command through the gate
//! - `checkpoint`: Back up files into a new checkpoint
//! - `rollback`: Restore files from a checkpoint
//! - `checkpoints`: List checkpoints
//! - `audit`: Show recent audit records

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, Level};

use safegate_core::{
    is_within_workspace, ActionMetadata, GatewayConfig, Outcome, RiskTier, SafeRunner,
};

/// Longest command output kept in an outcome.
const MAX_OUTCOME_CHARS: usize = 1000;

#[derive(Parser)]
#[command(name = "safegate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Safe execution gateway for autonomous agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workspace root: the only tree the agent may mutate
    #[arg(short, long, global = true, default_value = ".", env = "SAFEGATE_WORKSPACE")]
    workspace: PathBuf,

    /// Gateway config file (TOML)
    #[arg(short, long, global = true, env = "SAFEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an action without running it or touching the budget
    Check {
        /// Action description
        #[arg(short, long)]
        action: String,

        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Action metadata as a JSON object. Relative `target_path` and
        /// `target_paths` are taken from the workspace root
        #[arg(short, long)]
        metadata: Option<String>,

        /// Action inputs as JSON
        #[arg(short, long)]
        inputs: Option<String>,
    },

    /// Run a command through the gate
    Exec {
        /// Action description
        #[arg(short, long)]
        action: String,

        /// Tool name reported to the gate
        #[arg(short, long, default_value = "shell_tool")]
        tool: String,

        /// Files the command may modify, relative to the current directory.
        /// Checkpointed first; any outside the workspace is subject to the
        /// outside-write rule
        #[arg(long = "target")]
        targets: Vec<PathBuf>,

        /// Estimated cost in USD charged against the budget
        #[arg(long, default_value_t = 0.0)]
        cost: f64,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Back up files into a new checkpoint
    Checkpoint {
        /// Files to back up
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Restore files from a checkpoint
    Rollback {
        /// Checkpoint id
        checkpoint_id: String,
    },

    /// List checkpoints, oldest first
    Checkpoints,

    /// Show recent audit records
    Audit {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    safegate_core::init_tracing(cli.json, level);

    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let workspace = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace not found: {}", cli.workspace.display()))?;
    let mut runner = SafeRunner::from_config(&config, &workspace)
        .context("failed to initialise gateway")?;
    debug!(workspace = %workspace.display(), "gateway ready");

    match cli.command {
        Commands::Check {
            action,
            tool,
            metadata,
            inputs,
        } => cmd_check(&runner, &action, &tool, metadata.as_deref(), inputs.as_deref()),
        Commands::Exec {
            action,
            tool,
            targets,
            cost,
            command,
        } => cmd_exec(
            &mut runner,
            &action,
            &tool,
            absolutize(targets)?,
            cost,
            &command,
        ),
        Commands::Checkpoint { paths } => cmd_checkpoint(&runner, &absolutize(paths)?),
        Commands::Rollback { checkpoint_id } => cmd_rollback(&runner, &checkpoint_id),
        Commands::Checkpoints => cmd_checkpoints(&runner),
        Commands::Audit { limit } => cmd_audit(&runner, limit),
    }
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(p) => GatewayConfig::from_toml_path(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(GatewayConfig::default()),
    }
}

/// Paths on the command line are relative to the caller's directory, not
/// the workspace root.
fn absolutize(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    Ok(paths.into_iter().map(|p| cwd.join(p)).collect())
}

fn parse_json_arg(raw: Option<&str>, what: &str) -> Result<Value> {
    match raw {
        Some(s) => serde_json::from_str(s).with_context(|| format!("invalid {what} JSON")),
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_check(
    runner: &SafeRunner,
    action: &str,
    tool: &str,
    metadata: Option<&str>,
    inputs: Option<&str>,
) -> Result<ExitCode> {
    let metadata = ActionMetadata::from_json(&parse_json_arg(metadata, "metadata")?)
        .context("metadata does not match the expected keys")?;
    let inputs = parse_json_arg(inputs, "inputs")?;

    let evaluation = runner.evaluate(action, tool, &inputs, &metadata);
    let would_run =
        evaluation.decision.allowed && evaluation.risk_score <= evaluation.max_allowed_risk;
    print_json(&serde_json::json!({
        "allowed": evaluation.decision.allowed,
        "reason": evaluation.decision.reason,
        "risk_score": evaluation.risk_score,
        "risk_tier": RiskTier::from_score(evaluation.risk_score),
        "max_allowed_risk": evaluation.max_allowed_risk,
        "would_run": would_run,
    }))?;
    Ok(if would_run {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_exec(
    runner: &mut SafeRunner,
    action: &str,
    tool: &str,
    targets: Vec<PathBuf>,
    cost: f64,
    command: &[String],
) -> Result<ExitCode> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };
    let inputs = serde_json::json!({ "command": command.join(" ") });
    let workspace = runner.workspace_dir().to_path_buf();
    let metadata = exec_metadata(targets, cost, &workspace);

    let result = runner.run(action, tool, &inputs, &metadata, || {
        run_command(program, args, &workspace)
    })?;
    info!(success = result.success, disposition = ?result.disposition, "exec finished");
    print_json(&result)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// The permission engine checks `target_path` against the workspace, so the
/// first target outside it is promoted there.
fn exec_metadata(targets: Vec<PathBuf>, cost: f64, workspace: &Path) -> ActionMetadata {
    let target_path = targets
        .iter()
        .find(|t| !is_within_workspace(t, workspace))
        .cloned();
    ActionMetadata {
        target_path,
        target_paths: targets,
        estimated_cost_usd: cost,
        ..ActionMetadata::default()
    }
}

fn run_command(
    program: &str,
    args: &[String],
    cwd: &Path,
) -> std::result::Result<Outcome, String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| format!("cannot spawn {program}: {e}"))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    command_outcome(output.status.code(), &stdout, &stderr)
}

/// Non-zero exits and signals are execution failures.
fn command_outcome(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> std::result::Result<Outcome, String> {
    let text = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };
    let text: String = text.chars().take(MAX_OUTCOME_CHARS).collect();
    match code {
        Some(0) => Ok(Outcome::Structured {
            outcome: text,
            confidence: None,
            evidence_refs: Vec::new(),
        }),
        Some(c) => Err(format!("exit {c}: {text}")),
        None => Err(format!("terminated by signal: {text}")),
    }
}

fn cmd_checkpoint(runner: &SafeRunner, paths: &[PathBuf]) -> Result<ExitCode> {
    let manager = runner.rollback_manager();
    let id = manager.create_checkpoint(paths)?;
    let manifest = manager.load_manifest(&id)?.unwrap_or_default();
    println!("Checkpoint: {id}");
    for entry in &manifest.files {
        println!("  {}", entry.path);
    }
    if manifest.files.len() < paths.len() {
        println!(
            "Skipped {} path(s): missing, not a regular file, symlinked, or outside the workspace",
            paths.len() - manifest.files.len()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_rollback(runner: &SafeRunner, checkpoint_id: &str) -> Result<ExitCode> {
    let report = runner.rollback_manager().rollback(checkpoint_id)?;
    print_json(&report)?;
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_checkpoints(runner: &SafeRunner) -> Result<ExitCode> {
    let manager = runner.rollback_manager();
    let ids = manager.list_checkpoints()?;
    if ids.is_empty() {
        println!("No checkpoints.");
    }
    for id in ids {
        let files = manager
            .load_manifest(&id)?
            .map(|m| m.files.len())
            .unwrap_or(0);
        println!("{id}  {files} file(s)");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_audit(runner: &SafeRunner, limit: usize) -> Result<ExitCode> {
    let records = runner.audit_logger().read_records()?;
    for record in tail(&records, limit) {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn tail<T>(items: &[T], limit: usize) -> &[T] {
    &items[items.len().saturating_sub(limit)..]
}
