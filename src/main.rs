use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use stepsync::api::DeleteOutcome;
use stepsync::config::Config;
use stepsync::logging;
use stepsync::steps::{EditOp, EditOutcome, ScopeKey};
use stepsync::{StepEngine, StepError};

#[derive(Parser)]
#[command(name = "stepsync")]
#[command(about = "Stage and sync hierarchical job/process steps against the remote step API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Args, Debug, Clone)]
struct ScopeArgs {
    /// Project id
    #[arg(short, long)]
    project: String,

    /// Process id (omit for the project's job steps)
    #[arg(long)]
    process: Option<String>,
}

impl ScopeArgs {
    fn key(&self) -> ScopeKey {
        match &self.process {
            Some(process) => ScopeKey::process(&self.project, process),
            None => ScopeKey::job(&self.project),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load a scope and print its labeled outline
    Show {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Apply structural edits to a scope
    Edit {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Edits as OP:REMOTE_ID (move-up, move-down, indent, outdent), applied in order
        #[arg(long = "op", value_parser = parse_edit, required = true)]
        ops: Vec<(EditOp, String)>,

        /// Push the result to the remote
        #[arg(long)]
        commit: bool,
    },

    /// Delete a step (and its children) remotely
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Remote step id
        remote_id: String,
    },
}

fn parse_edit(value: &str) -> Result<(EditOp, String), String> {
    let (op, remote_id) = value
        .split_once(':')
        .ok_or_else(|| format!("expected OP:REMOTE_ID, got '{value}'"))?;
    let remote_id = remote_id.trim();
    if remote_id.is_empty() {
        return Err(format!("missing remote id in '{value}'"));
    }
    Ok((op.parse()?, remote_id.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let _logging_handle = logging::init_logging(&config, cli.debug)?;

    let engine = StepEngine::from_config(&config).context("Failed to set up step API client")?;

    match cli.command {
        Commands::Show { scope } => cmd_show(&engine, &scope.key()).await,
        Commands::Edit { scope, ops, commit } => cmd_edit(&engine, &scope.key(), &ops, commit).await,
        Commands::Delete { scope, remote_id } => {
            cmd_delete(&engine, &scope.key(), &remote_id).await
        }
    }
}

async fn load(engine: &StepEngine, key: &ScopeKey) -> Result<()> {
    let report = engine
        .load_scope(key)
        .await
        .with_context(|| format!("Failed to load scope {}", key))?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

async fn cmd_show(engine: &StepEngine, key: &ScopeKey) -> Result<()> {
    load(engine, key).await?;
    print!("{}", engine.render(key).await?);
    Ok(())
}

async fn cmd_edit(
    engine: &StepEngine,
    key: &ScopeKey,
    ops: &[(EditOp, String)],
    commit: bool,
) -> Result<()> {
    load(engine, key).await?;

    for (op, remote_id) in ops {
        let node = engine.find_by_remote_id(key, remote_id).await?;
        match engine.edit(key, node, *op).await? {
            EditOutcome::Applied => {}
            EditOutcome::AtBoundary => {
                eprintln!("{} {}: already at boundary, skipped", op, remote_id);
            }
        }
    }

    print!("{}", engine.render(key).await?);

    if !commit {
        let plan = engine.plan(key).await?;
        println!();
        println!(
            "{} pending change(s) not committed (rerun with --commit to push)",
            plan.len()
        );
        return Ok(());
    }

    match engine.commit(key).await {
        Ok(report) => {
            println!();
            println!("{}", report.summary());
            Ok(())
        }
        Err(StepError::CommitIncomplete { scope, report }) => {
            println!();
            println!("{}", report.summary());
            for failure in &report.failures {
                eprintln!("  {}", failure);
            }
            if report.aborted {
                eprintln!("The step API became unreachable; rerun the commit to push the rest.");
            }
            if report.has_ambiguous() {
                eprintln!("Some results could not be confirmed; check the remote before retrying.");
            }
            anyhow::bail!("commit of {} incomplete", scope)
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_delete(engine: &StepEngine, key: &ScopeKey, remote_id: &str) -> Result<()> {
    load(engine, key).await?;
    match engine.delete_by_remote_id(key, remote_id).await? {
        DeleteOutcome::Deleted => println!("Deleted step {}", remote_id),
        DeleteOutcome::AlreadyAbsent => println!("Step {} was already absent", remote_id),
    }
    Ok(())
}
