mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bk_telemetry::metrics::{MetricsCollector, BRANCHES_GAUGE, COMMAND_DURATION, USAGE_COUNTER};
use clap::{Parser, Subcommand};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// branchkeeper -- keep bot-managed branches of a git remote up to date.
#[derive(Parser)]
#[command(name = "bk", version, about)]
struct Cli {
    /// Remote repository URL.
    #[arg(long)]
    url: String,

    /// Config file (defaults to ~/.branchkeeper/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines instead of human-readable ones, ending with a
    /// metrics summary.
    #[arg(long)]
    json_logs: bool,

    /// Write run metrics here in Prometheus text format.
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List remote branches and their tips.
    Branches,

    /// Clone or refresh the local mirror.
    Sync,

    /// Working tree status of the mirror.
    Status {
        /// Limit to this path inside the repository.
        path: Option<String>,
    },

    /// Whether a branch is behind the base branch.
    Stale { branch: String },

    /// Whether someone other than the bot committed last on a branch.
    Modified { branch: String },

    /// Whether a branch merges cleanly into a base branch.
    Conflicted { base: String, branch: String },

    /// Commit files from disk to a branch and push it.
    Commit {
        /// Target branch.
        branch: String,
        /// Commit message.
        #[arg(short, long)]
        message: String,
        /// Directory the listed files are read from.
        #[arg(long, default_value = ".")]
        from: PathBuf,
        /// Push even when the branch already has identical contents.
        #[arg(long)]
        force: bool,
        /// Paths relative to `--from`; missing files are deleted.
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Delete a branch on the remote and locally.
    Delete { branch: String },

    /// Fast-forward the base branch to a branch and push it.
    Merge { branch: String },

    /// Remove side refs pushed during this run.
    ClearRefs,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Branches => "branches",
            Commands::Sync => "sync",
            Commands::Status { .. } => "status",
            Commands::Stale { .. } => "stale",
            Commands::Modified { .. } => "modified",
            Commands::Conflicted { .. } => "conflicted",
            Commands::Commit { .. } => "commit",
            Commands::Delete { .. } => "delete",
            Commands::Merge { .. } => "merge",
            Commands::ClearRefs => "clear-refs",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        bk_telemetry::logging::init_logging_json("bk", "warn");
    } else {
        bk_telemetry::logging::init_logging("bk", "warn");
    }

    let metrics = Arc::new(MetricsCollector::new());
    let mut session = commands::open_session(cli.config.as_deref(), &cli.url, metrics.clone())
        .await
        .context("failed to open repository session")?;

    let command = cli.command.name();
    let start = Instant::now();
    let result = match cli.command {
        Commands::Branches => commands::inspect::branches(&session),
        Commands::Sync => commands::inspect::sync(&mut session).await,
        Commands::Status { path } => commands::inspect::status(&mut session, path.as_deref()).await,
        Commands::Stale { branch } => commands::inspect::stale(&mut session, &branch).await,
        Commands::Modified { branch } => commands::inspect::modified(&mut session, &branch).await,
        Commands::Conflicted { base, branch } => {
            commands::inspect::conflicted(&mut session, &base, &branch).await
        }
        Commands::Commit {
            branch,
            message,
            from,
            force,
            files,
        } => commands::write::commit(&mut session, &branch, &message, &from, force, &files).await,
        Commands::Delete { branch } => commands::write::delete(&mut session, &branch).await,
        Commands::Merge { branch } => commands::write::merge(&mut session, &branch).await,
        Commands::ClearRefs => commands::write::clear_refs(&mut session).await,
    };

    let elapsed = start.elapsed();
    metrics.record_histogram(COMMAND_DURATION, elapsed.as_secs_f64());
    metrics.set_gauge(BRANCHES_GAUGE, session.branch_list().len() as i64);
    info!(
        command,
        duration_ms = elapsed.as_millis() as u64,
        remote_writes = metrics.get_counter(USAGE_COUNTER, &[("kind", "commits")]),
        ok = result.is_ok(),
        "command finished"
    );
    let report =
        commands::report::report_metrics(&metrics, cli.metrics_file.as_deref(), cli.json_logs).await;
    result.and(report)
}
