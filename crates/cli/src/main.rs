//! `actions-relay`: dispatch GitHub Actions workflows and track their runs.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: command-line flags plus environment variables
//!    for GitHub (`GITHUB_TOKEN`, `GITHUB_API_URL`), the optional database
//!    (`ACTIONS_RELAY_DATABASE_URL` or `ACTIONS_RELAY_DB_*`) and monitor
//!    timings (`ACTIONS_RELAY_MONITOR_*`).
//! 2. **Wire observability**: `tracing-subscriber` with an `EnvFilter`, a
//!    JSON or pretty formatter, and an OTLP exporter when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 3. **Construct infrastructure**: `GitHubActionsClient`, `PostgresRunStore`
//!    behind the availability guard, and the tracker components.
//! 4. **Run one subcommand**:
//!    - `dispatch`: dispatch one configured workflow and wait for its run.
//!    - `handle-event`: decode one webhook payload and route it.
//!    - `runs`: print a repository's run records as JSON.
//!    - `check-db`: report whether the database is reachable.
//!
//! ```sh
//! actions-relay --workflows workflows.json dispatch \
//!     --owner octo-org --repo service --workflow CI \
//!     --ref main --sha 9fceb02 --input version=1.0.0
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod observability;
mod settings;

use commands::DispatchArgs;
use observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "actions-relay")]
#[command(about = "Dispatch GitHub Actions workflows and track their runs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Workflows file (JSON) used for selection and lookup by name
    #[arg(long, env = "ACTIONS_RELAY_WORKFLOWS_FILE", global = true)]
    workflows: Option<PathBuf>,

    /// Log format
    #[arg(
        long,
        env = "ACTIONS_RELAY_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch one workflow and monitor its run
    Dispatch {
        /// Repository owner
        #[arg(long)]
        owner: String,
        /// Repository name
        #[arg(long)]
        repo: String,
        /// Workflow id, name or path from the workflows file
        #[arg(long)]
        workflow: String,
        /// Branch or tag to run on
        #[arg(long = "ref")]
        git_ref: String,
        /// Commit the dispatch is for
        #[arg(long)]
        sha: String,
        /// Workflow input as KEY=VALUE; repeatable
        #[arg(long = "input", value_parser = commands::parse_input)]
        inputs: Vec<(String, String)>,
        /// Return after dispatching instead of waiting for the run
        #[arg(long)]
        no_wait: bool,
    },
    /// Decode a webhook payload and route it
    HandleEvent {
        /// Value of the X-GitHub-Event header, e.g. push or workflow_run
        #[arg(long)]
        event: String,
        /// Payload file, or - for stdin
        #[arg(long)]
        payload: PathBuf,
    },
    /// Print the run records of a repository as JSON
    Runs {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// Maximum number of records, newest first
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Check that the database is reachable
    CheckDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.log_format)?;

    let workflows = cli.workflows.as_deref();
    let result = match cli.command {
        Command::Dispatch {
            owner,
            repo,
            workflow,
            git_ref,
            sha,
            inputs,
            no_wait,
        } => {
            let args = DispatchArgs {
                owner,
                repo,
                workflow,
                git_ref,
                sha,
                inputs,
                no_wait,
            };
            commands::dispatch(args, workflows).await
        }
        Command::HandleEvent { event, payload } => {
            commands::handle_event(&event, &payload, workflows).await
        }
        Command::Runs { owner, repo, limit } => commands::list_runs(owner, repo, limit).await,
        Command::CheckDb => commands::check_db().await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "actions-relay failed");
    }
    telemetry.shutdown();
    result
}
