//! Subcommand implementations and service wiring.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use github::{GitHubActionsClient, GitHubConfig};
use listener::{ConfiguredWorkflows, EventRouter, InboundEvent, RouteOutcome};
use runs::{
    CommitSha, DispatchRequest, GitRef, OwnerName, RepositoryName, WorkflowControl,
    WorkflowInputs,
};
use serde_json::json;
use store::{PostgresRunStore, StoreConfig};
use tracing::{info, warn};
use tracker::{
    ConnectionState, Dispatcher, GuardedStore, Monitor, MonitorSettings, Orchestrator,
    RunEventHandler,
};

use crate::settings;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Opens the run-record store when a database is configured.
///
/// An unreachable database is not an error: the returned guard simply
/// reports itself unavailable.
pub async fn connect_store() -> anyhow::Result<GuardedStore> {
    let Some(config) = StoreConfig::from_env()? else {
        info!("No database configured; run records disabled");
        return Ok(GuardedStore::disabled());
    };

    let postgres = PostgresRunStore::connect_lazy(&config)?;
    let guard = GuardedStore::new(Arc::new(postgres.clone()), ConnectionState::new());
    if guard.check().await {
        if let Err(e) = postgres.ensure_schema().await {
            warn!(error = %e, "Could not create the workflow_runs table; run records disabled");
            guard.state().set(false);
        }
    }
    Ok(guard)
}

fn build_orchestrator(
    store: &GuardedStore,
    monitor: MonitorSettings,
) -> anyhow::Result<Orchestrator> {
    let client = GitHubActionsClient::new(&GitHubConfig::from_env()?)?;
    let control: Arc<dyn WorkflowControl> = Arc::new(client);
    Ok(Orchestrator::new(
        Dispatcher::new(control.clone(), store.clone()),
        Monitor::new(control, store.clone(), monitor),
    ))
}

fn load_workflows(path: Option<&Path>) -> anyhow::Result<ConfiguredWorkflows> {
    match path {
        Some(path) => Ok(ConfiguredWorkflows::load(path)?),
        None => Ok(ConfiguredWorkflows::default()),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Arguments of `actions-relay dispatch`.
#[derive(Debug)]
pub struct DispatchArgs {
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    pub git_ref: String,
    pub sha: String,
    pub inputs: Vec<(String, String)>,
    pub no_wait: bool,
}

pub async fn dispatch(args: DispatchArgs, workflows: Option<&Path>) -> anyhow::Result<()> {
    let workflows = load_workflows(workflows)?;
    let Some(entry) = workflows.find(&args.workflow) else {
        bail!(
            "workflow '{}' is not in the workflows file (set --workflows or ACTIONS_RELAY_WORKFLOWS_FILE)",
            args.workflow
        );
    };

    let mut inputs = entry.inputs.clone();
    let overrides = args
        .inputs
        .into_iter()
        .fold(WorkflowInputs::new(), |acc, (k, v)| acc.with(k, v));
    inputs.merge(&overrides);

    let request = DispatchRequest::new(
        OwnerName::new(args.owner).context("--owner must not be empty")?,
        RepositoryName::new(args.repo).context("--repo must not be empty")?,
        entry.workflow.clone(),
        GitRef::new(args.git_ref).context("--ref must not be empty")?,
        CommitSha::new(args.sha).context("--sha must not be empty")?,
        inputs,
    );

    let store = connect_store().await?;
    let orchestrator = build_orchestrator(&store, settings::monitor_settings_from_env()?)?;
    let dispatched = orchestrator.dispatch_and_monitor(request).await?;
    println!(
        "{}",
        json!({
            "dispatch_id": dispatched.dispatch_id.to_string(),
            "record_id": dispatched.record_id,
        })
    );

    if !args.no_wait {
        orchestrator.supervisor().drain().await;
    }
    Ok(())
}

pub async fn handle_event(
    event: &str,
    payload: &Path,
    workflows: Option<&Path>,
) -> anyhow::Result<()> {
    let body = read_payload(payload)?;
    let decoded = InboundEvent::decode(event, &body)?;
    let workflows = load_workflows(workflows)?;

    let store = connect_store().await?;
    let orchestrator = build_orchestrator(&store, settings::monitor_settings_from_env()?)?;
    let router = EventRouter::new(
        orchestrator.clone(),
        RunEventHandler::new(store),
        workflows,
    );

    let outcome = router.route(decoded).await;
    orchestrator.supervisor().drain().await;

    match outcome {
        RouteOutcome::Dispatched(reports) => {
            let failed: Vec<_> = reports
                .iter()
                .filter_map(|r| r.result.as_ref().err().map(|e| (&r.workflow, e)))
                .collect();
            if let Some((workflow, error)) = failed.first() {
                bail!(
                    "{} of {} dispatches failed; first: {workflow}: {error}",
                    failed.len(),
                    reports.len()
                );
            }
        }
        RouteOutcome::Recorded(outcome) => info!(outcome = ?outcome, "Run event handled"),
        RouteOutcome::Ignored => {}
    }
    Ok(())
}

pub async fn list_runs(owner: String, repo: String, limit: u32) -> anyhow::Result<()> {
    let owner = OwnerName::new(owner).context("--owner must not be empty")?;
    let repo = RepositoryName::new(repo).context("--repo must not be empty")?;

    let store = connect_store().await?;
    if !store.is_available() {
        bail!("run records are unavailable: no reachable database is configured");
    }
    let Some(records) = store.list_by_repo(&owner, &repo, limit).await else {
        bail!("listing run records failed");
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn check_db() -> anyhow::Result<()> {
    let store = connect_store().await?;
    if store.is_available() {
        println!("available");
        Ok(())
    } else {
        bail!("database unavailable")
    }
}

/// Reads a payload file, or stdin for `-`.
fn read_payload(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("reading payload from stdin")?;
        return Ok(body);
    }
    std::fs::read(path).with_context(|| format!("reading payload {}", path.display()))
}

/// Parses a `--input key=value` argument.
pub fn parse_input(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
