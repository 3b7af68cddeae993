//! Decoding of GitHub webhook payloads.
//!
//! Payloads arrive already authenticated; this module only turns the two
//! event kinds the tracker reacts to into domain values:
//!
//! | `X-GitHub-Event` | Result |
//! |------------------|--------|
//! | `push` | [`InboundEvent::Push`], or `Ignored` for branch deletions |
//! | `workflow_run` | [`InboundEvent::WorkflowRun`] |
//! | anything else | [`InboundEvent::Ignored`] |

use runs::{
    CommitSha, GitRef, ObservedRun, OwnerName, RepositoryName, RunConclusion, RunId,
    RunStatus, RunStatusEvent, Timestamp, WorkflowId, WorkflowName,
};
use serde::Deserialize;
use tracing::debug;

use crate::errors::EventError;

const PUSH: &str = "push";
const WORKFLOW_RUN: &str = "workflow_run";
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Domain side
// ---------------------------------------------------------------------------

/// A push to a branch or tag.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub owner: OwnerName,
    pub repo: RepositoryName,
    /// Full ref as sent by GitHub, e.g. `refs/heads/main`.
    pub git_ref: GitRef,
    /// Commit the ref now points at.
    pub commit_sha: CommitSha,
}

/// A decoded webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Push(PushEvent),
    WorkflowRun(RunStatusEvent),
    Ignored { event: String, reason: &'static str },
}

impl InboundEvent {
    /// Decodes one delivery. `event_name` is the `X-GitHub-Event` header.
    pub fn decode(event_name: &str, body: &[u8]) -> Result<Self, EventError> {
        match event_name {
            PUSH => decode_push(body),
            WORKFLOW_RUN => decode_workflow_run(body),
            other => Ok(InboundEvent::Ignored {
                event: other.to_string(),
                reason: "event kind not handled",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload side
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: AccountPayload,
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    login: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunPayload {
    workflow_run: RunPayload,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: u64,
    name: Option<String>,
    workflow_id: u64,
    head_sha: String,
    head_branch: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    run_started_at: Option<String>,
    updated_at: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(event: &'static str, body: &'a [u8]) -> Result<T, EventError> {
    serde_json::from_slice(body).map_err(|e| EventError::Malformed {
        event,
        message: e.to_string(),
    })
}

fn required<T>(
    event: &'static str,
    field: &'static str,
    value: Option<T>,
) -> Result<T, EventError> {
    value.ok_or(EventError::MissingField { event, field })
}

fn repository(
    event: &'static str,
    payload: RepositoryPayload,
) -> Result<(OwnerName, RepositoryName), EventError> {
    let owner = payload.owner.login.or(payload.owner.name);
    Ok((
        required(event, "repository.owner.login", owner.and_then(OwnerName::new))?,
        required(event, "repository.name", RepositoryName::new(payload.name))?,
    ))
}

fn decode_push(body: &[u8]) -> Result<InboundEvent, EventError> {
    let payload: PushPayload = parse(PUSH, body)?;
    if payload.deleted || payload.after == NULL_SHA {
        debug!(git_ref = %payload.git_ref, "Ignoring ref deletion");
        return Ok(InboundEvent::Ignored {
            event: PUSH.to_string(),
            reason: "ref deleted",
        });
    }

    let (owner, repo) = repository(PUSH, payload.repository)?;
    Ok(InboundEvent::Push(PushEvent {
        owner,
        repo,
        git_ref: required(PUSH, "ref", GitRef::new(payload.git_ref))?,
        commit_sha: required(PUSH, "after", CommitSha::new(payload.after))?,
    }))
}

fn decode_workflow_run(body: &[u8]) -> Result<InboundEvent, EventError> {
    let payload: WorkflowRunPayload = parse(WORKFLOW_RUN, body)?;
    let (owner, repo) = repository(WORKFLOW_RUN, payload.repository)?;
    let run = payload.workflow_run;

    let status = run
        .status
        .as_deref()
        .and_then(RunStatus::from_platform)
        .unwrap_or(RunStatus::Queued);
    let commit_sha = required(
        WORKFLOW_RUN,
        "workflow_run.head_sha",
        CommitSha::new(run.head_sha),
    )?;
    // Runs on detached commits carry no branch; fall back to the commit.
    let git_ref = match run.head_branch.and_then(GitRef::new) {
        Some(branch) => branch,
        None => required(
            WORKFLOW_RUN,
            "workflow_run.head_branch",
            GitRef::new(commit_sha.as_str()),
        )?,
    };
    let workflow_name = run
        .name
        .and_then(WorkflowName::new)
        .or_else(|| WorkflowName::new(format!("workflow-{}", run.workflow_id)));

    Ok(InboundEvent::WorkflowRun(RunStatusEvent {
        owner,
        repo,
        workflow_id: WorkflowId::new(run.workflow_id),
        workflow_name: required(WORKFLOW_RUN, "workflow_run.name", workflow_name)?,
        commit_sha,
        git_ref,
        run: ObservedRun {
            id: RunId::new(run.id),
            status,
            conclusion: run.conclusion.as_deref().map(RunConclusion::from_platform),
            started_at: run
                .run_started_at
                .as_deref()
                .and_then(Timestamp::parse_rfc3339),
        },
        updated_at: run.updated_at.as_deref().and_then(Timestamp::parse_rfc3339),
    }))
}
