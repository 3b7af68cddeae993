//! Inputs handed to the tracking core by the event-handling layer.

use serde::{Deserialize, Serialize};

use crate::{
    CommitSha, DispatchId, GitRef, ObservedRun, OwnerName, RepositoryName, Timestamp,
    WorkflowId, WorkflowInputs, WorkflowName, WorkflowRef,
};

/// Everything needed to dispatch one workflow and follow the resulting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Correlates the dispatch call and its monitor in logs.
    pub dispatch_id: DispatchId,
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow: WorkflowRef,
    /// Ref the workflow runs on.
    pub git_ref: GitRef,
    /// Commit that triggered the dispatch.
    pub commit_sha: CommitSha,
    pub inputs: WorkflowInputs,
}

impl DispatchRequest {
    /// Creates a request with a fresh [`DispatchId`].
    pub fn new(
        owner: OwnerName,
        repo: RepositoryName,
        workflow: WorkflowRef,
        git_ref: GitRef,
        commit_sha: CommitSha,
        inputs: WorkflowInputs,
    ) -> Self {
        Self {
            dispatch_id: DispatchId::new_random(),
            owner,
            repo,
            workflow,
            git_ref,
            commit_sha,
            inputs,
        }
    }
}

/// A run-status push from the platform (a `workflow_run` webhook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusEvent {
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow_id: WorkflowId,
    pub workflow_name: WorkflowName,
    pub commit_sha: CommitSha,
    pub git_ref: GitRef,
    /// The run as described by the event.
    pub run: ObservedRun,
    /// When the platform last changed the run; used as the completion time
    /// when the event reports a completed run.
    pub updated_at: Option<Timestamp>,
}
