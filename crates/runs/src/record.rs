//! The persisted workflow-run record and its update rules.
//!
//! A [`WorkflowRunRecord`] is created once (by the dispatcher before the
//! dispatch call, or by the run-event handler) and afterwards only changed
//! through a [`RunUpdate`]. [`WorkflowRunRecord::apply`] is the single
//! definition of what an update may change; every persistence gateway must
//! produce the same result.

use serde::{Deserialize, Serialize};

use crate::{
    CommitSha, GitRef, OwnerName, RecordId, RepositoryName, RunConclusion, RunId, RunState,
    RunStatus, Timestamp, WorkflowId, WorkflowName,
};

/// One row of the `workflow_runs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunRecord {
    /// Store-assigned sequential id.
    pub id: RecordId,
    /// External run id; `None` until the run has been correlated.
    pub run_id: Option<RunId>,
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow_name: WorkflowName,
    pub workflow_id: WorkflowId,
    pub commit_sha: CommitSha,
    pub git_ref: GitRef,
    /// Free-form dispatch input (compact JSON of the input map).
    pub input_value: Option<String>,
    /// Status and conclusion.
    pub state: RunState,
    pub triggered_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Audit column, refreshed by every update.
    pub updated_at: Timestamp,
}

impl WorkflowRunRecord {
    /// Materialises a newly inserted record.
    pub fn from_new(id: RecordId, new: NewWorkflowRun, now: Timestamp) -> Self {
        Self {
            id,
            run_id: new.run_id,
            owner: new.owner,
            repo: new.repo,
            workflow_name: new.workflow_name,
            workflow_id: new.workflow_id,
            commit_sha: new.commit_sha,
            git_ref: new.git_ref,
            input_value: new.input_value,
            state: new.state,
            triggered_at: new.triggered_at,
            started_at: new.started_at,
            completed_at: new.completed_at,
            updated_at: now,
        }
    }

    /// Coarse status column.
    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    /// Conclusion column; `None` until completed.
    pub fn conclusion(&self) -> Option<RunConclusion> {
        self.state.conclusion()
    }

    /// Applies a partial update in place.
    ///
    /// - `run_id`, `started_at` and `completed_at` are fill-once: a value
    ///   already present is never overwritten.
    /// - `state` only moves forward (see [`RunState::advance`]).
    /// - Timestamps are clamped so `triggered_at <= started_at <= completed_at`.
    /// - `updated_at` is always refreshed.
    ///
    /// An empty update is a no-op, including for `updated_at`. An update
    /// naming a run other than the one this record carries is rejected
    /// whole and returns `false`.
    pub fn apply(&mut self, update: &RunUpdate, now: Timestamp) -> bool {
        if update.is_empty() || !self.accepts(update) {
            return false;
        }
        if self.run_id.is_none() {
            self.run_id = update.run_id;
        }
        if let Some(next) = update.state {
            self.state = self.state.advance(next);
        }
        if self.started_at.is_none() {
            self.started_at = update.started_at.map(|s| s.max(self.triggered_at));
        }
        if self.completed_at.is_none() {
            self.completed_at = update.completed_at.map(|c| {
                let floor = self.started_at.unwrap_or(self.triggered_at).max(self.triggered_at);
                c.max(floor)
            });
        }
        self.updated_at = now;
        true
    }

    /// `false` when `update` names a run other than the one already carried.
    pub fn accepts(&self, update: &RunUpdate) -> bool {
        match (self.run_id, update.run_id) {
            (Some(carried), Some(named)) => carried == named,
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------

/// Fields supplied when creating a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflowRun {
    pub run_id: Option<RunId>,
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow_name: WorkflowName,
    pub workflow_id: WorkflowId,
    pub commit_sha: CommitSha,
    pub git_ref: GitRef,
    pub input_value: Option<String>,
    pub state: RunState,
    pub triggered_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------

/// A partial update: only the supplied fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub run_id: Option<RunId>,
    pub state: Option<RunState>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl RunUpdate {
    /// An update with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_started_at(mut self, started_at: Option<Timestamp>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Marks the run completed with `conclusion` at `at`.
    pub fn completed(mut self, conclusion: RunConclusion, at: Timestamp) -> Self {
        self.state = Some(RunState::Completed(conclusion));
        self.completed_at = Some(at);
        self
    }

    /// Returns `true` when no field is supplied.
    pub fn is_empty(&self) -> bool {
        self.run_id.is_none()
            && self.state.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }
}
