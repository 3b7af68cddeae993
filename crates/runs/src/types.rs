//! Shared value types for the workflow-run domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! lifecycle meaning: a run's state only moves forward, and a conclusion
//! exists exactly when the run has completed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, WorkflowId, WorkflowName, WorkflowPath};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 timestamp as emitted by the GitHub API.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Coarse lifecycle status of a workflow run as persisted.
///
/// Variants are declared in lifecycle order; the derived `Ord` is the
/// forward-progress order `queued < in_progress < completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Dispatched or created but not yet picked up by a runner.
    Queued,
    /// At least one job of the run is executing.
    InProgress,
    /// Terminal. No further transitions occur.
    Completed,
}

impl RunStatus {
    /// Returns the storage / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        }
    }

    /// Maps a GitHub Actions run status onto the persisted lifecycle.
    ///
    /// GitHub reports several pre-execution statuses (`requested`, `waiting`,
    /// `pending`) that all collapse into [`RunStatus::Queued`]. Returns `None`
    /// for statuses this version does not know.
    pub fn from_platform(status: &str) -> Option<Self> {
        match status {
            "queued" | "requested" | "waiting" | "pending" => Some(RunStatus::Queued),
            "in_progress" => Some(RunStatus::InProgress),
            "completed" => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            other => Err(format!("invalid run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------

/// Final outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
}

impl RunConclusion {
    /// Returns the storage / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::Skipped => "skipped",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
        }
    }

    /// Maps a GitHub Actions conclusion onto the persisted set.
    ///
    /// `neutral` counts as success, `stale` as skipped; `startup_failure` and
    /// any conclusion this version does not know count as failure.
    pub fn from_platform(conclusion: &str) -> Self {
        match conclusion {
            "success" | "neutral" => RunConclusion::Success,
            "cancelled" => RunConclusion::Cancelled,
            "skipped" | "stale" => RunConclusion::Skipped,
            "timed_out" => RunConclusion::TimedOut,
            "action_required" => RunConclusion::ActionRequired,
            _ => RunConclusion::Failure,
        }
    }

    /// Returns `true` for [`RunConclusion::Success`].
    pub fn is_success(self) -> bool {
        self == RunConclusion::Success
    }
}

impl std::fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunConclusion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunConclusion::Success),
            "failure" => Ok(RunConclusion::Failure),
            "cancelled" => Ok(RunConclusion::Cancelled),
            "skipped" => Ok(RunConclusion::Skipped),
            "timed_out" => Ok(RunConclusion::TimedOut),
            "action_required" => Ok(RunConclusion::ActionRequired),
            other => Err(format!("invalid run conclusion: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------

/// Lifecycle state of a run: status and conclusion as one value.
///
/// A conclusion can only be expressed together with
/// [`RunStatus::Completed`], so "conclusion is set if and only if the run is
/// completed" holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "conclusion", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    InProgress,
    Completed(RunConclusion),
}

impl RunState {
    /// Rebuilds a state from its persisted columns.
    ///
    /// Fails when the pair violates the completed/conclusion pairing.
    pub fn from_parts(
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    ) -> Result<Self, String> {
        match (status, conclusion) {
            (RunStatus::Queued, None) => Ok(RunState::Queued),
            (RunStatus::InProgress, None) => Ok(RunState::InProgress),
            (RunStatus::Completed, Some(c)) => Ok(RunState::Completed(c)),
            (RunStatus::Completed, None) => Err("completed run without a conclusion".into()),
            (s, Some(c)) => Err(format!("{s} run carries conclusion {c}")),
        }
    }

    /// The coarse status column value.
    pub fn status(self) -> RunStatus {
        match self {
            RunState::Queued => RunStatus::Queued,
            RunState::InProgress => RunStatus::InProgress,
            RunState::Completed(_) => RunStatus::Completed,
        }
    }

    /// The conclusion column value; `None` until completed.
    pub fn conclusion(self) -> Option<RunConclusion> {
        match self {
            RunState::Completed(c) => Some(c),
            _ => None,
        }
    }

    /// Returns `true` once the run has completed.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed(_))
    }

    /// Combines the current state with a newly observed one, never moving
    /// backwards. A completed state is final, including its conclusion.
    pub fn advance(self, next: RunState) -> RunState {
        if self.is_terminal() || next.status() < self.status() {
            self
        } else {
            next
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Completed(c) => write!(f, "completed/{c}"),
            other => f.write_str(other.status().as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Identity of a dispatchable workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowRef {
    /// Numeric workflow id used for API calls.
    pub id: WorkflowId,
    /// Display name used in logs and stored on records.
    pub name: WorkflowName,
    /// Definition file path, informational.
    pub path: WorkflowPath,
}

// ---------------------------------------------------------------------------

/// Input map passed to a `workflow_dispatch` trigger.
///
/// Always serialised as a JSON object, including when empty: workflow
/// definitions may rely on the `inputs` parameter being present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowInputs(BTreeMap<String, serde_json::Value>);

impl WorkflowInputs {
    /// Creates an empty input map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one input, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces one input.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value of one input.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns `true` when no inputs are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` into `self`; keys in `other` win.
    pub fn merge(&mut self, other: &WorkflowInputs) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Free-form value stored on the workflow-run record: the compact JSON
    /// of the input map, or `None` when there are no inputs.
    pub fn to_record_value(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            serde_json::to_string(&self.0).ok()
        }
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// One run as reported by the list-runs endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRun {
    /// Platform run id.
    pub id: RunId,
    /// Reported lifecycle status.
    pub status: RunStatus,
    /// Reported conclusion; GitHub sets it only once the run has completed.
    pub conclusion: Option<RunConclusion>,
    /// When the run started executing, if it has.
    pub started_at: Option<Timestamp>,
}

impl ObservedRun {
    /// Collapses the reported status and conclusion into a [`RunState`].
    ///
    /// GitHub briefly reports some runs as `completed` before their
    /// conclusion is known; those are treated as still in progress so that
    /// a conclusion is never invented.
    pub fn state(&self) -> RunState {
        match (self.status, self.conclusion) {
            (RunStatus::Completed, Some(c)) => RunState::Completed(c),
            (RunStatus::Completed, None) => RunState::InProgress,
            (RunStatus::InProgress, _) => RunState::InProgress,
            (RunStatus::Queued, _) => RunState::Queued,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_never_moves_backwards() {
        assert_eq!(RunState::InProgress.advance(RunState::Queued), RunState::InProgress);
        assert_eq!(RunState::Queued.advance(RunState::InProgress), RunState::InProgress);
        assert_eq!(
            RunState::InProgress.advance(RunState::Completed(RunConclusion::Failure)),
            RunState::Completed(RunConclusion::Failure)
        );
    }

    #[test]
    fn test_advance_keeps_first_conclusion() {
        let done = RunState::Completed(RunConclusion::Success);
        assert_eq!(done.advance(RunState::Completed(RunConclusion::Cancelled)), done);
        assert_eq!(done.advance(RunState::Queued), done);
    }

    #[test]
    fn test_from_parts_rejects_mismatched_conclusion() {
        assert!(RunState::from_parts(RunStatus::Completed, None).is_err());
        assert!(RunState::from_parts(RunStatus::Queued, Some(RunConclusion::Success)).is_err());
        assert_eq!(
            RunState::from_parts(RunStatus::Completed, Some(RunConclusion::TimedOut)),
            Ok(RunState::Completed(RunConclusion::TimedOut))
        );
    }

    #[test]
    fn test_platform_status_mapping() {
        assert_eq!(RunStatus::from_platform("waiting"), Some(RunStatus::Queued));
        assert_eq!(RunStatus::from_platform("requested"), Some(RunStatus::Queued));
        assert_eq!(RunStatus::from_platform("in_progress"), Some(RunStatus::InProgress));
        assert_eq!(RunStatus::from_platform("completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::from_platform("exploded"), None);
    }

    #[test]
    fn test_platform_conclusion_mapping() {
        assert_eq!(RunConclusion::from_platform("neutral"), RunConclusion::Success);
        assert_eq!(RunConclusion::from_platform("stale"), RunConclusion::Skipped);
        assert_eq!(RunConclusion::from_platform("startup_failure"), RunConclusion::Failure);
        assert_eq!(
            RunConclusion::from_platform("action_required"),
            RunConclusion::ActionRequired
        );
    }

    #[test]
    fn test_completed_without_conclusion_is_not_terminal() {
        let run = ObservedRun {
            id: RunId::new(1),
            status: RunStatus::Completed,
            conclusion: None,
            started_at: None,
        };
        assert_eq!(run.state(), RunState::InProgress);
    }

    #[test]
    fn test_inputs_serialise_as_object_even_when_empty() {
        assert_eq!(serde_json::to_string(&WorkflowInputs::new()).unwrap(), "{}");
        assert_eq!(WorkflowInputs::new().to_record_value(), None);

        let inputs = WorkflowInputs::new().with("version", "1.0.0");
        assert_eq!(inputs.to_record_value().as_deref(), Some(r#"{"version":"1.0.0"}"#));
    }
}
