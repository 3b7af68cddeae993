//! Applies `workflow_run` status pushes to workflow-run records.
//!
//! The webhook-driven counterpart of the monitor: the run id is known up
//! front, so the handler updates the record already carrying it, binds the
//! pre-created record of the same workflow and commit, or creates a record.

use runs::{NewWorkflowRun, RecordId, RunState, RunStatusEvent, RunUpdate, Timestamp};
use tracing::{debug, info, instrument};

use crate::availability::GuardedStore;

/// What [`RunEventHandler::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The record carrying the run id was updated.
    Updated(RecordId),
    /// A pre-created record without a run id was bound to the run.
    Correlated(RecordId),
    /// No record matched; a new one was inserted.
    Created(RecordId),
    /// Nothing was persisted: persistence is unavailable or the write failed.
    Skipped,
}

/// Persists run-status events.
#[derive(Debug, Clone)]
pub struct RunEventHandler {
    store: GuardedStore,
}

impl RunEventHandler {
    pub fn new(store: GuardedStore) -> Self {
        Self { store }
    }

    #[instrument(
        name = "run_event",
        skip_all,
        fields(
            owner = %event.owner,
            repo = %event.repo,
            workflow = %event.workflow_name,
            run_id = %event.run.id,
            state = %event.run.state(),
        )
    )]
    pub async fn apply(&self, event: &RunStatusEvent) -> EventOutcome {
        if !self.store.is_available() {
            debug!("Persistence unavailable; run event not recorded");
            return EventOutcome::Skipped;
        }

        let state = event.run.state();
        let observed_at = event.updated_at.unwrap_or_else(Timestamp::now);
        let mut update = RunUpdate::new()
            .with_state(state)
            .with_started_at(event.run.started_at);
        if let RunState::Completed(conclusion) = state {
            update = update.completed(conclusion, observed_at);
        }

        if let Some(existing) = self.store.get_by_run_id(event.run.id).await {
            return if self.store.update_by_run_id(event.run.id, &update).await {
                debug!(record_id = %existing.id, "Record updated from run event");
                EventOutcome::Updated(existing.id)
            } else {
                EventOutcome::Skipped
            };
        }

        if let Some(open) = self
            .store
            .find_uncorrelated(
                &event.owner,
                &event.repo,
                event.workflow_id,
                &event.commit_sha,
            )
            .await
        {
            let correlate = update.with_run_id(event.run.id);
            if self.store.update_by_id(open.id, &correlate).await {
                info!(record_id = %open.id, "Record correlated from run event");
                return EventOutcome::Correlated(open.id);
            }
            // Bound to another run since the lookup; this run gets its own record.
            let taken = self
                .store
                .get_by_id(open.id)
                .await
                .and_then(|r| r.run_id)
                .is_some_and(|carried| carried != event.run.id);
            if !taken {
                return EventOutcome::Skipped;
            }
            debug!(record_id = %open.id, "Pre-created record was bound to another run");
        }

        let triggered_at = event.run.started_at.unwrap_or(observed_at);
        let created = self
            .store
            .insert(NewWorkflowRun {
                run_id: Some(event.run.id),
                owner: event.owner.clone(),
                repo: event.repo.clone(),
                workflow_name: event.workflow_name.clone(),
                workflow_id: event.workflow_id,
                commit_sha: event.commit_sha.clone(),
                git_ref: event.git_ref.clone(),
                input_value: None,
                state,
                triggered_at,
                started_at: event.run.started_at,
                completed_at: state.is_terminal().then_some(observed_at),
            })
            .await;

        match created {
            Some(id) => {
                info!(record_id = %id, "Record created from run event");
                EventOutcome::Created(id)
            }
            None => EventOutcome::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::availability::ConnectionState;
    use crate::testing::{completed, in_progress, new_run, owner, repo, sha, FlakyStore};
    use runs::{
        GitRef, ObservedRun, RunConclusion, RunId, RunStatus, WorkflowId, WorkflowName,
        WorkflowRunStore,
    };

    fn event(run: ObservedRun) -> RunStatusEvent {
        RunStatusEvent {
            owner: owner(),
            repo: repo(),
            workflow_id: WorkflowId::new(42),
            workflow_name: WorkflowName::new("CI").unwrap(),
            commit_sha: sha(),
            git_ref: GitRef::new("main").unwrap(),
            run,
            updated_at: None,
        }
    }

    fn handler(store: Arc<FlakyStore>) -> RunEventHandler {
        let state = ConnectionState::new();
        state.set(true);
        RunEventHandler::new(GuardedStore::new(store, state))
    }

    #[tokio::test]
    async fn test_event_binds_pre_created_record() {
        let store = Arc::new(FlakyStore::healthy());
        let id = store.insert(new_run()).await.unwrap();

        let outcome = handler(store.clone()).apply(&event(in_progress(77))).await;

        assert_eq!(outcome, EventOutcome::Correlated(id));
        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(77)));
        assert_eq!(record.status(), RunStatus::InProgress);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_event_updates_record_carrying_run_id() {
        let store = Arc::new(FlakyStore::healthy());
        let mut run = new_run();
        run.run_id = Some(RunId::new(77));
        let id = store.insert(run).await.unwrap();

        let outcome = handler(store.clone())
            .apply(&event(completed(77, RunConclusion::Cancelled)))
            .await;

        assert_eq!(outcome, EventOutcome::Updated(id));
        let record = store.record(id);
        assert_eq!(record.conclusion(), Some(RunConclusion::Cancelled));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run_creates_record() {
        let store = Arc::new(FlakyStore::healthy());
        let mut already_bound = new_run();
        already_bound.run_id = Some(RunId::new(1));
        store.insert(already_bound).await.unwrap();

        let outcome = handler(store.clone())
            .apply(&event(completed(2, RunConclusion::Success)))
            .await;

        let EventOutcome::Created(id) = outcome else {
            panic!("expected a new record, got {outcome:?}");
        };
        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(2)));
        assert_eq!(record.state, RunState::Completed(RunConclusion::Success));
        assert!(record.completed_at.is_some());
        assert!(record.started_at <= record.completed_at);
    }

    #[tokio::test]
    async fn test_record_bound_concurrently_is_not_overwritten() {
        let store = Arc::new(FlakyStore::healthy());
        let id = store.insert(new_run()).await.unwrap();
        store.bind_after_find(RunId::new(4));

        let outcome = handler(store.clone())
            .apply(&event(completed(9, RunConclusion::Failure)))
            .await;

        let EventOutcome::Created(created) = outcome else {
            panic!("expected a new record, got {outcome:?}");
        };
        assert_ne!(created, id);

        let original = store.record(id);
        assert_eq!(original.run_id, Some(RunId::new(4)));
        assert_eq!(original.status(), RunStatus::Queued);
        assert!(original.completed_at.is_none());

        let record = store.record(created);
        assert_eq!(record.run_id, Some(RunId::new(9)));
        assert_eq!(record.conclusion(), Some(RunConclusion::Failure));
    }

    #[tokio::test]
    async fn test_late_in_progress_event_does_not_regress() {
        let store = Arc::new(FlakyStore::healthy());
        let mut run = new_run();
        run.run_id = Some(RunId::new(9));
        let id = store.insert(run).await.unwrap();
        let handler = handler(store.clone());

        handler
            .apply(&event(completed(9, RunConclusion::Success)))
            .await;
        handler.apply(&event(in_progress(9))).await;

        assert_eq!(store.record(id).status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_unavailable_or_failing_store_skips() {
        let store = Arc::new(FlakyStore::healthy());
        let guard = GuardedStore::new(store.clone(), ConnectionState::new());
        let unavailable = RunEventHandler::new(guard);
        let outcome = unavailable.apply(&event(in_progress(1))).await;
        assert_eq!(outcome, EventOutcome::Skipped);
        assert_eq!(store.calls(), 0);

        store.set_failing(true);
        let outcome = handler(store).apply(&event(in_progress(1))).await;
        assert_eq!(outcome, EventOutcome::Skipped);
    }
}
