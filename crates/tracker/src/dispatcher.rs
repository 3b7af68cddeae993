//! Dispatcher: pre-create a `queued` record, then request the run.

use std::sync::Arc;

use runs::{
    DispatchError, DispatchRequest, NewWorkflowRun, RecordId, RunState, Timestamp,
    WorkflowControl,
};
use tracing::{error, info, instrument};

use crate::availability::GuardedStore;

/// Issues workflow-dispatch calls.
#[derive(Clone)]
pub struct Dispatcher {
    control: Arc<dyn WorkflowControl>,
    store: GuardedStore,
}

impl Dispatcher {
    pub fn new(control: Arc<dyn WorkflowControl>, store: GuardedStore) -> Self {
        Self { control, store }
    }

    /// Dispatches `request.workflow` on `request.git_ref`.
    ///
    /// When persistence is available a `queued` record without a run id is
    /// inserted first; its id is returned on success. A failed insert only
    /// means no id is returned. A failed dispatch returns the
    /// [`DispatchError`] and leaves the inserted record `queued`.
    #[instrument(
        name = "dispatch",
        skip_all,
        fields(
            dispatch_id = %request.dispatch_id,
            owner = %request.owner,
            repo = %request.repo,
            workflow = %request.workflow.name,
            git_ref = %request.git_ref,
        )
    )]
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
    ) -> Result<Option<RecordId>, DispatchError> {
        let record_id = self.store.insert(queued_record(request)).await;

        if let Err(e) = self
            .control
            .dispatch(
                &request.owner,
                &request.repo,
                request.workflow.id,
                &request.git_ref,
                &request.inputs,
            )
            .await
        {
            error!(
                record_id = ?record_id,
                status = ?e.status(),
                error = %e,
                "Workflow dispatch failed"
            );
            return Err(e);
        }

        info!(record_id = ?record_id, "Workflow dispatched");
        Ok(record_id)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn queued_record(request: &DispatchRequest) -> NewWorkflowRun {
    NewWorkflowRun {
        run_id: None,
        owner: request.owner.clone(),
        repo: request.repo.clone(),
        workflow_name: request.workflow.name.clone(),
        workflow_id: request.workflow.id,
        commit_sha: request.commit_sha.clone(),
        git_ref: request.git_ref.clone(),
        input_value: request.inputs.to_record_value(),
        state: RunState::Queued,
        triggered_at: Timestamp::now(),
        started_at: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::ConnectionState;
    use crate::testing::{request, FlakyStore, ScriptedControl};
    use runs::{RunStatus, WorkflowInputs};

    fn available(store: Arc<FlakyStore>) -> GuardedStore {
        let state = ConnectionState::new();
        state.set(true);
        GuardedStore::new(store, state)
    }

    #[tokio::test]
    async fn test_dispatch_inserts_queued_record_before_calling_api() {
        let control = Arc::new(ScriptedControl::new());
        let store = Arc::new(FlakyStore::healthy());
        let dispatcher = Dispatcher::new(control.clone(), available(store.clone()));

        let record_id = dispatcher.dispatch(&request()).await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(record_id, Some(records[0].id));
        assert_eq!(records[0].status(), RunStatus::Queued);
        assert_eq!(records[0].run_id, None);
        assert_eq!(records[0].input_value.as_deref(), Some(r#"{"version":"1.0.0"}"#));

        let calls = control.dispatches();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].workflow_id.as_u64(), 42);
        assert_eq!(calls[0].git_ref.as_str(), "main");
        assert_eq!(calls[0].inputs.get("version"), Some(&serde_json::json!("1.0.0")));
    }

    #[tokio::test]
    async fn test_rejected_dispatch_leaves_queued_record() {
        let control = Arc::new(ScriptedControl::rejecting(
            422,
            "Workflow does not have 'workflow_dispatch' trigger",
        ));
        let store = Arc::new(FlakyStore::healthy());
        let dispatcher = Dispatcher::new(control, available(store.clone()));

        let err = dispatcher.dispatch(&request()).await.unwrap_err();

        assert_eq!(err.status(), Some(422));
        assert!(err.to_string().contains("workflow_dispatch"));
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), RunStatus::Queued);
        assert_eq!(records[0].run_id, None);
    }

    #[tokio::test]
    async fn test_unavailable_persistence_still_dispatches() {
        let control = Arc::new(ScriptedControl::new());
        let store = Arc::new(FlakyStore::healthy());
        let dispatcher = Dispatcher::new(
            control.clone(),
            GuardedStore::new(store.clone(), ConnectionState::new()),
        );

        assert_eq!(dispatcher.dispatch(&request()).await.unwrap(), None);
        assert_eq!(control.dispatches().len(), 1);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_is_not_fatal() {
        let control = Arc::new(ScriptedControl::new());
        let store = Arc::new(FlakyStore::failing());
        let dispatcher = Dispatcher::new(control.clone(), available(store));

        assert_eq!(dispatcher.dispatch(&request()).await.unwrap(), None);
        assert_eq!(control.dispatches().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_still_sent() {
        let control = Arc::new(ScriptedControl::new());
        let dispatcher = Dispatcher::new(control.clone(), GuardedStore::disabled());
        let mut req = request();
        req.inputs = WorkflowInputs::new();

        dispatcher.dispatch(&req).await.unwrap();

        let calls = control.dispatches();
        assert!(calls[0].inputs.is_empty());
    }
}
