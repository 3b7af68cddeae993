//! Test doubles shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use runs::{
    CommitSha, DispatchError, DispatchRequest, FetchError, GitRef, NewWorkflowRun, ObservedRun,
    OwnerName, RecordId, RepositoryName, RunConclusion, RunId, RunState, RunStatus, RunUpdate,
    StorageError, Timestamp, WorkflowControl, WorkflowId, WorkflowInputs, WorkflowName,
    WorkflowPath, WorkflowRef, WorkflowRunRecord, WorkflowRunStore,
};
use store::InMemoryRunStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn owner() -> OwnerName {
    OwnerName::new("octo-org").unwrap()
}

pub fn repo() -> RepositoryName {
    RepositoryName::new("service").unwrap()
}

pub fn sha() -> CommitSha {
    CommitSha::new("9fceb02d0ae598e95dc970b74767f19372d61af8").unwrap()
}

pub fn ci_workflow() -> WorkflowRef {
    WorkflowRef {
        id: WorkflowId::new(42),
        name: WorkflowName::new("CI").unwrap(),
        path: WorkflowPath::new(".github/workflows/ci.yml").unwrap(),
    }
}

pub fn request() -> DispatchRequest {
    DispatchRequest::new(
        owner(),
        repo(),
        ci_workflow(),
        GitRef::new("main").unwrap(),
        sha(),
        WorkflowInputs::new().with("version", "1.0.0"),
    )
}

pub fn new_run() -> NewWorkflowRun {
    NewWorkflowRun {
        run_id: None,
        owner: owner(),
        repo: repo(),
        workflow_name: WorkflowName::new("CI").unwrap(),
        workflow_id: WorkflowId::new(42),
        commit_sha: sha(),
        git_ref: GitRef::new("main").unwrap(),
        input_value: None,
        state: RunState::Queued,
        triggered_at: Timestamp::now(),
        started_at: None,
        completed_at: None,
    }
}

pub fn observed(id: u64, status: RunStatus, conclusion: Option<RunConclusion>) -> ObservedRun {
    ObservedRun {
        id: RunId::new(id),
        status,
        conclusion,
        started_at: match status {
            RunStatus::Queued => None,
            _ => Some(Timestamp::now()),
        },
    }
}

pub fn queued(id: u64) -> ObservedRun {
    observed(id, RunStatus::Queued, None)
}

pub fn in_progress(id: u64) -> ObservedRun {
    observed(id, RunStatus::InProgress, None)
}

pub fn completed(id: u64, conclusion: RunConclusion) -> ObservedRun {
    observed(id, RunStatus::Completed, Some(conclusion))
}

// ---------------------------------------------------------------------------
// ScriptedControl
// ---------------------------------------------------------------------------

/// One recorded dispatch call.
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow_id: WorkflowId,
    pub git_ref: GitRef,
    pub inputs: WorkflowInputs,
}

/// Fake Workflow Control API.
///
/// Each `list_runs` call pops the next scripted response; once the script
/// is exhausted every call returns the fallback page.
#[derive(Default)]
pub struct ScriptedControl {
    rejection: Mutex<Option<(u16, String)>>,
    rejected_workflows: Mutex<HashMap<WorkflowId, (u16, String)>>,
    panicking: Mutex<Vec<WorkflowId>>,
    dispatches: Mutex<Vec<DispatchCall>>,
    polls: Mutex<VecDeque<Result<Vec<ObservedRun>, FetchError>>>,
    fallback: Mutex<Vec<ObservedRun>>,
    pages: Mutex<HashMap<WorkflowId, Vec<ObservedRun>>>,
    list_calls: AtomicU32,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16, message: &str) -> Self {
        let control = Self::new();
        *control.rejection.lock().unwrap() = Some((status, message.to_string()));
        control
    }

    /// Rejects dispatches of `workflow_id` only.
    pub fn rejecting_workflow(self, workflow_id: WorkflowId, status: u16, message: &str) -> Self {
        self.rejected_workflows
            .lock()
            .unwrap()
            .insert(workflow_id, (status, message.to_string()));
        self
    }

    /// Panics when `workflow_id` is dispatched.
    pub fn panicking_on(self, workflow_id: WorkflowId) -> Self {
        self.panicking.lock().unwrap().push(workflow_id);
        self
    }

    /// Page always returned for `workflow_id`, ahead of the script.
    pub fn page_for(self, workflow_id: WorkflowId, page: Vec<ObservedRun>) -> Self {
        self.pages.lock().unwrap().insert(workflow_id, page);
        self
    }

    pub fn then(self, page: Vec<ObservedRun>) -> Self {
        self.polls.lock().unwrap().push_back(Ok(page));
        self
    }

    pub fn then_error(self, error: FetchError) -> Self {
        self.polls.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn otherwise(self, page: Vec<ObservedRun>) -> Self {
        *self.fallback.lock().unwrap() = page;
        self
    }

    pub fn dispatches(&self) -> Vec<DispatchCall> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowControl for ScriptedControl {
    async fn dispatch(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        git_ref: &GitRef,
        inputs: &WorkflowInputs,
    ) -> Result<(), DispatchError> {
        let panics = self.panicking.lock().unwrap().contains(&workflow_id);
        if panics {
            panic!("scripted panic dispatching workflow {workflow_id}");
        }
        self.dispatches.lock().unwrap().push(DispatchCall {
            owner: owner.clone(),
            repo: repo.clone(),
            workflow_id,
            git_ref: git_ref.clone(),
            inputs: inputs.clone(),
        });
        let rejection = self
            .rejected_workflows
            .lock()
            .unwrap()
            .get(&workflow_id)
            .cloned()
            .or_else(|| self.rejection.lock().unwrap().clone());
        match rejection {
            Some((status, message)) => Err(DispatchError::Rejected { status, message }),
            None => Ok(()),
        }
    }

    async fn list_runs(
        &self,
        _owner: &OwnerName,
        _repo: &RepositoryName,
        workflow_id: WorkflowId,
        _page_size: u8,
    ) -> Result<Vec<ObservedRun>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(page) = self.pages.lock().unwrap().get(&workflow_id) {
            return Ok(page.clone());
        }
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// In-memory store that counts calls and can be switched into failing.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryRunStore,
    failing: AtomicBool,
    calls: AtomicUsize,
    bind_after_find: Mutex<Option<RunId>>,
}

impl FlakyStore {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Binds the record returned by the next `find_uncorrelated` to `run_id`
    /// right after the lookup, as a concurrent writer would.
    pub fn bind_after_find(&self, run_id: RunId) {
        *self.bind_after_find.lock().unwrap() = Some(run_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<WorkflowRunRecord> {
        self.inner.snapshot().unwrap()
    }

    pub fn record(&self, id: RecordId) -> WorkflowRunRecord {
        self.records().into_iter().find(|r| r.id == id).unwrap()
    }

    fn enter(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Connection {
                message: "connection refused".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WorkflowRunStore for FlakyStore {
    async fn ping(&self) -> Result<(), StorageError> {
        self.enter()?;
        self.inner.ping().await
    }

    async fn insert(&self, run: NewWorkflowRun) -> Result<RecordId, StorageError> {
        self.enter()?;
        self.inner.insert(run).await
    }

    async fn update_by_id(&self, id: RecordId, update: &RunUpdate) -> Result<bool, StorageError> {
        self.enter()?;
        self.inner.update_by_id(id, update).await
    }

    async fn update_by_run_id(
        &self,
        run_id: RunId,
        update: &RunUpdate,
    ) -> Result<bool, StorageError> {
        self.enter()?;
        self.inner.update_by_run_id(run_id, update).await
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<WorkflowRunRecord>, StorageError> {
        self.enter()?;
        self.inner.get_by_id(id).await
    }

    async fn get_by_run_id(
        &self,
        run_id: RunId,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        self.enter()?;
        self.inner.get_by_run_id(run_id).await
    }

    async fn list_by_repo(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        limit: u32,
    ) -> Result<Vec<WorkflowRunRecord>, StorageError> {
        self.enter()?;
        self.inner.list_by_repo(owner, repo, limit).await
    }

    async fn find_uncorrelated(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        commit_sha: &CommitSha,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        self.enter()?;
        let found = self
            .inner
            .find_uncorrelated(owner, repo, workflow_id, commit_sha)
            .await?;
        let racing = self.bind_after_find.lock().unwrap().take();
        if let (Some(record), Some(run_id)) = (&found, racing) {
            self.inner
                .update_by_id(record.id, &RunUpdate::new().with_run_id(run_id))
                .await?;
        }
        Ok(found)
    }
}
