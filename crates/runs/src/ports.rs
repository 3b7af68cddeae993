//! Port traits implemented by infrastructure crates.
//!
//! The tracking core depends only on these traits. The `github` crate
//! implements [`WorkflowControl`]; the `store` crate implements
//! [`WorkflowRunStore`] for PostgreSQL and in memory. Tests substitute
//! scripted fakes.

use async_trait::async_trait;

use crate::{
    CommitSha, DispatchError, FetchError, GitRef, NewWorkflowRun, ObservedRun, OwnerName,
    RecordId, RepositoryName, RunId, RunUpdate, StorageError, WorkflowId, WorkflowInputs,
    WorkflowRunRecord,
};

/// The two GitHub Actions operations the core consumes.
#[async_trait]
pub trait WorkflowControl: Send + Sync {
    /// Requests a new run of `workflow_id` on `git_ref`.
    ///
    /// `inputs` is always sent, as an empty object when there are none.
    /// GitHub does not return the id of the run this creates.
    async fn dispatch(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        git_ref: &GitRef,
        inputs: &WorkflowInputs,
    ) -> Result<(), DispatchError>;

    /// Lists the most recent runs of `workflow_id`, newest first, at most
    /// `page_size` of them.
    async fn list_runs(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        page_size: u8,
    ) -> Result<Vec<ObservedRun>, FetchError>;
}

/// Typed CRUD over the `workflow_runs` table.
///
/// Implementations never retry internally. Updates apply only the supplied
/// fields with the rules of [`WorkflowRunRecord::apply`], refresh
/// `updated_at`, and return whether a record was updated. An empty
/// [`RunUpdate`] returns `Ok(false)` without touching storage.
#[async_trait]
pub trait WorkflowRunStore: Send + Sync {
    /// Trivial round trip proving the backend is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Creates a record and returns its id.
    async fn insert(&self, run: NewWorkflowRun) -> Result<RecordId, StorageError>;

    /// Partially updates the record with the given store id.
    ///
    /// When `update` carries a run id, the record is only touched if it
    /// carries no run yet or that same run; otherwise `Ok(false)`.
    async fn update_by_id(&self, id: RecordId, update: &RunUpdate) -> Result<bool, StorageError>;

    /// Partially updates the record carrying the given external run id.
    async fn update_by_run_id(
        &self,
        run_id: RunId,
        update: &RunUpdate,
    ) -> Result<bool, StorageError>;

    /// Reads one record by store id.
    async fn get_by_id(&self, id: RecordId) -> Result<Option<WorkflowRunRecord>, StorageError>;

    /// Reads the record carrying the given external run id.
    async fn get_by_run_id(&self, run_id: RunId)
        -> Result<Option<WorkflowRunRecord>, StorageError>;

    /// Lists records of one repository, most recently triggered first.
    async fn list_by_repo(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        limit: u32,
    ) -> Result<Vec<WorkflowRunRecord>, StorageError>;

    /// Most recent record of `workflow_id` at `commit_sha` that has no run id
    /// yet: the pre-created record a newly discovered run belongs to.
    async fn find_uncorrelated(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        commit_sha: &CommitSha,
    ) -> Result<Option<WorkflowRunRecord>, StorageError>;
}
