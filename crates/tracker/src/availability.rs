//! Availability Guard.
//!
//! Persistence is optional: with no database configured, dispatching and
//! monitoring behave exactly as with one, minus the writes. The guard is an
//! explicit value injected at start-up rather than process-wide state.
//!
//! - [`ConnectionState`] is the advisory flag. It starts `false` and is only
//!   changed by [`ConnectionState::check_and_set`] or [`ConnectionState::set`].
//! - [`GuardedStore`] is the capability object handed to the dispatcher,
//!   monitor and event handler. Every method checks the flag first and logs
//!   and swallows any [`StorageError`], so no storage failure ever escapes
//!   into a dispatch or monitor flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use runs::{
    CommitSha, NewWorkflowRun, OwnerName, RecordId, RepositoryName, RunId, RunUpdate,
    StorageError, WorkflowId, WorkflowRunRecord, WorkflowRunStore,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Shared, advisory "persistence is reachable" flag.
///
/// Cloning yields a handle to the same flag. Reads never block.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    available: Arc<AtomicBool>,
}

impl ConnectionState {
    /// A new flag, initially unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pings `store`; sets the flag to the result and returns it.
    pub async fn check_and_set(&self, store: &dyn WorkflowRunStore) -> bool {
        match store.ping().await {
            Ok(()) => {
                self.set(true);
                info!("Persistence available");
                true
            }
            Err(e) => {
                self.set(false);
                warn!(error = %e, "Persistence unavailable; continuing without run records");
                false
            }
        }
    }

    /// Pure read of the flag.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// GuardedStore
// ---------------------------------------------------------------------------

/// A [`WorkflowRunStore`] behind the availability flag.
///
/// Methods return `None`/`false` both when persistence is unavailable and
/// when the underlying call failed; failures are logged at `warn`.
#[derive(Clone)]
pub struct GuardedStore {
    store: Option<Arc<dyn WorkflowRunStore>>,
    state: ConnectionState,
}

impl GuardedStore {
    pub fn new(store: Arc<dyn WorkflowRunStore>, state: ConnectionState) -> Self {
        Self {
            store: Some(store),
            state,
        }
    }

    /// A guard with no store behind it; always unavailable.
    pub fn disabled() -> Self {
        Self {
            store: None,
            state: ConnectionState::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Re-checks reachability of the underlying store.
    pub async fn check(&self) -> bool {
        match &self.store {
            Some(store) => self.state.check_and_set(store.as_ref()).await,
            None => false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some() && self.state.is_available()
    }

    fn active(&self) -> Option<&dyn WorkflowRunStore> {
        match &self.store {
            Some(store) if self.state.is_available() => Some(store.as_ref()),
            _ => None,
        }
    }

    pub async fn insert(&self, run: NewWorkflowRun) -> Option<RecordId> {
        let store = self.active()?;
        swallow("insert", store.insert(run).await)
    }

    pub async fn update_by_id(&self, id: RecordId, update: &RunUpdate) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        swallow("update_by_id", store.update_by_id(id, update).await).unwrap_or(false)
    }

    pub async fn update_by_run_id(&self, run_id: RunId, update: &RunUpdate) -> bool {
        let Some(store) = self.active() else {
            return false;
        };
        swallow("update_by_run_id", store.update_by_run_id(run_id, update).await)
            .unwrap_or(false)
    }

    pub async fn get_by_id(&self, id: RecordId) -> Option<WorkflowRunRecord> {
        let store = self.active()?;
        swallow("get_by_id", store.get_by_id(id).await).flatten()
    }

    /// The record carrying `run_id`. A failed lookup is reported as `None`;
    /// a later write of the same run id is still rejected by the store's
    /// uniqueness rule.
    pub async fn get_by_run_id(&self, run_id: RunId) -> Option<WorkflowRunRecord> {
        let store = self.active()?;
        swallow("get_by_run_id", store.get_by_run_id(run_id).await).flatten()
    }

    pub async fn list_by_repo(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        limit: u32,
    ) -> Option<Vec<WorkflowRunRecord>> {
        let store = self.active()?;
        swallow("list_by_repo", store.list_by_repo(owner, repo, limit).await)
    }

    pub async fn find_uncorrelated(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        commit_sha: &CommitSha,
    ) -> Option<WorkflowRunRecord> {
        let store = self.active()?;
        swallow(
            "find_uncorrelated",
            store
                .find_uncorrelated(owner, repo, workflow_id, commit_sha)
                .await,
        )
        .flatten()
    }
}

impl std::fmt::Debug for GuardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStore")
            .field("configured", &self.store.is_some())
            .field("available", &self.state.is_available())
            .finish()
    }
}

fn swallow<T>(operation: &'static str, result: Result<T, StorageError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Storage operation failed; continuing without it");
            None
        }
    }
}
