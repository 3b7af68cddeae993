//! In-memory implementation of [`WorkflowRunStore`].
//!
//! Deterministic and test-friendly. Applies exactly the update rules of
//! [`WorkflowRunRecord::apply`] and enforces run-id uniqueness the way the
//! PostgreSQL partial unique index does. Contents are lost on exit.

use std::sync::RwLock;

use async_trait::async_trait;
use runs::{
    CommitSha, NewWorkflowRun, OwnerName, RecordId, RepositoryName, RunId, RunUpdate,
    StorageError, Timestamp, WorkflowId, WorkflowRunRecord, WorkflowRunStore,
};

/// In-memory workflow-run store.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: RwLock<Vec<WorkflowRunRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, in insertion order.
    pub fn snapshot(&self) -> Result<Vec<WorkflowRunRecord>, StorageError> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<WorkflowRunRecord>>, StorageError> {
        self.records.read().map_err(|_| poisoned())
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Vec<WorkflowRunRecord>>, StorageError> {
        self.records.write().map_err(|_| poisoned())
    }

    fn update_where<P>(&self, update: &RunUpdate, matches: P) -> Result<bool, StorageError>
    where
        P: Fn(&WorkflowRunRecord) -> bool,
    {
        if update.is_empty() {
            return Ok(false);
        }
        let mut guard = self.write()?;
        let Some(index) = guard.iter().position(|r| matches(r)) else {
            return Ok(false);
        };

        if !guard[index].accepts(update) {
            return Ok(false);
        }
        if let Some(run_id) = update.run_id {
            let target = &guard[index];
            if target.run_id.is_none() {
                ensure_run_id_unclaimed(&guard, run_id, Some(target.id))?;
            }
        }
        Ok(guard[index].apply(update, Timestamp::now()))
    }
}

#[async_trait]
impl WorkflowRunStore for InMemoryRunStore {
    async fn ping(&self) -> Result<(), StorageError> {
        self.read().map(|_| ())
    }

    async fn insert(&self, run: NewWorkflowRun) -> Result<RecordId, StorageError> {
        let mut guard = self.write()?;
        if let Some(run_id) = run.run_id {
            ensure_run_id_unclaimed(&guard, run_id, None)?;
        }
        let id = RecordId::new(guard.len() as i64 + 1);
        guard.push(WorkflowRunRecord::from_new(id, run, Timestamp::now()));
        Ok(id)
    }

    async fn update_by_id(&self, id: RecordId, update: &RunUpdate) -> Result<bool, StorageError> {
        self.update_where(update, |r| r.id == id)
    }

    async fn update_by_run_id(
        &self,
        run_id: RunId,
        update: &RunUpdate,
    ) -> Result<bool, StorageError> {
        self.update_where(update, |r| r.run_id == Some(run_id))
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<WorkflowRunRecord>, StorageError> {
        Ok(self.read()?.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_run_id(
        &self,
        run_id: RunId,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        Ok(self
            .read()?
            .iter()
            .find(|r| r.run_id == Some(run_id))
            .cloned())
    }

    async fn list_by_repo(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        limit: u32,
    ) -> Result<Vec<WorkflowRunRecord>, StorageError> {
        let mut rows: Vec<_> = self
            .read()?
            .iter()
            .filter(|r| &r.owner == owner && &r.repo == repo)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.triggered_at, b.id).cmp(&(a.triggered_at, a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn find_uncorrelated(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        commit_sha: &CommitSha,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        Ok(self
            .read()?
            .iter()
            .filter(|r| {
                r.run_id.is_none()
                    && &r.owner == owner
                    && &r.repo == repo
                    && r.workflow_id == workflow_id
                    && &r.commit_sha == commit_sha
            })
            .max_by_key(|r| (r.triggered_at, r.id))
            .cloned())
    }
}

fn ensure_run_id_unclaimed(
    records: &[WorkflowRunRecord],
    run_id: RunId,
    except: Option<RecordId>,
) -> Result<(), StorageError> {
    match records
        .iter()
        .find(|r| r.run_id == Some(run_id) && Some(r.id) != except)
    {
        Some(owner) => Err(StorageError::Conflict {
            message: format!("run {run_id} is already carried by record {}", owner.id),
        }),
        None => Ok(()),
    }
}

fn poisoned() -> StorageError {
    StorageError::Connection {
        message: "in-memory store lock poisoned".to_string(),
    }
}
