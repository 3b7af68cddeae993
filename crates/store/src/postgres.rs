//! PostgreSQL implementation of [`WorkflowRunStore`].
//!
//! Every statement is parameterised; partial updates are assembled with
//! [`sqlx::QueryBuilder`] and bound values only. The fill-once and
//! forward-only update rules of [`runs::WorkflowRunRecord::apply`] are
//! expressed in SQL so that concurrent writers (monitor tasks, the run-event
//! handler, other processes) cannot regress a row between read and write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runs::{
    CommitSha, GitRef, NewWorkflowRun, OwnerName, RecordId, RepositoryName, RunConclusion, RunId,
    RunState, RunStatus, RunUpdate, StorageError, Timestamp, WorkflowId, WorkflowName,
    WorkflowRunRecord, WorkflowRunStore,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::instrument;

use crate::config::StoreConfig;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS workflow_runs (
        id BIGSERIAL PRIMARY KEY,
        run_id BIGINT,
        owner TEXT NOT NULL,
        repo TEXT NOT NULL,
        workflow_name TEXT NOT NULL,
        workflow_id BIGINT NOT NULL,
        commit_sha TEXT NOT NULL,
        git_ref TEXT NOT NULL,
        input_value TEXT,
        status TEXT NOT NULL
            CHECK (status IN ('queued', 'in_progress', 'completed')),
        conclusion TEXT
            CHECK (conclusion IN ('success', 'failure', 'cancelled', 'skipped', 'timed_out', 'action_required')),
        triggered_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT workflow_runs_conclusion_when_completed
            CHECK ((status = 'completed') = (conclusion IS NOT NULL))
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS workflow_runs_run_id_key
        ON workflow_runs (run_id) WHERE run_id IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS workflow_runs_repo_idx
        ON workflow_runs (owner, repo, triggered_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS workflow_runs_uncorrelated_idx
        ON workflow_runs (owner, repo, workflow_id, commit_sha) WHERE run_id IS NULL
    "#,
];

const COLUMNS: &str = "id, run_id, owner, repo, workflow_name, workflow_id, commit_sha, git_ref, \
     input_value, status, conclusion, triggered_at, started_at, completed_at, updated_at";

// Stored status rank; must match the declaration order of `RunStatus`.
const STATUS_RANK: &str =
    "(CASE status WHEN 'queued' THEN 0 WHEN 'in_progress' THEN 1 ELSE 2 END)";

/// PostgreSQL-backed workflow-run store.
#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Builds a pool that connects on first use.
    ///
    /// No I/O happens here, so a missing database does not fail start-up;
    /// reachability is established later through [`WorkflowRunStore::ping`].
    pub fn connect_lazy(config: &StoreConfig) -> Result<Self, runs::ConfigError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_lazy_with(config.connect_options()?);
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `workflow_runs` table and its indexes if they are missing.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error("ENSURE_SCHEMA"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowRunStore for PostgresRunStore {
    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(storage_error("PING"))
    }

    #[instrument(skip_all, fields(owner = %run.owner, repo = %run.repo, workflow = %run.workflow_name))]
    async fn insert(&self, run: NewWorkflowRun) -> Result<RecordId, StorageError> {
        let run_id = run.run_id.map(run_id_to_i64).transpose()?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO workflow_runs (
                run_id, owner, repo, workflow_name, workflow_id, commit_sha, git_ref,
                input_value, status, conclusion, triggered_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(run.owner.as_str())
        .bind(run.repo.as_str())
        .bind(run.workflow_name.as_str())
        .bind(workflow_id_to_i64(run.workflow_id)?)
        .bind(run.commit_sha.as_str())
        .bind(run.git_ref.as_str())
        .bind(run.input_value.as_deref())
        .bind(run.state.status().as_str())
        .bind(run.state.conclusion().map(RunConclusion::as_str))
        .bind(run.triggered_at.as_datetime())
        .bind(run.started_at.map(Timestamp::as_datetime))
        .bind(run.completed_at.map(Timestamp::as_datetime))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("INSERT_WORKFLOW_RUN"))?;

        Ok(RecordId::new(id))
    }

    #[instrument(skip(self, update), fields(record_id = %id))]
    async fn update_by_id(&self, id: RecordId, update: &RunUpdate) -> Result<bool, StorageError> {
        let Some(mut query) = build_update(update, UpdateTarget::Id(id))? else {
            return Ok(false);
        };
        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(storage_error("UPDATE_WORKFLOW_RUN_BY_ID"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, update), fields(run_id = %run_id))]
    async fn update_by_run_id(
        &self,
        run_id: RunId,
        update: &RunUpdate,
    ) -> Result<bool, StorageError> {
        let Some(mut query) = build_update(update, UpdateTarget::RunId(run_id))? else {
            return Ok(false);
        };
        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(storage_error("UPDATE_WORKFLOW_RUN_BY_RUN_ID"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<WorkflowRunRecord>, StorageError> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("GET_WORKFLOW_RUN_BY_ID"))?;

        row.map(WorkflowRunRecord::try_from).transpose()
    }

    async fn get_by_run_id(
        &self,
        run_id: RunId,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {COLUMNS} FROM workflow_runs WHERE run_id = $1"
        ))
        .bind(run_id_to_i64(run_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("GET_WORKFLOW_RUN_BY_RUN_ID"))?;

        row.map(WorkflowRunRecord::try_from).transpose()
    }

    async fn list_by_repo(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        limit: u32,
    ) -> Result<Vec<WorkflowRunRecord>, StorageError> {
        let rows = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {COLUMNS} FROM workflow_runs \
             WHERE owner = $1 AND repo = $2 \
             ORDER BY triggered_at DESC, id DESC \
             LIMIT $3"
        ))
        .bind(owner.as_str())
        .bind(repo.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("LIST_WORKFLOW_RUNS_BY_REPO"))?;

        rows.into_iter().map(WorkflowRunRecord::try_from).collect()
    }

    async fn find_uncorrelated(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        commit_sha: &CommitSha,
    ) -> Result<Option<WorkflowRunRecord>, StorageError> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            "SELECT {COLUMNS} FROM workflow_runs \
             WHERE owner = $1 AND repo = $2 AND workflow_id = $3 AND commit_sha = $4 \
               AND run_id IS NULL \
             ORDER BY triggered_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(owner.as_str())
        .bind(repo.as_str())
        .bind(workflow_id_to_i64(workflow_id)?)
        .bind(commit_sha.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("FIND_UNCORRELATED_WORKFLOW_RUN"))?;

        row.map(WorkflowRunRecord::try_from).transpose()
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Row selector for a partial update.
#[derive(Debug, Clone, Copy)]
enum UpdateTarget {
    Id(RecordId),
    RunId(RunId),
}

/// Assembles the UPDATE statement for `update`, or `None` for an empty update.
fn build_update(
    update: &RunUpdate,
    target: UpdateTarget,
) -> Result<Option<QueryBuilder<'static, Postgres>>, StorageError> {
    if update.is_empty() {
        return Ok(None);
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE workflow_runs SET updated_at = now()");

    if let Some(run_id) = update.run_id {
        qb.push(", run_id = COALESCE(run_id, ");
        qb.push_bind(run_id_to_i64(run_id)?);
        qb.push(")");
    }

    if let Some(state) = update.state {
        let rank = state.status() as i16;
        // Keep the stored pair when it is completed or further along.
        for (column, value) in [
            ("status", Some(state.status().as_str())),
            ("conclusion", state.conclusion().map(RunConclusion::as_str)),
        ] {
            qb.push(format!(
                ", {column} = CASE WHEN status = 'completed' OR {STATUS_RANK} > "
            ));
            qb.push_bind(rank);
            qb.push(format!(" THEN {column} ELSE "));
            qb.push_bind(value);
            qb.push(" END");
        }
    }

    if let Some(started_at) = update.started_at {
        qb.push(", started_at = COALESCE(started_at, GREATEST(triggered_at, ");
        qb.push_bind(started_at.as_datetime());
        qb.push("))");
    }

    if let Some(completed_at) = update.completed_at {
        qb.push(", completed_at = COALESCE(completed_at, GREATEST(triggered_at, started_at, ");
        qb.push_bind(completed_at.as_datetime());
        if let Some(started_at) = update.started_at {
            qb.push(", ");
            qb.push_bind(started_at.as_datetime());
        }
        qb.push("))");
    }

    match target {
        UpdateTarget::Id(id) => {
            qb.push(" WHERE id = ");
            qb.push_bind(id.as_i64());
        }
        UpdateTarget::RunId(run_id) => {
            qb.push(" WHERE run_id = ");
            qb.push_bind(run_id_to_i64(run_id)?);
        }
    }

    // A row bound to a different run is left untouched.
    if let Some(run_id) = update.run_id {
        qb.push(" AND (run_id IS NULL OR run_id = ");
        qb.push_bind(run_id_to_i64(run_id)?);
        qb.push(")");
    }

    Ok(Some(qb))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct WorkflowRunRow {
    id: i64,
    run_id: Option<i64>,
    owner: String,
    repo: String,
    workflow_name: String,
    workflow_id: i64,
    commit_sha: String,
    git_ref: String,
    input_value: Option<String>,
    status: String,
    conclusion: Option<String>,
    triggered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRunRow> for WorkflowRunRecord {
    type Error = StorageError;

    fn try_from(row: WorkflowRunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row.status.parse().map_err(invalid_row(row.id))?;
        let conclusion = row
            .conclusion
            .as_deref()
            .map(str::parse::<RunConclusion>)
            .transpose()
            .map_err(invalid_row(row.id))?;
        let state = RunState::from_parts(status, conclusion).map_err(invalid_row(row.id))?;

        Ok(WorkflowRunRecord {
            id: RecordId::new(row.id),
            run_id: row
                .run_id
                .map(|v| u64::try_from(v).map(RunId::new))
                .transpose()
                .map_err(|e| invalid_row(row.id)(e.to_string()))?,
            owner: non_empty(OwnerName::new(row.owner), row.id, "owner")?,
            repo: non_empty(RepositoryName::new(row.repo), row.id, "repo")?,
            workflow_name: non_empty(WorkflowName::new(row.workflow_name), row.id, "workflow_name")?,
            workflow_id: u64::try_from(row.workflow_id)
                .map(WorkflowId::new)
                .map_err(|e| invalid_row(row.id)(e.to_string()))?,
            commit_sha: non_empty(CommitSha::new(row.commit_sha), row.id, "commit_sha")?,
            git_ref: non_empty(GitRef::new(row.git_ref), row.id, "git_ref")?,
            input_value: row.input_value,
            state,
            triggered_at: Timestamp::from_utc(row.triggered_at),
            started_at: row.started_at.map(Timestamp::from_utc),
            completed_at: row.completed_at.map(Timestamp::from_utc),
            updated_at: Timestamp::from_utc(row.updated_at),
        })
    }
}

fn non_empty<T>(value: Option<T>, id: i64, column: &str) -> Result<T, StorageError> {
    value.ok_or_else(|| invalid_row(id)(format!("empty {column}")))
}

fn invalid_row(id: i64) -> impl Fn(String) -> StorageError {
    move |message| StorageError::InvalidRow {
        message: format!("workflow_runs row {id}: {message}"),
    }
}

fn run_id_to_i64(run_id: RunId) -> Result<i64, StorageError> {
    i64::try_from(run_id.as_u64()).map_err(|_| StorageError::Query {
        operation: "ENCODE_RUN_ID",
        message: format!("run id {run_id} exceeds BIGINT range"),
    })
}

fn workflow_id_to_i64(workflow_id: WorkflowId) -> Result<i64, StorageError> {
    i64::try_from(workflow_id.as_u64()).map_err(|_| StorageError::Query {
        operation: "ENCODE_WORKFLOW_ID",
        message: format!("workflow id {workflow_id} exceeds BIGINT range"),
    })
}

/// Classifies a sqlx error for the given gateway operation.
fn storage_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict {
            message: format!("{operation}: {db}"),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Connection {
            message: format!("{operation}: {err}"),
        },
        _ => StorageError::Query {
            operation,
            message: err.to_string(),
        },
    }
}
