//! Monitor: poll a dispatched workflow until its run completes.
//!
//! GitHub does not return the id of the run a dispatch creates, so the
//! monitor binds to the most recent run of the workflow after a warm-up
//! delay and follows that run id from then on. Concurrent dispatches of the
//! same workflow within one warm-up window can be attributed to the wrong
//! run; the [`DispatchId`] on every log line is the only local correlation.
//!
//! The loop never fails. Fetch errors count toward the attempt budget,
//! storage errors are swallowed by [`GuardedStore`], and an exhausted budget
//! is reported as [`MonitorOutcome::TimedOut`].

use std::sync::Arc;
use std::time::Duration;

use runs::{
    DispatchId, DispatchRequest, ObservedRun, OwnerName, RecordId, RepositoryName, RunConclusion,
    RunId, RunState, RunUpdate, Timestamp, WorkflowControl, WorkflowId, WorkflowName,
};
use tracing::{debug, info, instrument, warn};

use crate::availability::GuardedStore;

// ---------------------------------------------------------------------------
// Settings and outcome
// ---------------------------------------------------------------------------

/// Poll-loop timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Delay before the first poll, while GitHub materialises the run.
    pub warm_up: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Number of polls before giving up.
    pub max_attempts: u32,
    /// Runs fetched per poll.
    pub page_size: u8,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            warm_up: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            max_attempts: 60,
            page_size: 5,
        }
    }
}

/// How a monitor invocation ended.
///
/// Informational only; the persisted record stays the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The followed run reached `completed`.
    Completed {
        run_id: RunId,
        conclusion: RunConclusion,
    },
    /// The attempt budget ran out first.
    TimedOut { attempts: u32 },
}

/// What one monitor invocation watches.
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub dispatch_id: DispatchId,
    pub owner: OwnerName,
    pub repo: RepositoryName,
    pub workflow_name: WorkflowName,
    pub workflow_id: WorkflowId,
    /// The record pre-created by the dispatcher, if any.
    pub record_id: Option<RecordId>,
}

impl MonitorTarget {
    pub fn for_dispatch(request: &DispatchRequest, record_id: Option<RecordId>) -> Self {
        Self {
            dispatch_id: request.dispatch_id,
            owner: request.owner.clone(),
            repo: request.repo.clone(),
            workflow_name: request.workflow.name.clone(),
            workflow_id: request.workflow.id,
            record_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation state
// ---------------------------------------------------------------------------

/// Where observations of the followed run are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    /// Nothing is persisted for this invocation.
    Detached,
    /// The tracked record. `bound` is set once the record carries the run id;
    /// `state` and `started` mirror what has been written to it.
    Record {
        id: RecordId,
        bound: bool,
        state: RunState,
        started: bool,
    },
}

/// A run the monitor is bound to.
#[derive(Debug, Clone, Copy)]
struct Followed {
    run_id: RunId,
    sink: Sink,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Polls the list-runs endpoint and mirrors the followed run into its record.
#[derive(Clone)]
pub struct Monitor {
    control: Arc<dyn WorkflowControl>,
    store: GuardedStore,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        control: Arc<dyn WorkflowControl>,
        store: GuardedStore,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            control,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Runs the poll loop to completion or timeout.
    #[instrument(
        name = "monitor",
        skip_all,
        fields(
            dispatch_id = %target.dispatch_id,
            owner = %target.owner,
            repo = %target.repo,
            workflow = %target.workflow_name,
            record_id = ?target.record_id,
        )
    )]
    pub async fn monitor(&self, target: &MonitorTarget) -> MonitorOutcome {
        let settings = self.settings;
        tokio::time::sleep(settings.warm_up).await;

        let mut followed: Option<Followed> = None;

        for attempt in 1..=settings.max_attempts {
            let mut delay = settings.poll_interval;

            match self
                .control
                .list_runs(
                    &target.owner,
                    &target.repo,
                    target.workflow_id,
                    settings.page_size,
                )
                .await
            {
                Err(e) => {
                    warn!(attempt, status = ?e.status, error = %e, "Polling workflow runs failed");
                    if let Some(after) = e.retry.min_delay() {
                        delay = delay.max(after);
                    }
                }
                Ok(runs) => match select(&runs, followed.as_ref()) {
                    None => debug!(attempt, "No matching run visible yet"),
                    Some(run) => {
                        let current = match followed {
                            Some(f) => f,
                            None => {
                                info!(run_id = %run.id, attempt, "Bound to workflow run");
                                Followed {
                                    run_id: run.id,
                                    sink: initial_sink(target.record_id),
                                }
                            }
                        };
                        let current = Followed {
                            sink: self.record(current, run).await,
                            ..current
                        };
                        followed = Some(current);

                        if let RunState::Completed(conclusion) = run.state() {
                            log_conclusion(run.id, conclusion);
                            return MonitorOutcome::Completed {
                                run_id: run.id,
                                conclusion,
                            };
                        }
                        debug!(attempt, run_id = %run.id, state = %run.state(), "Run not finished");
                    }
                },
            }

            if attempt < settings.max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            attempts = settings.max_attempts,
            run_id = ?followed.map(|f| f.run_id),
            "Gave up waiting for workflow run to complete"
        );
        MonitorOutcome::TimedOut {
            attempts: settings.max_attempts,
        }
    }

    /// Writes what is new about `run` into the tracked record and returns
    /// the updated sink.
    async fn record(&self, followed: Followed, run: &ObservedRun) -> Sink {
        let Sink::Record {
            id,
            mut bound,
            mut state,
            mut started,
        } = followed.sink
        else {
            return Sink::Detached;
        };
        if !self.store.is_available() {
            return followed.sink;
        }

        if !bound {
            match self.store.get_by_run_id(run.id).await {
                Some(existing) if existing.id != id => {
                    warn!(
                        run_id = %run.id,
                        claimed_by = %existing.id,
                        "Run already belongs to another record; not persisting"
                    );
                    return Sink::Detached;
                }
                Some(existing) => {
                    bound = true;
                    state = existing.state;
                    started = existing.started_at.is_some();
                }
                None => {
                    if self.bound_elsewhere(id, run.id).await {
                        return Sink::Detached;
                    }
                    let observed = run.state();
                    let update = progress(observed, run.started_at).with_run_id(run.id);
                    if self.store.update_by_id(id, &update).await {
                        debug!(run_id = %run.id, "Record correlated with run");
                        return Sink::Record {
                            id,
                            bound: true,
                            state: state.advance(observed),
                            started: run.started_at.is_some(),
                        };
                    }
                    // The record may have been bound between the read and the write.
                    if self.bound_elsewhere(id, run.id).await {
                        return Sink::Detached;
                    }
                    return followed.sink;
                }
            }
        }

        let next = state.advance(run.state());
        let newly_started = !started && run.started_at.is_some();
        if next != state || newly_started {
            let start = if newly_started { run.started_at } else { None };
            if self.store.update_by_id(id, &progress(next, start)).await {
                state = next;
                started |= newly_started;
            }
        }

        Sink::Record {
            id,
            bound,
            state,
            started,
        }
    }

    /// `true` when record `id` already carries a run other than `run_id`.
    async fn bound_elsewhere(&self, id: RecordId, run_id: RunId) -> bool {
        match self.store.get_by_id(id).await.and_then(|r| r.run_id) {
            Some(carried) if carried != run_id => {
                warn!(
                    run_id = %run_id,
                    carried = %carried,
                    "Record already follows another run; not persisting"
                );
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// The first run of the page until bound, then the followed run if present.
fn select<'a>(runs: &'a [ObservedRun], followed: Option<&Followed>) -> Option<&'a ObservedRun> {
    match followed {
        None => runs.first(),
        Some(f) => runs.iter().find(|r| r.id == f.run_id),
    }
}

fn initial_sink(record_id: Option<RecordId>) -> Sink {
    match record_id {
        Some(id) => Sink::Record {
            id,
            bound: false,
            state: RunState::Queued,
            started: false,
        },
        None => Sink::Detached,
    }
}

/// State and timestamps for one observation. A completed state carries its
/// completion time.
fn progress(state: RunState, started_at: Option<Timestamp>) -> RunUpdate {
    let update = RunUpdate::new()
        .with_state(state)
        .with_started_at(started_at);
    match state {
        RunState::Completed(conclusion) => update.completed(conclusion, Timestamp::now()),
        _ => update,
    }
}

fn log_conclusion(run_id: RunId, conclusion: RunConclusion) {
    if conclusion.is_success() {
        info!(run_id = %run_id, conclusion = %conclusion, "Workflow run succeeded");
    } else {
        warn!(run_id = %run_id, conclusion = %conclusion, "Workflow run did not succeed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::ConnectionState;
    use crate::testing::{
        completed, in_progress, new_run, queued, request, FlakyStore, ScriptedControl,
    };
    use runs::{FetchError, RetryPolicy, RunStatus, WorkflowRunStore};

    fn defaults() -> MonitorSettings {
        MonitorSettings::default()
    }

    fn guarded(store: Arc<FlakyStore>) -> GuardedStore {
        let state = ConnectionState::new();
        state.set(true);
        GuardedStore::new(store, state)
    }

    async fn tracked(store: &FlakyStore) -> (MonitorTarget, RecordId) {
        let id = store.insert(new_run()).await.unwrap();
        (MonitorTarget::for_dispatch(&request(), Some(id)), id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_then_success_updates_record() {
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(999)])
                .then(vec![completed(999, RunConclusion::Success)]),
        );
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        let monitor = Monitor::new(control.clone(), guarded(store.clone()), defaults());

        let started = tokio::time::Instant::now();
        let outcome = monitor.monitor(&target).await;

        assert_eq!(
            outcome,
            MonitorOutcome::Completed {
                run_id: RunId::new(999),
                conclusion: RunConclusion::Success
            }
        );
        assert_eq!(control.list_calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(15));

        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(999)));
        assert_eq!(record.state, RunState::Completed(RunConclusion::Success));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pages_then_queued_then_failure() {
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![])
                .then(vec![])
                .then(vec![queued(7)])
                .then(vec![queued(7)])
                .then(vec![completed(7, RunConclusion::Failure)]),
        );
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        let monitor = Monitor::new(control.clone(), guarded(store.clone()), defaults());

        let outcome = monitor.monitor(&target).await;

        assert!(matches!(
            outcome,
            MonitorOutcome::Completed {
                conclusion: RunConclusion::Failure,
                ..
            }
        ));
        assert_eq!(control.list_calls(), 5);
        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(7)));
        assert_eq!(record.status(), RunStatus::Completed);
        assert_eq!(record.conclusion(), Some(RunConclusion::Failure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_run_binds_record_without_advancing() {
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![queued(7)])
                .otherwise(vec![]),
        );
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        let settings = MonitorSettings {
            max_attempts: 2,
            ..defaults()
        };
        let monitor = Monitor::new(control, guarded(store.clone()), settings);

        monitor.monitor(&target).await;

        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(7)));
        assert_eq!(record.status(), RunStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_times_out_and_leaves_in_progress() {
        let control = Arc::new(ScriptedControl::new().otherwise(vec![in_progress(5)]));
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        let monitor = Monitor::new(control.clone(), guarded(store.clone()), defaults());

        let started = tokio::time::Instant::now();
        let outcome = monitor.monitor(&target).await;

        assert_eq!(outcome, MonitorOutcome::TimedOut { attempts: 60 });
        assert_eq!(control.list_calls(), 60);
        assert_eq!(started.elapsed(), Duration::from_secs(5 + 59 * 10));
        let record = store.record(id);
        assert_eq!(record.status(), RunStatus::InProgress);
        assert_eq!(record.completed_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_run_is_written_once() {
        let control = Arc::new(ScriptedControl::new().otherwise(vec![in_progress(5)]));
        let store = Arc::new(FlakyStore::healthy());
        let (target, _) = tracked(&store).await;
        let settings = MonitorSettings {
            max_attempts: 4,
            ..defaults()
        };
        let monitor = Monitor::new(control, guarded(store.clone()), settings);
        let before = store.calls();

        monitor.monitor(&target).await;

        // run lookup, record lookup, correlating write
        assert_eq!(store.calls() - before, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_never_regresses() {
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(3)])
                .then(vec![queued(3)])
                .otherwise(vec![queued(3)]),
        );
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        let settings = MonitorSettings {
            max_attempts: 3,
            ..defaults()
        };
        let monitor = Monitor::new(control, guarded(store.clone()), settings);

        monitor.monitor(&target).await;

        assert_eq!(store.record(id).status(), RunStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_count_toward_budget_and_honour_retry_hint() {
        let control = Arc::new(
            ScriptedControl::new()
                .then_error(FetchError {
                    status: Some(429),
                    message: "rate limited".into(),
                    retry: RetryPolicy::Retryable {
                        after: Some(Duration::from_secs(60)),
                    },
                })
                .then_error(FetchError::transport("connection reset"))
                .then(vec![completed(11, RunConclusion::Cancelled)]),
        );
        let monitor = Monitor::new(control.clone(), GuardedStore::disabled(), defaults());

        let started = tokio::time::Instant::now();
        let outcome = monitor
            .monitor(&MonitorTarget::for_dispatch(&request(), None))
            .await;

        assert!(matches!(outcome, MonitorOutcome::Completed { .. }));
        assert_eq!(control.list_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(5 + 60 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_alone_exhaust_budget() {
        let control = Arc::new(
            (0..3).fold(ScriptedControl::new(), |c, _| {
                c.then_error(FetchError::transport("unreachable"))
            }),
        );
        let settings = MonitorSettings {
            max_attempts: 3,
            ..defaults()
        };
        let monitor = Monitor::new(control, GuardedStore::disabled(), settings);

        let outcome = monitor
            .monitor(&MonitorTarget::for_dispatch(&request(), None))
            .await;

        assert_eq!(outcome, MonitorOutcome::TimedOut { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_followed_run_is_tracked_by_id_not_position() {
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(10)])
                .then(vec![queued(11), in_progress(10)])
                .then(vec![queued(11), completed(10, RunConclusion::Success)]),
        );
        let monitor = Monitor::new(control, GuardedStore::disabled(), defaults());

        let outcome = monitor
            .monitor(&MonitorTarget::for_dispatch(&request(), None))
            .await;

        assert_eq!(
            outcome,
            MonitorOutcome::Completed {
                run_id: RunId::new(10),
                conclusion: RunConclusion::Success
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_claimed_by_other_record_is_not_written() {
        let store = Arc::new(FlakyStore::healthy());
        let mut other = new_run();
        other.run_id = Some(RunId::new(999));
        let other_id = store.insert(other).await.unwrap();
        let (target, id) = tracked(&store).await;

        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(999)])
                .then(vec![completed(999, RunConclusion::Success)]),
        );
        let monitor = Monitor::new(control, guarded(store.clone()), defaults());

        let outcome = monitor.monitor(&target).await;

        assert!(matches!(outcome, MonitorOutcome::Completed { .. }));
        let ours = store.record(id);
        assert_eq!(ours.run_id, None);
        assert_eq!(ours.status(), RunStatus::Queued);
        assert_eq!(store.record(other_id).status(), RunStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_already_bound_by_event_handler_keeps_advancing() {
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        store
            .update_by_id(id, &RunUpdate::new().with_run_id(RunId::new(4)))
            .await
            .unwrap();

        let control = Arc::new(
            ScriptedControl::new().then(vec![completed(4, RunConclusion::TimedOut)]),
        );
        let monitor = Monitor::new(control, guarded(store.clone()), defaults());

        monitor.monitor(&target).await;

        let record = store.record(id);
        assert_eq!(record.state, RunState::Completed(RunConclusion::TimedOut));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_bound_to_another_run_keeps_its_own_state() {
        let store = Arc::new(FlakyStore::healthy());
        let (target, id) = tracked(&store).await;
        store
            .update_by_id(
                id,
                &RunUpdate::new()
                    .with_run_id(RunId::new(4))
                    .with_state(RunState::InProgress),
            )
            .await
            .unwrap();

        let control = Arc::new(
            ScriptedControl::new().then(vec![completed(9, RunConclusion::Failure)]),
        );
        let monitor = Monitor::new(control, guarded(store.clone()), defaults());

        let outcome = monitor.monitor(&target).await;

        assert_eq!(
            outcome,
            MonitorOutcome::Completed {
                run_id: RunId::new(9),
                conclusion: RunConclusion::Failure
            }
        );
        let record = store.record(id);
        assert_eq!(record.run_id, Some(RunId::new(4)));
        assert_eq!(record.state, RunState::InProgress);
        assert!(record.completed_at.is_none());
        assert!(store.get_by_run_id(RunId::new(9)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_persistence_makes_no_store_calls() {
        let store = Arc::new(FlakyStore::healthy());
        let id = store.insert(new_run()).await.unwrap();
        let before = store.calls();
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(1)])
                .then(vec![completed(1, RunConclusion::Success)]),
        );
        let monitor = Monitor::new(
            control,
            GuardedStore::new(store.clone(), ConnectionState::new()),
            defaults(),
        );

        let outcome = monitor
            .monitor(&MonitorTarget::for_dispatch(&request(), Some(id)))
            .await;

        assert!(matches!(outcome, MonitorOutcome::Completed { .. }));
        assert_eq!(store.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failures_do_not_stop_monitoring() {
        let store = Arc::new(FlakyStore::healthy());
        let (target, _) = tracked(&store).await;
        store.set_failing(true);
        let control = Arc::new(
            ScriptedControl::new()
                .then(vec![in_progress(1)])
                .then(vec![completed(1, RunConclusion::Failure)]),
        );
        let monitor = Monitor::new(control, guarded(store.clone()), defaults());

        let outcome = monitor.monitor(&target).await;

        assert_eq!(
            outcome,
            MonitorOutcome::Completed {
                run_id: RunId::new(1),
                conclusion: RunConclusion::Failure
            }
        );
    }
}
