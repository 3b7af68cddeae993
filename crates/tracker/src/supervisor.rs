//! Supervision of background monitor tasks.
//!
//! Every monitor runs as its own tokio task. A lightweight watcher task per
//! monitor awaits it and reports the outcome, or the panic that ended it, as
//! a single log event. Watchers are kept in a [`JoinSet`] so a one-shot
//! process can [`MonitorSupervisor::drain`] them before exiting.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use runs::{DispatchId, RecordId, WorkflowName};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::monitor::{MonitorOutcome, MonitorTarget};

/// Owns all in-flight monitor tasks.
#[derive(Debug, Clone, Default)]
pub struct MonitorSupervisor {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl MonitorSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `monitor` as a detached task watched by this supervisor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, target: &MonitorTarget, monitor: F)
    where
        F: Future<Output = MonitorOutcome> + Send + 'static,
    {
        let label = Label {
            dispatch_id: target.dispatch_id,
            workflow: target.workflow_name.clone(),
            record_id: target.record_id,
        };
        let handle = tokio::spawn(monitor);

        let watcher = async move {
            match handle.await {
                Ok(outcome) => label.finished(outcome),
                Err(e) if e.is_panic() => error!(
                    dispatch_id = %label.dispatch_id,
                    workflow = %label.workflow,
                    record_id = ?label.record_id,
                    error = %e,
                    "Monitor task panicked"
                ),
                Err(e) => warn!(
                    dispatch_id = %label.dispatch_id,
                    workflow = %label.workflow,
                    error = %e,
                    "Monitor task cancelled"
                ),
            }
        };

        let mut tasks = self.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(watcher);
    }

    /// Number of monitors not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Waits until every monitor spawned so far, and any spawned while
    /// waiting, has finished.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            while batch.join_next().await.is_some() {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Label {
    dispatch_id: DispatchId,
    workflow: WorkflowName,
    record_id: Option<RecordId>,
}

impl Label {
    fn finished(&self, outcome: MonitorOutcome) {
        match outcome {
            MonitorOutcome::Completed {
                run_id,
                conclusion,
            } => info!(
                dispatch_id = %self.dispatch_id,
                workflow = %self.workflow,
                record_id = ?self.record_id,
                run_id = %run_id,
                conclusion = %conclusion,
                "Monitor finished"
            ),
            MonitorOutcome::TimedOut { attempts } => warn!(
                dispatch_id = %self.dispatch_id,
                workflow = %self.workflow,
                record_id = ?self.record_id,
                attempts,
                "Monitor timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::testing::request;
    use runs::{RunConclusion, RunId};

    fn target() -> MonitorTarget {
        MonitorTarget::for_dispatch(&request(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_all_monitors() {
        let supervisor = MonitorSupervisor::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for secs in [1, 5, 30] {
            let finished = finished.clone();
            supervisor.spawn(&target(), async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                MonitorOutcome::TimedOut { attempts: 1 }
            });
        }
        assert_eq!(supervisor.in_flight(), 3);

        supervisor.drain().await;

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.in_flight(), 0);
    }

    async fn explode() -> MonitorOutcome {
        panic!("list-runs response could not be decoded")
    }

    #[tokio::test]
    async fn test_panicking_monitor_is_contained() {
        let supervisor = MonitorSupervisor::new();
        supervisor.spawn(&target(), explode());
        supervisor.spawn(&target(), async {
            MonitorOutcome::Completed {
                run_id: RunId::new(1),
                conclusion: RunConclusion::Success,
            }
        });

        supervisor.drain().await;

        assert_eq!(supervisor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_spawned_returns() {
        MonitorSupervisor::new().drain().await;
    }
}
