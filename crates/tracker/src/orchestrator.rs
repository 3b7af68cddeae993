//! Orchestrator: dispatch synchronously, monitor in the background.

use std::sync::Arc;

use runs::{DispatchError, DispatchId, DispatchRequest, RecordId, WorkflowName};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::monitor::{Monitor, MonitorTarget};
use crate::supervisor::MonitorSupervisor;

/// A successfully dispatched workflow whose monitor is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub dispatch_id: DispatchId,
    /// The pre-created record, when persistence was available.
    pub record_id: Option<RecordId>,
}

/// Result of one request of a [`Orchestrator::dispatch_all`] batch.
#[derive(Debug)]
pub struct DispatchReport {
    pub dispatch_id: DispatchId,
    pub workflow: WorkflowName,
    pub result: Result<Dispatched, DispatchError>,
}

/// Couples a [`Dispatcher`] with background [`Monitor`] tasks.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<Monitor>,
    supervisor: MonitorSupervisor,
}

impl Orchestrator {
    pub fn new(dispatcher: Dispatcher, monitor: Monitor) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            monitor: Arc::new(monitor),
            supervisor: MonitorSupervisor::new(),
        }
    }

    pub fn supervisor(&self) -> &MonitorSupervisor {
        &self.supervisor
    }

    /// Dispatches `request` and, on success, starts its monitor without
    /// waiting for it. Only the dispatch itself can fail.
    pub async fn dispatch_and_monitor(
        &self,
        request: DispatchRequest,
    ) -> Result<Dispatched, DispatchError> {
        let record_id = self.dispatcher.dispatch(&request).await?;

        let target = MonitorTarget::for_dispatch(&request, record_id);
        let monitor = Arc::clone(&self.monitor);
        let task_target = target.clone();
        self.supervisor.spawn(&target, async move {
            monitor.monitor(&task_target).await
        });

        Ok(Dispatched {
            dispatch_id: request.dispatch_id,
            record_id,
        })
    }

    /// Dispatches every request concurrently. One failing dispatch never
    /// affects the others. Reports come back in request order, one per
    /// request; a dispatch task that panics is reported as a transport
    /// failure.
    pub async fn dispatch_all(&self, requests: Vec<DispatchRequest>) -> Vec<DispatchReport> {
        let mut reports: Vec<DispatchReport> = Vec::with_capacity(requests.len());
        let mut pending = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            reports.push(DispatchReport {
                dispatch_id: request.dispatch_id,
                workflow: request.workflow.name.clone(),
                result: Err(DispatchError::Transport {
                    message: "dispatch task panicked".to_string(),
                }),
            });
            let this = self.clone();
            pending.spawn(async move { (index, this.dispatch_and_monitor(request).await) });
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((index, result)) => reports[index].result = result,
                Err(e) => error!(error = %e, "Dispatch task failed"),
            }
        }

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        info!(
            dispatched = reports.len() - failed,
            failed, "Dispatch batch finished"
        );
        reports
    }
}
