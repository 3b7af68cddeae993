//! Routing of decoded events into the tracker.

use tracker::{DispatchReport, EventOutcome, Orchestrator, RunEventHandler};
use tracing::{info, instrument};

use crate::events::InboundEvent;
use crate::workflows::ConfiguredWorkflows;

/// What [`EventRouter::route`] did.
#[derive(Debug)]
pub enum RouteOutcome {
    /// A push dispatched zero or more workflows.
    Dispatched(Vec<DispatchReport>),
    /// A `workflow_run` event was applied to the records.
    Recorded(EventOutcome),
    Ignored,
}

/// Sends pushes to the orchestrator and run events to the record handler.
#[derive(Debug, Clone)]
pub struct EventRouter {
    orchestrator: Orchestrator,
    run_events: RunEventHandler,
    workflows: ConfiguredWorkflows,
}

impl EventRouter {
    pub fn new(
        orchestrator: Orchestrator,
        run_events: RunEventHandler,
        workflows: ConfiguredWorkflows,
    ) -> Self {
        Self {
            orchestrator,
            run_events,
            workflows,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Routes one event. Dispatch failures are reported per workflow in the
    /// outcome; monitors keep running after this returns.
    #[instrument(skip_all)]
    pub async fn route(&self, event: InboundEvent) -> RouteOutcome {
        match event {
            InboundEvent::Push(push) => {
                let requests = self.workflows.requests_for(&push);
                info!(
                    owner = %push.owner,
                    repo = %push.repo,
                    git_ref = %push.git_ref,
                    commit_sha = %push.commit_sha,
                    selected = requests.len(),
                    "Push received"
                );
                RouteOutcome::Dispatched(self.orchestrator.dispatch_all(requests).await)
            }
            InboundEvent::WorkflowRun(run) => {
                RouteOutcome::Recorded(self.run_events.apply(&run).await)
            }
            InboundEvent::Ignored { event, reason } => {
                info!(event = %event, reason, "Event ignored");
                RouteOutcome::Ignored
            }
        }
    }
}
