//! Dispatch-and-monitor lifecycle for GitHub Actions workflow runs.
//!
//! A dispatch pre-creates a `queued` record, calls the workflow-dispatch
//! endpoint, then hands off to a background monitor that polls the workflow's
//! recent runs, correlates the newest one with the record, and mirrors its
//! progress until it completes or the attempt budget runs out.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Components here sequence calls to the
//! [`runs::WorkflowControl`] and [`runs::WorkflowRunStore`] ports. They
//! contain no I/O of their own and are driven entirely through those traits,
//! which lets tests substitute scripted fakes and paused time.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`availability`] | `ConnectionState` flag and the `GuardedStore` capability |
//! | [`dispatcher`] | Pre-create record, call the dispatch endpoint |
//! | [`monitor`] | Poll loop, correlation, `MonitorSettings`, `MonitorOutcome` |
//! | [`supervisor`] | Background monitor tasks and their outcome logging |
//! | [`orchestrator`] | Dispatch then monitor; concurrent batches |
//! | [`run_events`] | Webhook-driven record updates |

pub mod availability;
pub mod dispatcher;
pub mod monitor;
pub mod orchestrator;
pub mod run_events;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use availability::{ConnectionState, GuardedStore};
pub use dispatcher::Dispatcher;
pub use monitor::{Monitor, MonitorOutcome, MonitorSettings, MonitorTarget};
pub use orchestrator::{DispatchReport, Dispatched, Orchestrator};
pub use run_events::{EventOutcome, RunEventHandler};
pub use supervisor::MonitorSupervisor;
