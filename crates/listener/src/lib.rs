//! Event intake for the workflow-run tracker.
//!
//! Turns GitHub webhook deliveries into tracker calls:
//!
//! - [`InboundEvent::decode`] decodes `push` and `workflow_run` payloads.
//!   Signature verification and HTTP transport happen before this crate.
//! - [`ConfiguredWorkflows`] decides which workflows a push dispatches and
//!   with which inputs.
//! - [`EventRouter`] sends pushes to [`tracker::Orchestrator::dispatch_all`]
//!   and run-status events to [`tracker::RunEventHandler`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Payload shapes and configuration files live here.
//! The [`tracker`] crate sees only [`runs::DispatchRequest`] and
//! [`runs::RunStatusEvent`].

pub mod errors;
pub mod events;
pub mod router;
pub mod workflows;

pub use errors::EventError;
pub use events::{InboundEvent, PushEvent};
pub use router::{EventRouter, RouteOutcome};
pub use workflows::{ConfiguredWorkflows, WorkflowEntry};
