//! Workflow-run tracking domain.
//!
//! This crate contains every domain concept, newtype identifier, lifecycle
//! type, and error type used when dispatching GitHub Actions workflows and
//! following their runs. Infrastructure crates implement the traits defined
//! here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Domain + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`WorkflowId`, `RunId`, `RecordId`, etc.) |
//! | [`types`] | Lifecycle and value types (`RunState`, `WorkflowInputs`, `Timestamp`, etc.) |
//! | [`record`] | The persisted `WorkflowRunRecord` and its update rules |
//! | [`requests`] | Dispatch requests and run-status events handed to the core |
//! | [`errors`] | Error taxonomy and retry policy |
//! | [`ports`] | `WorkflowControl` and `WorkflowRunStore` traits |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod record;
pub mod requests;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ConfigError, DispatchError, FetchError, RetryPolicy, StorageError};
pub use identifiers::{
    CommitSha, DispatchId, GitRef, OwnerName, RecordId, RepositoryName, RunId, WorkflowId,
    WorkflowName, WorkflowPath,
};
pub use ports::{WorkflowControl, WorkflowRunStore};
pub use record::{NewWorkflowRun, RunUpdate, WorkflowRunRecord};
pub use requests::{DispatchRequest, RunStatusEvent};
pub use types::{
    ObservedRun, RunConclusion, RunState, RunStatus, Timestamp, WorkflowInputs, WorkflowRef,
};
