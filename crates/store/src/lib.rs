//! Persistence gateway for workflow-run records.
//!
//! Implements [`runs::WorkflowRunStore`] twice:
//!
//! - [`PostgresRunStore`]: the `workflow_runs` table in PostgreSQL via
//!   `sqlx`. The pool connects lazily so that an unreachable database never
//!   fails start-up; the `tracker` crate's availability guard decides at run
//!   time whether persistence is used.
//! - [`InMemoryRunStore`]: same semantics, process-local; used in tests and
//!   for database-less development.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Translation between domain records and rows only. The
//! update rules themselves are defined by [`runs::WorkflowRunRecord::apply`].

pub mod config;
pub mod memory;
pub mod postgres;

pub use config::{ConnectionTarget, StoreConfig};
pub use memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;
