//! GitHub Actions infrastructure adapter.
//!
//! Implements the [`runs::WorkflowControl`] port with two REST calls:
//!
//! - `POST /repos/{owner}/{repo}/actions/workflows/{id}/dispatches`
//! - `GET  /repos/{owner}/{repo}/actions/workflows/{id}/runs?per_page={n}`
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. HTTP
//! transport, authentication headers, payload decoding and rate-limit header
//! interpretation live here; the `tracker` crate only sees
//! [`runs::WorkflowControl`], [`runs::DispatchError`] and [`runs::FetchError`].

pub mod client;
pub mod config;

pub use client::GitHubActionsClient;
pub use config::GitHubConfig;
