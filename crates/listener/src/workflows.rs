//! Workflow selection from configuration.
//!
//! The workflows file is a JSON array:
//!
//! ```json
//! [
//!   { "id": 42, "name": "CI", "path": ".github/workflows/ci.yml" },
//!   {
//!     "id": 43,
//!     "name": "Release",
//!     "path": ".github/workflows/release.yml",
//!     "branches": ["main", "release/*"],
//!     "inputs": { "channel": "stable" }
//!   }
//! ]
//! ```
//!
//! `branches` absent means every branch; a trailing `*` matches any suffix.

use std::path::Path;

use runs::{
    ConfigError, DispatchRequest, GitRef, WorkflowId, WorkflowInputs, WorkflowName, WorkflowPath,
    WorkflowRef,
};
use serde::Deserialize;

use crate::events::PushEvent;

/// One dispatchable workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEntry {
    pub workflow: WorkflowRef,
    /// Branch patterns; `None` matches every branch.
    pub branches: Option<Vec<String>>,
    /// Inputs sent with every dispatch of this workflow.
    pub inputs: WorkflowInputs,
}

impl WorkflowEntry {
    /// Whether a push to `branch` (short name) selects this workflow.
    pub fn matches(&self, branch: &str) -> bool {
        match &self.branches {
            None => true,
            Some(patterns) => patterns.iter().any(|p| branch_matches(p, branch)),
        }
    }

    /// Whether `key` names this workflow by id, name or path.
    pub fn is_named(&self, key: &str) -> bool {
        self.workflow.name.as_str() == key
            || self.workflow.path.as_str() == key
            || key.parse::<u64>().ok() == Some(self.workflow.id.as_u64())
    }
}

fn branch_matches(pattern: &str, branch: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => branch.starts_with(prefix),
        None => pattern == branch,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryFile {
    id: u64,
    name: String,
    path: String,
    #[serde(default)]
    branches: Option<Vec<String>>,
    #[serde(default)]
    inputs: WorkflowInputs,
}

/// The set of workflows a push may dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfiguredWorkflows {
    entries: Vec<WorkflowEntry>,
}

impl ConfiguredWorkflows {
    pub fn new(entries: Vec<WorkflowEntry>) -> Self {
        Self { entries }
    }

    /// Reads and validates a workflows file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let key = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            key: key.clone(),
            message: e.to_string(),
        })?;
        Self::from_json(&key, &text)
    }

    /// Parses workflows from JSON text; `source` names it in errors.
    pub fn from_json(source: &str, text: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            key: source.to_string(),
            message,
        };
        let raw: Vec<EntryFile> = serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let entries = raw
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let name = WorkflowName::new(entry.name)
                    .ok_or_else(|| invalid(format!("entry {index}: empty name")))?;
                let path = WorkflowPath::new(entry.path)
                    .ok_or_else(|| invalid(format!("entry {index}: empty path")))?;
                Ok(WorkflowEntry {
                    workflow: WorkflowRef {
                        id: WorkflowId::new(entry.id),
                        name,
                        path,
                    },
                    branches: entry.branches,
                    inputs: entry.inputs,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[WorkflowEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks a workflow up by id, name or path.
    pub fn find(&self, key: &str) -> Option<&WorkflowEntry> {
        self.entries.iter().find(|e| e.is_named(key))
    }

    /// One dispatch request per workflow selected by `push`, each with its
    /// own [`runs::DispatchId`]. Tag pushes select nothing.
    pub fn requests_for(&self, push: &PushEvent) -> Vec<DispatchRequest> {
        let Some(branch) = push.git_ref.as_str().strip_prefix("refs/heads/") else {
            return Vec::new();
        };
        let Some(git_ref) = GitRef::new(branch) else {
            return Vec::new();
        };

        self.entries
            .iter()
            .filter(|e| e.matches(branch))
            .map(|e| {
                DispatchRequest::new(
                    push.owner.clone(),
                    push.repo.clone(),
                    e.workflow.clone(),
                    git_ref.clone(),
                    push.commit_sha.clone(),
                    e.inputs.clone(),
                )
            })
            .collect()
    }
}
