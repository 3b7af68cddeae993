//! Newtype domain identifiers.
//!
//! Every concept that has an identity is a distinct newtype wrapping a
//! primitive. This prevents accidentally interchanging, for example, a
//! [`WorkflowId`] with a [`RunId`] even though both are `u64` under the hood,
//! or passing a repository name where an owner is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display, and a
// Deserialize that goes through new().
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
                    .ok_or_else(|| concat!(stringify!($name), " must not be empty").to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for integer-wrapped newtypes.
// Generates: struct (Copy), new(), accessor, Display.
// ---------------------------------------------------------------------------
macro_rules! int_id {
    (
        $(#[$attr:meta])*
        $name:ident($inner:ty), $accessor:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn $accessor(self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: platform-assigned integers
// ---------------------------------------------------------------------------

int_id! {
    /// Identifies a GitHub Actions workflow definition.
    ///
    /// This is the numeric id GitHub assigns to a workflow file, accepted by
    /// both the dispatch and the list-runs endpoints.
    WorkflowId(u64), as_u64
}

int_id! {
    /// Identifies a single GitHub Actions run.
    ///
    /// Unknown at dispatch time: GitHub's dispatch endpoint does not return
    /// it, so it is discovered later by polling or from a `workflow_run` event.
    RunId(u64), as_u64
}

int_id! {
    /// Sequential identifier assigned by the store when a workflow-run record
    /// is created. Immutable for the lifetime of the record.
    RecordId(i64), as_i64
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one dispatch request and the monitor task that follows it.
///
/// Generated fresh for every dispatch; attached to tracing spans so that the
/// dispatch call, every poll, and every record write can be correlated in
/// logs even before the external run id is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchId(Uuid);

impl DispatchId {
    /// Generates a new random dispatch identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`DispatchId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DispatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (GitHub / Git names)
// ---------------------------------------------------------------------------

string_id! {
    /// The owner of a repository: a GitHub organisation or user login.
    OwnerName
}

string_id! {
    /// A repository name without its owner (e.g. `"cli"` in `"acme/cli"`).
    RepositoryName
}

string_id! {
    /// The display name of a workflow (the `name:` key of the workflow file).
    WorkflowName
}

string_id! {
    /// Path of a workflow definition relative to the repository root
    /// (e.g. `".github/workflows/ci.yml"`).
    WorkflowPath
}

string_id! {
    /// A Git ref a workflow is dispatched on: branch name, tag name, or a
    /// fully-qualified ref such as `"refs/heads/main"`.
    GitRef
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string).
    CommitSha
}

impl GitRef {
    /// Returns the short branch or tag name, stripping a `refs/heads/` or
    /// `refs/tags/` prefix when present.
    pub fn short_name(&self) -> &str {
        self.0
            .strip_prefix("refs/heads/")
            .or_else(|| self.0.strip_prefix("refs/tags/"))
            .unwrap_or(&self.0)
    }
}
