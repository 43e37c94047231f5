//! Crate-level error type for step tree operations.

use thiserror::Error;

use crate::api::ApiError;
use crate::services::SyncReport;
use crate::steps::{LocalId, ScopeKey};

/// Errors raised by forest edits, staging and commit.
#[derive(Error, Debug)]
pub enum StepError {
    /// Reparent target is the node itself or one of its descendants
    #[error("cannot attach step {node} under {parent}: {parent} is the step itself or one of its descendants")]
    CircularParent { node: LocalId, parent: LocalId },

    /// The node (or a requested parent) is not part of the forest
    #[error("step {0} not found in scope")]
    UnknownNode(LocalId),

    /// A node or parent from one scope was offered to another scope's forest
    #[error("step belongs to scope '{node_scope}' and cannot be placed in '{target_scope}'")]
    CrossScope {
        node_scope: ScopeKey,
        target_scope: ScopeKey,
    },

    /// Operation requires a scope that has not been loaded yet
    #[error("scope '{0}' has not been loaded")]
    ScopeNotLoaded(ScopeKey),

    /// No step in the scope carries the given remote id
    #[error("no step with remote id '{remote_id}' in scope '{scope}'")]
    UnknownRemoteId { scope: ScopeKey, remote_id: String },

    /// A remote call failed outside of a commit
    #[error(transparent)]
    Remote(#[from] ApiError),

    /// Commit pushed part of the batch; local state kept, scope stays dirty
    #[error("commit of scope '{scope}' incomplete: {}", report.summary())]
    CommitIncomplete {
        scope: ScopeKey,
        report: Box<SyncReport>,
    },
}

impl StepError {
    /// Whether the failure came from talking to the remote step API
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            StepError::Remote(_) | StepError::CommitIncomplete { .. }
        )
    }

    /// The sync report attached to an incomplete commit
    pub fn sync_report(&self) -> Option<&SyncReport> {
        match self {
            StepError::CommitIncomplete { report, .. } => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_parent_message() {
        let err = StepError::CircularParent {
            node: LocalId::from_raw(3),
            parent: LocalId::from_raw(7),
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("#7"));
        assert!(!err.is_remote());
    }

    #[test]
    fn test_remote_errors_are_flagged() {
        let err: StepError = ApiError::network("steps", "timeout").into();
        assert!(err.is_remote());
        assert!(err.sync_report().is_none());
    }
}
