//! Hierarchical step model and pure forest algorithms
//!
//! This module provides:
//! - The `StepNode` entity and scope identity
//! - Step type normalization against the closed step type table
//! - The per-scope `Forest` with its cycle-free parent invariant
//! - Hierarchy labels ("2.1.3"), resequencing and structural edits

pub mod builder;
pub mod edit;
pub mod forest;
pub mod hierarchy;
pub mod node;
pub mod resequence;
pub mod step_type;

pub use builder::{build_forest, LoadWarning};
pub use edit::{apply_edit, EditOp, EditOutcome};
pub use forest::Forest;
pub use hierarchy::{HierarchyLabeler, HierarchyLabels, NodeLabel, Placement, UNASSIGNED_LABEL};
pub use node::{LocalId, ScopeKey, ScopeKind, StepFields, StepNode};
pub use resequence::{index_to_sequence, resequence, sequence_to_index, SEQUENCE_STRIDE};
pub use step_type::{normalize_step_type, StepType};
