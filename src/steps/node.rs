//! Step node entity, local identity and scope keys

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::step_type::StepType;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque local identity of a step, stable before and after remote sync.
///
/// Ids are allocated from a process-wide counter so ids from different
/// scopes never collide. Allocation order doubles as the tie-break when two
/// siblings share a sequence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(u64);

impl LocalId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value (tests and deserialization)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which category of steps a scope holds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScopeKind {
    /// The job step tree of a project (remote `ProcessId == "0"`)
    Job,
    /// The step tree of one process
    Process { process_id: String },
}

/// Identifies one independent step forest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub project_id: String,
    pub kind: ScopeKind,
}

impl ScopeKey {
    /// Process id sent for job steps
    pub const JOB_PROCESS_ID: &'static str = "0";

    pub fn job(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            kind: ScopeKind::Job,
        }
    }

    pub fn process(project_id: impl Into<String>, process_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            kind: ScopeKind::Process {
                process_id: process_id.into(),
            },
        }
    }

    /// Value of the remote `ProcessId` field for steps in this scope
    pub fn remote_process_id(&self) -> &str {
        match &self.kind {
            ScopeKind::Job => Self::JOB_PROCESS_ID,
            ScopeKind::Process { process_id } => process_id,
        }
    }

    /// Value of the remote `Type` field for steps in this scope
    pub fn remote_type(&self) -> &'static str {
        match self.kind {
            ScopeKind::Job => "Job",
            ScopeKind::Process { .. } => "Process",
        }
    }

    pub fn is_job(&self) -> bool {
        matches!(self.kind, ScopeKind::Job)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ScopeKind::Job => write!(f, "{}/job", self.project_id),
            ScopeKind::Process { process_id } => {
                write!(f, "{}/process/{}", self.project_id, process_id)
            }
        }
    }
}

/// The step fields that are synced to the remote API.
///
/// Parent and ordering are tracked on the node itself; everything the
/// remote stores about a step's content lives here so it can be compared
/// against the last-known remote snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepFields {
    pub name: String,
    pub step_type: StepType,
    pub comment: Option<String>,
    pub for_all_variants: bool,
    /// Instruction text keyed by locale (e.g. "en-US")
    pub text_instruction: BTreeMap<String, String>,
    pub image_instruction_id: Option<String>,
    pub detection_id: Option<String>,
    pub material_id: Option<String>,
    pub button_id: Option<String>,
    /// Remote `StepControlflow` value ("None" when unset)
    pub control_flow: String,
}

impl StepFields {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            control_flow: "None".to_string(),
            ..Self::default()
        }
    }

    /// Remote `ChildStepOrder`, derived from the step type
    pub fn child_step_order(&self) -> &'static str {
        self.step_type.child_step_order()
    }
}

/// One step in a scope's forest
#[derive(Debug, Clone, PartialEq)]
pub struct StepNode {
    pub local_id: LocalId,
    /// Remote id; `None` until the step has been created remotely
    pub remote_id: Option<String>,
    pub scope: ScopeKey,
    /// Parent node; `None` for roots
    pub parent: Option<LocalId>,
    /// Intra-sibling ordering key (stride 10 after resequencing)
    pub sequence: i64,
    pub fields: StepFields,
    /// Original step type string when it did not normalize
    pub raw_step_type: Option<String>,
    /// Set when a remote create had an unconfirmed outcome; the next commit
    /// looks for the step remotely before creating it again
    pub pending_reconcile: bool,
}

impl StepNode {
    /// Create a locally new node (no remote id yet)
    pub fn new(scope: ScopeKey, fields: StepFields) -> Self {
        Self {
            local_id: LocalId::next(),
            remote_id: None,
            scope,
            parent: None,
            sequence: 0,
            fields,
            raw_step_type: None,
            pending_reconcile: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }

    pub fn step_type(&self) -> StepType {
        self.fields.step_type
    }

    /// True until the node has acquired a remote id
    pub fn is_locally_new(&self) -> bool {
        self.remote_id.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ids_are_unique_and_increasing() {
        let a = LocalId::next();
        let b = LocalId::next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_scope_remote_identity() {
        let job = ScopeKey::job("p1");
        assert_eq!(job.remote_process_id(), "0");
        assert_eq!(job.remote_type(), "Job");
        assert_eq!(job.to_string(), "p1/job");

        let process = ScopeKey::process("p1", "42");
        assert_eq!(process.remote_process_id(), "42");
        assert_eq!(process.remote_type(), "Process");
        assert_eq!(process.to_string(), "p1/process/42");
        assert_ne!(job, process);
    }

    #[test]
    fn test_new_node_is_locally_new_root() {
        let node = StepNode::new(
            ScopeKey::job("p"),
            StepFields::new("Mount", StepType::Composite),
        );
        assert!(node.is_locally_new());
        assert!(node.is_root());
        assert_eq!(node.fields.control_flow, "None");
        assert_eq!(node.fields.child_step_order(), "Sequential");
    }
}
