//! Sync Coordinator - pushes a staged scope to the remote step API.
//!
//! A commit diffs the scope's forest against its last-known remote
//! baseline and runs three phases:
//! 1. creates, grouped by depth (shallowest first) so every parent has a
//!    remote id before its children are created
//! 2. updates (changed fields, parent or Index), in preorder
//! 3. deletes of baseline steps no longer present locally, deepest first
//!
//! Every successful write updates the baseline immediately, so a retried
//! commit only re-issues what failed. One node failing does not stop the
//! rest of the batch, unless the remote is unreachable: then the commit
//! aborts and every write not yet attempted is reported as skipped.

use futures_util::future::join_all;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::api::{normalize_remote_id, ApiError, CreateRequest, RemoteStepClient, StepChanges};
use crate::staging::{BaselineEntry, StagedScope};
use crate::steps::{sequence_to_index, Forest, LocalId, ScopeKey, StepFields, StepNode};

/// Kind of remote write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Create,
    /// Adopt a step an earlier, unconfirmed create left behind
    Adopt,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOperation::Create => "create",
            SyncOperation::Adopt => "adopt",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

const ABORTED_MESSAGE: &str = "skipped: remote unavailable, commit aborted";

/// One node that could not be synced
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    /// Local node, `None` for deletes of steps already removed locally
    pub node: Option<LocalId>,
    pub name: String,
    pub remote_id: Option<String>,
    pub operation: SyncOperation,
    pub message: String,
    /// The remote error; `None` when the node was skipped
    pub error: Option<ApiError>,
}

impl SyncFailure {
    fn remote(node: &StepNode, operation: SyncOperation, error: ApiError) -> Self {
        Self {
            node: Some(node.local_id),
            name: node.name().to_string(),
            remote_id: node.remote_id.clone(),
            operation,
            message: error.to_string(),
            error: Some(error),
        }
    }

    fn aborted(node: &StepNode, operation: SyncOperation) -> Self {
        Self {
            node: Some(node.local_id),
            name: node.name().to_string(),
            remote_id: node.remote_id.clone(),
            operation,
            message: ABORTED_MESSAGE.to_string(),
            error: None,
        }
    }

    fn skipped(node: &StepNode, operation: SyncOperation, parent: LocalId) -> Self {
        Self {
            node: Some(node.local_id),
            name: node.name().to_string(),
            remote_id: node.remote_id.clone(),
            operation,
            message: format!("skipped: parent {} has not been created remotely", parent),
            error: None,
        }
    }

    /// Outcome unknown; needs manual reconciliation
    pub fn is_ambiguous(&self) -> bool {
        self.error.as_ref().is_some_and(ApiError::is_ambiguous)
    }

    pub fn is_skipped(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.operation, self.name)?;
        if let Some(remote_id) = &self.remote_id {
            write!(f, " ({})", remote_id)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of a commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Remote ids of created (or adopted) steps
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub failures: Vec<SyncFailure>,
    /// The remote became unreachable and the remaining writes were skipped
    pub aborted: bool,
}

impl SyncReport {
    /// Check if every remote write succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn abort_if_unavailable(&mut self, error: &ApiError) {
        if error.is_unavailable() && !self.aborted {
            warn!("Remote unavailable, aborting the rest of the commit: {}", error);
            self.aborted = true;
        }
    }

    /// Whether any failure left an unknown remote outcome
    pub fn has_ambiguous(&self) -> bool {
        self.failures.iter().any(SyncFailure::is_ambiguous)
    }

    /// Get a summary message
    pub fn summary(&self) -> String {
        format!(
            "Created: {}, Updated: {}, Deleted: {}, Failed: {}",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.failures.len()
        )
    }
}

/// What a commit would do right now
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Locally new nodes, shallowest first
    pub creates: Vec<LocalId>,
    /// Nodes with a remote id whose remote state differs
    pub updates: Vec<LocalId>,
    /// Baseline remote ids gone locally, deepest first
    pub deletes: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

enum ParentRemote {
    Root,
    Remote(String),
    /// Parent exists locally but has no remote id yet
    Pending(LocalId),
}

fn parent_remote(forest: &Forest, node: &StepNode) -> ParentRemote {
    match node.parent.and_then(|p| forest.get(p)) {
        None => ParentRemote::Root,
        Some(parent) => match &parent.remote_id {
            Some(remote_id) => ParentRemote::Remote(remote_id.clone()),
            None => ParentRemote::Pending(parent.local_id),
        },
    }
}

/// Locally new nodes grouped by depth, preorder within a level
fn create_levels(forest: &Forest) -> Vec<Vec<LocalId>> {
    let mut levels: Vec<Vec<LocalId>> = Vec::new();
    for id in forest.preorder() {
        let Some(node) = forest.get(id) else {
            continue;
        };
        if !node.is_locally_new() {
            continue;
        }
        let depth = forest.depth_of(id).unwrap_or(0);
        if levels.len() <= depth {
            levels.resize_with(depth + 1, Vec::new);
        }
        levels[depth].push(id);
    }
    levels.into_iter().filter(|l| !l.is_empty()).collect()
}

/// Changes needed to bring the remote step in line with `node`, and the
/// baseline entry to record once they are pushed
fn diff_node(
    base: Option<&BaselineEntry>,
    node: &StepNode,
    parent: Option<String>,
) -> (StepChanges, BaselineEntry) {
    let index = sequence_to_index(node.sequence);
    let mut changes = match base {
        Some(base) => StepChanges::between(&base.fields, &node.fields),
        None => StepChanges::between(&StepFields::default(), &node.fields),
    };
    let base_parent = base.and_then(|b| normalize_remote_id(b.parent_remote_id.as_deref()));
    if base.is_none() || base_parent != parent.as_deref() {
        changes.parent = Some(parent.clone());
    }
    if base.map(|b| b.index) != Some(index) {
        changes.index = Some(index);
    }
    let entry = BaselineEntry {
        parent_remote_id: parent,
        index,
        fields: node.fields.clone(),
    };
    (changes, entry)
}

/// Baseline remote ids no longer present locally, deepest first
fn gone_remote_ids(staged: &StagedScope) -> Vec<String> {
    let present: HashSet<&str> = staged
        .forest()
        .nodes()
        .filter_map(|n| n.remote_id.as_deref())
        .collect();
    let baseline = staged.baseline();
    let mut gone: Vec<String> = baseline
        .ids()
        .filter(|id| !present.contains(id.as_str()))
        .cloned()
        .collect();
    gone.sort_by_key(|id| (Reverse(baseline.depth_of(id)), id.clone()));
    gone
}

struct PendingCreate {
    node: LocalId,
    fields: StepFields,
    parent_remote_id: Option<String>,
    index: i64,
    reconcile: bool,
}

struct CreateResult {
    remote_id: String,
    baseline: BaselineEntry,
    adopted: bool,
}

/// Pushes staged scopes to the remote
#[derive(Clone)]
pub struct SyncCoordinator {
    client: RemoteStepClient,
    parallel_creates: bool,
}

impl SyncCoordinator {
    /// `parallel_creates` issues sibling creates of one depth level
    /// concurrently
    pub fn new(client: RemoteStepClient, parallel_creates: bool) -> Self {
        Self {
            client,
            parallel_creates,
        }
    }

    pub fn client(&self) -> &RemoteStepClient {
        &self.client
    }

    /// Diff a staged scope against its baseline without touching the remote
    pub fn plan(staged: &StagedScope) -> SyncPlan {
        let forest = staged.forest();
        let creates = create_levels(forest).into_iter().flatten().collect();
        let updates = forest
            .preorder()
            .into_iter()
            .filter_map(|id| forest.get(id))
            .filter(|node| {
                let Some(remote_id) = &node.remote_id else {
                    return false;
                };
                match parent_remote(forest, node) {
                    ParentRemote::Pending(_) => true,
                    ParentRemote::Root => {
                        !diff_node(staged.baseline().get(remote_id), node, None)
                            .0
                            .is_empty()
                    }
                    ParentRemote::Remote(parent) => {
                        !diff_node(staged.baseline().get(remote_id), node, Some(parent))
                            .0
                            .is_empty()
                    }
                }
            })
            .map(|node| node.local_id)
            .collect();
        SyncPlan {
            creates,
            updates,
            deletes: gone_remote_ids(staged),
        }
    }

    /// Push every pending change of the scope. Never fails as a whole;
    /// per-node failures are collected in the report.
    pub async fn commit(&self, staged: &mut StagedScope) -> SyncReport {
        let key = staged.key().clone();
        let mut report = SyncReport::default();
        let mut known: HashSet<String> = staged.baseline().ids().cloned().collect();
        known.extend(staged.forest().nodes().filter_map(|n| n.remote_id.clone()));

        info!(scope = %key, "Committing scope");
        self.run_creates(&key, staged, &mut known, &mut report).await;
        self.run_updates(&key, staged, &mut report).await;
        self.run_deletes(&key, staged, &mut report).await;

        if report.is_success() {
            info!(scope = %key, "Commit complete: {}", report.summary());
        } else {
            for failure in &report.failures {
                warn!(scope = %key, "Sync failure: {}", failure);
            }
            warn!(scope = %key, "Commit incomplete: {}", report.summary());
        }
        report
    }

    async fn run_creates(
        &self,
        key: &ScopeKey,
        staged: &mut StagedScope,
        known: &mut HashSet<String>,
        report: &mut SyncReport,
    ) {
        for level in create_levels(staged.forest()) {
            if report.aborted {
                for id in level {
                    if let Some(node) = staged.forest().get(id) {
                        report
                            .failures
                            .push(SyncFailure::aborted(node, SyncOperation::Create));
                    }
                }
                continue;
            }

            let mut pending = Vec::with_capacity(level.len());
            for id in level {
                let Some(node) = staged.forest().get(id) else {
                    continue;
                };
                let parent_remote_id = match parent_remote(staged.forest(), node) {
                    ParentRemote::Pending(parent) => {
                        report
                            .failures
                            .push(SyncFailure::skipped(node, SyncOperation::Create, parent));
                        continue;
                    }
                    ParentRemote::Root => None,
                    ParentRemote::Remote(parent) => Some(parent),
                };
                pending.push(PendingCreate {
                    node: id,
                    fields: node.fields.clone(),
                    parent_remote_id,
                    index: sequence_to_index(node.sequence),
                    reconcile: node.pending_reconcile,
                });
            }

            let (concurrent, sequential) = if self.parallel_creates {
                split_same_named(pending)
            } else {
                (Vec::new(), pending)
            };

            if !concurrent.is_empty() {
                let claimed: &HashSet<String> = known;
                let results =
                    join_all(concurrent.iter().map(|p| self.create_one(key, p, claimed))).await;
                for (p, result) in concurrent.into_iter().zip(results) {
                    if let Err(e) = &result {
                        report.abort_if_unavailable(e);
                    }
                    apply_create(staged, p, result, known, report);
                }
            }

            // Same-named siblings verify one after another so each
            // adopts a different remote step
            for p in sequential {
                if report.aborted {
                    if let Some(node) = staged.forest().get(p.node) {
                        report
                            .failures
                            .push(SyncFailure::aborted(node, SyncOperation::Create));
                    }
                    continue;
                }
                let result = self.create_one(key, &p, known).await;
                if let Err(e) = &result {
                    report.abort_if_unavailable(e);
                }
                apply_create(staged, p, result, known, report);
            }
        }
    }

    async fn create_one(
        &self,
        key: &ScopeKey,
        pending: &PendingCreate,
        known: &HashSet<String>,
    ) -> Result<CreateResult, ApiError> {
        if pending.reconcile {
            let found = self
                .client
                .find_unclaimed(
                    key,
                    &pending.fields.name,
                    pending.parent_remote_id.as_deref(),
                    known,
                )
                .await?;
            if let Some(step) = found {
                return Ok(CreateResult {
                    remote_id: step.id.clone(),
                    baseline: BaselineEntry::from_remote(&step),
                    adopted: true,
                });
            }
        }

        let created = self
            .client
            .create(
                CreateRequest {
                    scope: key,
                    fields: &pending.fields,
                    parent_remote_id: pending.parent_remote_id.as_deref(),
                    index: pending.index,
                },
                known,
            )
            .await?;
        Ok(CreateResult {
            remote_id: created.remote_id,
            baseline: BaselineEntry {
                parent_remote_id: pending.parent_remote_id.clone(),
                index: created.index.unwrap_or(pending.index),
                fields: pending.fields.clone(),
            },
            adopted: false,
        })
    }

    async fn run_updates(&self, key: &ScopeKey, staged: &mut StagedScope, report: &mut SyncReport) {
        for id in staged.forest().preorder() {
            let Some(node) = staged.forest().get(id) else {
                continue;
            };
            let Some(remote_id) = node.remote_id.clone() else {
                continue;
            };
            let parent = match parent_remote(staged.forest(), node) {
                ParentRemote::Pending(parent) => {
                    report
                        .failures
                        .push(SyncFailure::skipped(node, SyncOperation::Update, parent));
                    continue;
                }
                ParentRemote::Root => None,
                ParentRemote::Remote(parent) => Some(parent),
            };
            let (changes, entry) = diff_node(staged.baseline().get(&remote_id), node, parent);
            if changes.is_empty() {
                continue;
            }
            if report.aborted {
                report
                    .failures
                    .push(SyncFailure::aborted(node, SyncOperation::Update));
                continue;
            }

            debug!(scope = %key, remote_id = %remote_id, step = %id, "Pushing update");
            match self.client.update(key, &remote_id, &changes).await {
                Ok(()) => {
                    staged.baseline_mut().insert(remote_id.clone(), entry);
                    report.updated.push(remote_id);
                }
                Err(e) => {
                    report.abort_if_unavailable(&e);
                    if let Some(node) = staged.forest().get(id) {
                        report
                            .failures
                            .push(SyncFailure::remote(node, SyncOperation::Update, e));
                    }
                }
            }
        }
    }

    async fn run_deletes(&self, key: &ScopeKey, staged: &mut StagedScope, report: &mut SyncReport) {
        for remote_id in gone_remote_ids(staged) {
            let name = staged
                .baseline()
                .get(&remote_id)
                .map(|b| b.fields.name.clone())
                .unwrap_or_default();
            if report.aborted {
                report.failures.push(SyncFailure {
                    node: None,
                    name,
                    remote_id: Some(remote_id),
                    operation: SyncOperation::Delete,
                    message: ABORTED_MESSAGE.to_string(),
                    error: None,
                });
                continue;
            }
            match self.client.delete(key, &remote_id).await {
                Ok(outcome) => {
                    debug!(scope = %key, remote_id = %remote_id, outcome = ?outcome, "Deleted step");
                    staged.baseline_mut().remove(&remote_id);
                    report.deleted.push(remote_id);
                }
                Err(e) => {
                    report.abort_if_unavailable(&e);
                    report.failures.push(SyncFailure {
                        node: None,
                        name,
                        remote_id: Some(remote_id),
                        operation: SyncOperation::Delete,
                        message: e.to_string(),
                        error: Some(e),
                    });
                }
            }
        }
    }
}

/// Split a level into creates that may run concurrently and those sharing
/// a name and parent with a sibling, which must run one at a time
fn split_same_named(pending: Vec<PendingCreate>) -> (Vec<PendingCreate>, Vec<PendingCreate>) {
    let mut counts: HashMap<(String, Option<String>), usize> = HashMap::new();
    for p in &pending {
        *counts
            .entry((p.fields.name.clone(), p.parent_remote_id.clone()))
            .or_default() += 1;
    }
    pending.into_iter().partition(|p| {
        counts
            .get(&(p.fields.name.clone(), p.parent_remote_id.clone()))
            .is_some_and(|count| *count == 1)
    })
}

fn apply_create(
    staged: &mut StagedScope,
    pending: PendingCreate,
    result: Result<CreateResult, ApiError>,
    known: &mut HashSet<String>,
    report: &mut SyncReport,
) {
    let key = staged.key().clone();
    match result {
        Ok(created) => {
            if let Some(node) = staged.forest_mut().get_mut(pending.node) {
                node.remote_id = Some(created.remote_id.clone());
                node.pending_reconcile = false;
            }
            if created.adopted {
                info!(
                    scope = %key,
                    remote_id = %created.remote_id,
                    name = %pending.fields.name,
                    "Adopted step left by an earlier unconfirmed create"
                );
            } else {
                debug!(scope = %key, remote_id = %created.remote_id, name = %pending.fields.name, "Created step");
            }
            staged
                .baseline_mut()
                .insert(created.remote_id.clone(), created.baseline);
            known.insert(created.remote_id.clone());
            report.created.push(created.remote_id);
        }
        Err(e) => {
            let operation = if pending.reconcile {
                SyncOperation::Adopt
            } else {
                SyncOperation::Create
            };
            if let Some(node) = staged.forest_mut().get_mut(pending.node) {
                if e.is_ambiguous() {
                    node.pending_reconcile = true;
                }
            }
            if let Some(node) = staged.forest().get(pending.node) {
                report
                    .failures
                    .push(SyncFailure::remote(node, operation, e));
            }
        }
    }
}
