//! Staged (local, not yet committed) step forests, one per scope.
//!
//! Each scope is owned by its own `tokio::sync::Mutex`, held for the whole
//! of an edit or a commit, so a scope's forest is never mutated
//! concurrently. Different scopes are fully independent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as ScopeLock, OwnedMutexGuard};
use tracing::{debug, info};

use crate::api::{normalize_remote_id, RemoteStep};
use crate::error::StepError;
use crate::services::{SyncCoordinator, SyncReport};
use crate::steps::{
    apply_edit, build_forest, normalize_step_type, resequence, EditOp, EditOutcome, Forest,
    HierarchyLabeler, HierarchyLabels, LoadWarning, LocalId, Placement, ScopeKey, StepFields,
    StepNode, SEQUENCE_STRIDE,
};

/// Last-known remote state of one step
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineEntry {
    pub parent_remote_id: Option<String>,
    pub index: i64,
    pub fields: StepFields,
}

impl BaselineEntry {
    pub fn from_remote(step: &RemoteStep) -> Self {
        Self {
            parent_remote_id: step.parent_remote_id().map(str::to_string),
            index: step.index,
            fields: step.to_fields().0,
        }
    }
}

/// Last-known remote snapshot of a scope, keyed by remote id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteBaseline {
    entries: HashMap<String, BaselineEntry>,
}

impl RemoteBaseline {
    pub fn from_steps(steps: &[RemoteStep]) -> Self {
        Self {
            entries: steps
                .iter()
                .map(|s| (s.id.clone(), BaselineEntry::from_remote(s)))
                .collect(),
        }
    }

    pub fn get(&self, remote_id: &str) -> Option<&BaselineEntry> {
        self.entries.get(remote_id)
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.entries.contains_key(remote_id)
    }

    pub fn insert(&mut self, remote_id: impl Into<String>, entry: BaselineEntry) {
        self.entries.insert(remote_id.into(), entry);
    }

    pub fn remove(&mut self, remote_id: &str) -> Option<BaselineEntry> {
        self.entries.remove(remote_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of baseline ancestors of a remote step
    pub fn depth_of(&self, remote_id: &str) -> usize {
        let mut depth = 0;
        let mut current = self
            .entries
            .get(remote_id)
            .and_then(|e| normalize_remote_id(e.parent_remote_id.as_deref()));
        while let Some(parent) = current {
            depth += 1;
            if depth > self.entries.len() {
                break;
            }
            current = self
                .entries
                .get(parent)
                .and_then(|e| normalize_remote_id(e.parent_remote_id.as_deref()));
        }
        depth
    }
}

/// A step to add locally
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub fields: StepFields,
    /// Step type string as given, when it did not normalize
    pub raw_step_type: Option<String>,
    /// Parent node; `None` appends a root
    pub parent: Option<LocalId>,
}

impl NewStep {
    /// A new step; the step type string is normalized
    pub fn new(name: impl Into<String>, step_type: &str) -> Self {
        let (step_type, raw) = normalize_step_type(step_type);
        Self {
            fields: StepFields::new(name, step_type),
            raw_step_type: raw,
            parent: None,
        }
    }

    pub fn under(mut self, parent: LocalId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.fields.comment = Some(comment.into());
        self
    }

    pub fn with_text_instruction(
        mut self,
        locale: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.fields
            .text_instruction
            .insert(locale.into(), text.into());
        self
    }
}

/// Field edits for one step; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub name: Option<String>,
    /// Raw step type, normalized on apply
    pub step_type: Option<String>,
    pub comment: Option<Option<String>>,
    pub for_all_variants: Option<bool>,
    pub text_instruction: Option<BTreeMap<String, String>>,
    pub image_instruction_id: Option<Option<String>>,
    pub detection_id: Option<Option<String>>,
    pub material_id: Option<Option<String>>,
    pub button_id: Option<Option<String>>,
}

impl StepPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Apply to a node. Returns whether anything changed.
    pub fn apply(&self, node: &mut StepNode) -> bool {
        let before = (node.fields.clone(), node.raw_step_type.clone());
        let fields = &mut node.fields;
        if let Some(name) = &self.name {
            fields.name = name.clone();
        }
        if let Some(raw) = &self.step_type {
            let (step_type, unknown) = normalize_step_type(raw);
            fields.step_type = step_type;
            node.raw_step_type = unknown;
        }
        if let Some(comment) = &self.comment {
            fields.comment = comment.clone();
        }
        if let Some(for_all) = self.for_all_variants {
            fields.for_all_variants = for_all;
        }
        if let Some(text) = &self.text_instruction {
            fields.text_instruction = text.clone();
        }
        if let Some(image) = &self.image_instruction_id {
            fields.image_instruction_id = image.clone();
        }
        if let Some(detection) = &self.detection_id {
            fields.detection_id = detection.clone();
        }
        if let Some(material) = &self.material_id {
            fields.material_id = material.clone();
        }
        if let Some(button) = &self.button_id {
            fields.button_id = button.clone();
        }
        (node.fields.clone(), node.raw_step_type.clone()) != before
    }
}

/// Staged state of one scope
#[derive(Debug)]
pub struct StagedScope {
    key: ScopeKey,
    forest: Forest,
    labels: HierarchyLabels,
    baseline: RemoteBaseline,
    loaded: bool,
    dirty: bool,
    warnings: Vec<LoadWarning>,
}

impl StagedScope {
    fn unloaded(key: ScopeKey) -> Self {
        Self {
            forest: Forest::new(key.clone()),
            key,
            labels: HierarchyLabels::default(),
            baseline: RemoteBaseline::default(),
            loaded: false,
            dirty: false,
            warnings: Vec::new(),
        }
    }

    /// Replace everything with a fresh remote listing
    pub(crate) fn replace_from_remote(&mut self, steps: &[RemoteStep]) {
        let in_scope: Vec<RemoteStep> = steps
            .iter()
            .filter(|s| s.belongs_to(&self.key))
            .cloned()
            .collect();
        let (forest, warnings) = build_forest(&self.key, &in_scope);
        self.baseline = RemoteBaseline::from_steps(&in_scope);
        self.forest = forest;
        self.warnings = warnings;
        self.loaded = true;
        self.dirty = false;
        self.refresh_labels();
    }

    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub(crate) fn forest_mut(&mut self) -> &mut Forest {
        &mut self.forest
    }

    pub fn labels(&self) -> &HierarchyLabels {
        &self.labels
    }

    pub fn baseline(&self) -> &RemoteBaseline {
        &self.baseline
    }

    pub(crate) fn baseline_mut(&mut self) -> &mut RemoteBaseline {
        &mut self.baseline
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Warnings from the last load
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn mark_dirty(&mut self) {
        if !self.dirty {
            debug!(scope = %self.key, "Scope marked dirty");
        }
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn refresh_labels(&mut self) {
        self.labels = HierarchyLabeler::label(&self.forest);
    }

    /// Labels as they would be with some nodes placed differently
    pub fn preview_labels(&self, overrides: &HashMap<LocalId, Placement>) -> HierarchyLabels {
        HierarchyLabeler::label_with_overrides(&self.forest, overrides)
    }

    /// Apply a structural edit, then resequence, relabel and mark dirty
    pub fn apply_edit(&mut self, node: LocalId, op: EditOp) -> Result<EditOutcome, StepError> {
        let outcome = apply_edit(&mut self.forest, node, op)?;
        if outcome.is_applied() {
            self.refresh_labels();
            self.mark_dirty();
            debug!(scope = %self.key, step = %node, op = %op, label = self.labels.label(node), "Applied edit");
        }
        Ok(outcome)
    }

    /// Append a locally new step as the last child of its parent
    pub fn add_step(&mut self, step: NewStep) -> Result<LocalId, StepError> {
        let mut ids = self.add_steps(vec![step])?;
        Ok(ids.remove(0))
    }

    /// Append several steps with a single resequencing pass. Parents must
    /// already be in the forest; nothing is added if any parent is unknown.
    pub fn add_steps(&mut self, steps: Vec<NewStep>) -> Result<Vec<LocalId>, StepError> {
        for step in &steps {
            if let Some(parent) = step.parent {
                self.forest.node(parent)?;
            }
        }

        let mut ids = Vec::with_capacity(steps.len());
        for step in steps {
            let last = self
                .forest
                .children_of(step.parent)
                .last()
                .and_then(|id| self.forest.get(*id))
                .map(|n| n.sequence);
            let anchor = match (last, step.parent) {
                (Some(seq), _) => seq,
                (None, Some(parent)) => self.forest.node(parent)?.sequence,
                (None, None) => 0,
            };
            let mut node = StepNode::new(self.key.clone(), step.fields);
            node.parent = step.parent;
            node.raw_step_type = step.raw_step_type;
            node.sequence = anchor + SEQUENCE_STRIDE;
            ids.push(self.forest.insert(node)?);
        }

        resequence(&mut self.forest);
        self.refresh_labels();
        self.mark_dirty();
        Ok(ids)
    }

    /// Remove a step and its subtree locally. Returns removed nodes,
    /// deepest first.
    pub fn remove_step(&mut self, node: LocalId) -> Result<Vec<StepNode>, StepError> {
        let removed = self.forest.remove_subtree(node)?;
        self.refresh_labels();
        Ok(removed)
    }

    /// Apply a field patch to a node. Returns whether anything changed.
    pub fn patch_step(&mut self, node: LocalId, patch: &StepPatch) -> Result<bool, StepError> {
        let changed = patch.apply(self.forest.node_mut(node)?);
        if changed {
            self.refresh_labels();
        }
        Ok(changed)
    }

    /// Look a step up by remote id
    pub fn find_by_remote_id(&self, remote_id: &str) -> Result<LocalId, StepError> {
        self.forest
            .find_by_remote_id(remote_id)
            .map(|n| n.local_id)
            .ok_or_else(|| StepError::UnknownRemoteId {
                scope: self.key.clone(),
                remote_id: remote_id.to_string(),
            })
    }
}

/// Result of loading a scope
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub scope: ScopeKey,
    pub steps: usize,
    pub warnings: Vec<LoadWarning>,
}

/// All staged scopes plus the coordinator that commits them
pub struct StagingArea {
    coordinator: SyncCoordinator,
    scopes: Mutex<HashMap<ScopeKey, Arc<ScopeLock<StagedScope>>>>,
}

impl StagingArea {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        Self {
            coordinator,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    fn entry(&self, key: &ScopeKey) -> Arc<ScopeLock<StagedScope>> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ScopeLock::new(StagedScope::unloaded(key.clone()))))
            .clone()
    }

    /// Exclusive access to a loaded scope
    pub async fn lock(&self, key: &ScopeKey) -> Result<OwnedMutexGuard<StagedScope>, StepError> {
        let guard = self.entry(key).lock_owned().await;
        if !guard.is_loaded() {
            return Err(StepError::ScopeNotLoaded(key.clone()));
        }
        Ok(guard)
    }

    /// Fetch the scope from the remote and replace the local forest
    /// wholesale; clears dirty
    pub async fn load(&self, key: &ScopeKey) -> Result<LoadReport, StepError> {
        let mut staged = self.entry(key).lock_owned().await;
        let steps = self.coordinator.client().fetch_all(key).await?;
        staged.replace_from_remote(&steps);
        info!(
            scope = %key,
            steps = staged.forest().len(),
            warnings = staged.warnings().len(),
            "Loaded scope"
        );
        Ok(LoadReport {
            scope: key.clone(),
            steps: staged.forest().len(),
            warnings: staged.warnings().to_vec(),
        })
    }

    /// Drop all local edits and reload from the remote
    pub async fn discard(&self, key: &ScopeKey) -> Result<LoadReport, StepError> {
        info!(scope = %key, "Discarding local edits");
        self.load(key).await
    }

    /// False for scopes that were never loaded
    pub async fn is_dirty(&self, key: &ScopeKey) -> bool {
        let staged = self.entry(key).lock_owned().await;
        staged.is_loaded() && staged.is_dirty()
    }

    pub async fn mark_dirty(&self, key: &ScopeKey) -> Result<(), StepError> {
        self.lock(key).await?.mark_dirty();
        Ok(())
    }

    /// Push the scope's local edits. Clears dirty only when every remote
    /// write succeeded; otherwise local state is kept as is.
    pub async fn commit(&self, key: &ScopeKey) -> Result<SyncReport, StepError> {
        let mut staged = self.lock(key).await?;
        if !staged.is_dirty() {
            debug!(scope = %key, "Scope is clean, nothing to commit");
            return Ok(SyncReport::default());
        }

        let report = self.coordinator.commit(&mut staged).await;
        if report.is_success() {
            staged.clear_dirty();
            info!(scope = %key, "{}", report.summary());
            Ok(report)
        } else {
            Err(StepError::CommitIncomplete {
                scope: key.clone(),
                report: Box::new(report),
            })
        }
    }
}
