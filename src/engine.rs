//! Upward-facing entry point: load, edit, commit and discard step scopes.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::{ApiError, DeleteOutcome, RemoteStepClient, StepApi, StepChanges};
use crate::config::Config;
use crate::error::StepError;
use crate::services::{SyncCoordinator, SyncPlan, SyncReport};
use crate::staging::{BaselineEntry, LoadReport, NewStep, StagingArea, StepPatch};
use crate::steps::{
    EditOp, EditOutcome, HierarchyLabels, LocalId, Placement, ScopeKey, StepType,
};

/// Whether a mutation is also pushed to the remote right away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationMode {
    /// Stage locally; the next commit pushes it
    #[default]
    Local,
    /// Apply locally and push immediately
    LocalAndRemote,
}

/// One row of a scope outline
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub node: LocalId,
    pub remote_id: Option<String>,
    pub label: String,
    pub depth: usize,
    pub display_name: String,
    pub display_path: String,
    pub step_type: StepType,
    pub sequence: i64,
}

pub struct StepEngine {
    staging: StagingArea,
}

impl StepEngine {
    pub fn new(client: RemoteStepClient, parallel_creates: bool) -> Self {
        Self {
            staging: StagingArea::new(SyncCoordinator::new(client, parallel_creates)),
        }
    }

    /// Engine over an arbitrary transport (e.g. `MockStepApi`)
    pub fn with_api(api: Arc<dyn StepApi>, verify_delay: Duration) -> Self {
        Self::new(RemoteStepClient::new(api, verify_delay), false)
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let client = RemoteStepClient::from_config(&config.api)?;
        Ok(Self::new(client, config.api.parallel_sibling_creates))
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    fn client(&self) -> &RemoteStepClient {
        self.staging.coordinator().client()
    }

    pub async fn load_scope(&self, key: &ScopeKey) -> Result<LoadReport, StepError> {
        self.staging.load(key).await
    }

    pub async fn discard(&self, key: &ScopeKey) -> Result<LoadReport, StepError> {
        self.staging.discard(key).await
    }

    pub async fn commit(&self, key: &ScopeKey) -> Result<SyncReport, StepError> {
        self.staging.commit(key).await
    }

    pub async fn is_dirty(&self, key: &ScopeKey) -> bool {
        self.staging.is_dirty(key).await
    }

    /// What a commit would push right now
    pub async fn plan(&self, key: &ScopeKey) -> Result<SyncPlan, StepError> {
        let staged = self.staging.lock(key).await?;
        Ok(SyncCoordinator::plan(&staged))
    }

    pub async fn edit(
        &self,
        key: &ScopeKey,
        node: LocalId,
        op: EditOp,
    ) -> Result<EditOutcome, StepError> {
        let mut staged = self.staging.lock(key).await?;
        staged.apply_edit(node, op)
    }

    pub async fn move_up(&self, key: &ScopeKey, node: LocalId) -> Result<EditOutcome, StepError> {
        self.edit(key, node, EditOp::MoveUp).await
    }

    pub async fn move_down(
        &self,
        key: &ScopeKey,
        node: LocalId,
    ) -> Result<EditOutcome, StepError> {
        self.edit(key, node, EditOp::MoveDown).await
    }

    pub async fn indent(&self, key: &ScopeKey, node: LocalId) -> Result<EditOutcome, StepError> {
        self.edit(key, node, EditOp::Indent).await
    }

    pub async fn outdent(&self, key: &ScopeKey, node: LocalId) -> Result<EditOutcome, StepError> {
        self.edit(key, node, EditOp::Outdent).await
    }

    pub async fn add_step(&self, key: &ScopeKey, step: NewStep) -> Result<LocalId, StepError> {
        let mut staged = self.staging.lock(key).await?;
        staged.add_step(step)
    }

    pub async fn add_steps(
        &self,
        key: &ScopeKey,
        steps: Vec<NewStep>,
    ) -> Result<Vec<LocalId>, StepError> {
        let mut staged = self.staging.lock(key).await?;
        staged.add_steps(steps)
    }

    /// Edit a step's fields. Returns whether anything changed.
    ///
    /// With `LocalAndRemote` a step that already exists remotely is updated
    /// immediately; if that fails the edit stays staged and the scope is
    /// marked dirty.
    pub async fn update_step(
        &self,
        key: &ScopeKey,
        node: LocalId,
        patch: &StepPatch,
        mode: MutationMode,
    ) -> Result<bool, StepError> {
        let mut staged = self.staging.lock(key).await?;
        if !staged.patch_step(node, patch)? {
            return Ok(false);
        }

        let step = staged.forest().node(node)?;
        let remote = match (mode, &step.remote_id) {
            (MutationMode::LocalAndRemote, Some(remote_id)) => staged
                .baseline()
                .get(remote_id)
                .cloned()
                .map(|base| (remote_id.clone(), base, step.fields.clone())),
            _ => None,
        };
        let Some((remote_id, base, fields)) = remote else {
            staged.mark_dirty();
            return Ok(true);
        };

        let changes = StepChanges::between(&base.fields, &fields);
        match self.client().update(key, &remote_id, &changes).await {
            Ok(()) => {
                debug!(scope = %key, remote_id = %remote_id, "Pushed field edit");
                staged
                    .baseline_mut()
                    .insert(remote_id, BaselineEntry { fields, ..base });
                Ok(true)
            }
            Err(e) => {
                staged.mark_dirty();
                Err(e.into())
            }
        }
    }

    /// Delete a step and its subtree. Returns the number of removed steps.
    ///
    /// With `LocalAndRemote` the remote deletes are issued right away,
    /// deepest first; otherwise the next commit issues them.
    pub async fn delete_step(
        &self,
        key: &ScopeKey,
        node: LocalId,
        mode: MutationMode,
    ) -> Result<usize, StepError> {
        Ok(self.remove_subtree(key, node, mode).await?.0)
    }

    /// Removes the subtree; the outcome is the remote answer for `node`
    /// itself when it was deleted remotely
    async fn remove_subtree(
        &self,
        key: &ScopeKey,
        node: LocalId,
        mode: MutationMode,
    ) -> Result<(usize, Option<DeleteOutcome>), StepError> {
        let mut staged = self.staging.lock(key).await?;
        let removed = staged.remove_step(node)?;
        let has_remote = removed.iter().any(|n| n.remote_id.is_some());

        if mode == MutationMode::Local {
            if has_remote {
                staged.mark_dirty();
            }
            return Ok((removed.len(), None));
        }

        let mut own_outcome = None;
        for step in &removed {
            let Some(remote_id) = &step.remote_id else {
                continue;
            };
            match self.client().delete(key, remote_id).await {
                Ok(outcome) => {
                    debug!(scope = %key, remote_id = %remote_id, outcome = ?outcome, "Deleted step");
                    staged.baseline_mut().remove(remote_id);
                    if step.local_id == node {
                        own_outcome = Some(outcome);
                    }
                }
                Err(e) => {
                    staged.mark_dirty();
                    return Err(e.into());
                }
            }
        }
        info!(scope = %key, removed = removed.len(), "Deleted subtree");
        Ok((removed.len(), own_outcome))
    }

    /// Delete by remote id. Steps unknown locally are still deleted
    /// remotely; a step that is already gone is not an error.
    pub async fn delete_by_remote_id(
        &self,
        key: &ScopeKey,
        remote_id: &str,
    ) -> Result<DeleteOutcome, StepError> {
        let local = {
            let staged = self.staging.lock(key).await?;
            staged.forest().find_by_remote_id(remote_id).map(|n| n.local_id)
        };
        match local {
            Some(node) => {
                let (_, outcome) = self
                    .remove_subtree(key, node, MutationMode::LocalAndRemote)
                    .await?;
                Ok(outcome.unwrap_or(DeleteOutcome::Deleted))
            }
            None => Ok(self.client().delete(key, remote_id).await?),
        }
    }

    pub async fn find_by_remote_id(
        &self,
        key: &ScopeKey,
        remote_id: &str,
    ) -> Result<LocalId, StepError> {
        self.staging.lock(key).await?.find_by_remote_id(remote_id)
    }

    pub async fn labels(&self, key: &ScopeKey) -> Result<HierarchyLabels, StepError> {
        Ok(self.staging.lock(key).await?.labels().clone())
    }

    /// Labels with some nodes placed hypothetically; the scope is untouched
    pub async fn preview_labels(
        &self,
        key: &ScopeKey,
        overrides: &HashMap<LocalId, Placement>,
    ) -> Result<HierarchyLabels, StepError> {
        Ok(self.staging.lock(key).await?.preview_labels(overrides))
    }

    /// The scope in preorder with labels
    pub async fn outline(&self, key: &ScopeKey) -> Result<Vec<OutlineEntry>, StepError> {
        let staged = self.staging.lock(key).await?;
        let forest = staged.forest();
        let labels = staged.labels();
        Ok(forest
            .preorder()
            .into_iter()
            .filter_map(|id| {
                let node = forest.get(id)?;
                let label = labels.get(id)?;
                Some(OutlineEntry {
                    node: id,
                    remote_id: node.remote_id.clone(),
                    label: label.label.clone(),
                    depth: label.depth,
                    display_name: label.display_name.clone(),
                    display_path: label.display_path.clone(),
                    step_type: node.step_type(),
                    sequence: node.sequence,
                })
            })
            .collect())
    }

    /// Indented text outline of the scope
    pub async fn render(&self, key: &ScopeKey) -> Result<String, StepError> {
        let outline = self.outline(key).await?;
        let mut out = String::new();
        for entry in outline {
            let remote = entry.remote_id.as_deref().unwrap_or("new");
            let _ = writeln!(
                out,
                "{:<10} {}  [{}] ({})",
                entry.label,
                entry.display_name,
                entry.step_type.display_name(),
                remote
            );
        }
        Ok(out)
    }
}
