//! Remote step client.
//!
//! Wraps a [`StepApi`] with the behavior the remote needs in practice:
//! - a failed or timed-out create may still have persisted, so it is
//!   verified by re-listing before being reported as failed
//! - updates are read-modify-write of the full step object
//! - deleting a step that is already gone counts as success

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::step_api::{HttpStepApi, StepApi};
use super::types::{create_payload, id_from_value, normalize_remote_id, RemoteStep, StepChanges};
use crate::config::ApiConfig;
use crate::steps::{ScopeKey, StepFields};

/// Result of a create that the remote confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedStep {
    pub remote_id: String,
    /// Index the remote stored, when it told us
    pub index: Option<i64>,
    /// True when the create call failed but the step was found afterwards
    pub verified_after_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The remote answered 404
    AlreadyAbsent,
}

/// What a create should produce remotely
#[derive(Debug, Clone, Copy)]
pub struct CreateRequest<'a> {
    pub scope: &'a ScopeKey,
    pub fields: &'a StepFields,
    pub parent_remote_id: Option<&'a str>,
    pub index: i64,
}

#[derive(Clone)]
pub struct RemoteStepClient {
    api: Arc<dyn StepApi>,
    verify_delay: Duration,
}

impl RemoteStepClient {
    pub fn new(api: Arc<dyn StepApi>, verify_delay: Duration) -> Self {
        Self { api, verify_delay }
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        let api = HttpStepApi::from_config(config)?;
        Ok(Self::new(
            Arc::new(api),
            Duration::from_millis(config.verify_delay_ms),
        ))
    }

    pub fn provider(&self) -> &str {
        self.api.name()
    }

    /// All remote steps of a scope
    pub async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<RemoteStep>, ApiError> {
        let steps = self.api.list_steps(&scope.project_id).await?;
        let total = steps.len();
        let in_scope: Vec<RemoteStep> = steps.into_iter().filter(|s| s.belongs_to(scope)).collect();
        debug!(
            scope = %scope,
            total = total,
            in_scope = in_scope.len(),
            "Fetched remote steps"
        );
        Ok(in_scope)
    }

    /// Create one step.
    ///
    /// `known_ids` are remote ids already tracked locally; verification never
    /// adopts one of them as the newly created step.
    pub async fn create(
        &self,
        request: CreateRequest<'_>,
        known_ids: &HashSet<String>,
    ) -> Result<CreatedStep, ApiError> {
        let scope = request.scope;
        let payload = create_payload(
            scope,
            request.fields,
            request.parent_remote_id,
            request.index,
        );
        debug!(
            scope = %scope,
            name = %request.fields.name,
            parent = ?request.parent_remote_id,
            index = request.index,
            "Creating remote step"
        );

        match self.api.create_steps(&scope.project_id, vec![payload]).await {
            Ok(body) => match first_created(&body) {
                Some(created) => self.confirm_attachment(scope, created).await,
                None => {
                    let original = ApiError::decode(
                        self.provider(),
                        "create response carried no step id",
                    );
                    match self.verify_create(request, known_ids, original).await {
                        Ok(created) => Ok(created),
                        // The call succeeded, so an unfindable step is an
                        // unknown outcome rather than a failure
                        Err(ApiError::Decode { message, .. }) => Err(ApiError::ambiguous(
                            self.provider(),
                            format!("create '{}'", request.fields.name),
                            message,
                        )),
                        Err(e) => Err(e),
                    }
                }
            },
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                warn!(
                    name = %request.fields.name,
                    error = %e,
                    "Create reported failure, checking whether the step exists anyway"
                );
                self.verify_create(request, known_ids, e).await
            }
        }
    }

    /// After a failed create: wait, list, and look for the step
    async fn verify_create(
        &self,
        request: CreateRequest<'_>,
        known_ids: &HashSet<String>,
        original: ApiError,
    ) -> Result<CreatedStep, ApiError> {
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }

        let found = self
            .find_unclaimed(
                request.scope,
                &request.fields.name,
                request.parent_remote_id,
                known_ids,
            )
            .await
            .map_err(|e| {
                ApiError::ambiguous(
                    self.provider(),
                    format!("create '{}'", request.fields.name),
                    format!("{} (verification failed: {})", original, e),
                )
            })?;

        match found {
            Some(step) => {
                info!(
                    remote_id = %step.id,
                    name = %request.fields.name,
                    "Step was created despite the reported failure"
                );
                Ok(CreatedStep {
                    remote_id: step.id,
                    index: Some(step.index),
                    verified_after_failure: true,
                })
            }
            None => Err(original),
        }
    }

    /// A remote step in the scope with this name and parent whose id is not
    /// in `known_ids`. The most recently listed match wins.
    pub async fn find_unclaimed(
        &self,
        scope: &ScopeKey,
        name: &str,
        parent_remote_id: Option<&str>,
        known_ids: &HashSet<String>,
    ) -> Result<Option<RemoteStep>, ApiError> {
        let parent = normalize_remote_id(parent_remote_id);
        let steps = self.fetch_all(scope).await?;
        Ok(steps
            .into_iter()
            .filter(|s| s.name == name)
            .filter(|s| s.parent_remote_id() == parent)
            .filter(|s| !known_ids.contains(&s.id))
            .last())
    }

    /// Check the created step landed in the right process; delete it if not
    async fn confirm_attachment(
        &self,
        scope: &ScopeKey,
        response: Map<String, Value>,
    ) -> Result<CreatedStep, ApiError> {
        let Some(remote_id) = response.get("Id").and_then(id_from_value) else {
            return Err(ApiError::decode(self.provider(), "create response carried no step id"));
        };

        // Prefer the stored object; fall back to what the create echoed
        let stored = match self.api.get_step(&scope.project_id, &remote_id).await {
            Ok(object) => object,
            Err(e) => {
                debug!(remote_id = %remote_id, error = %e, "Could not re-read created step");
                response
            }
        };

        let actual_process = stored
            .get("ProcessId")
            .and_then(id_from_value)
            .unwrap_or_else(|| scope.remote_process_id().to_string());
        let actual = normalize_remote_id(Some(&actual_process))
            .unwrap_or(ScopeKey::JOB_PROCESS_ID)
            .to_string();
        if actual != scope.remote_process_id() {
            warn!(
                remote_id = %remote_id,
                expected = scope.remote_process_id(),
                actual = %actual,
                "Created step attached to the wrong process, deleting it"
            );
            if let Err(e) = self.delete(scope, &remote_id).await {
                warn!(remote_id = %remote_id, error = %e, "Failed to delete misattached step");
            }
            return Err(ApiError::WrongAttachment {
                provider: self.provider().to_string(),
                remote_id,
                expected: scope.remote_process_id().to_string(),
                actual,
            });
        }

        let index = stored.get("Index").and_then(Value::as_i64);
        Ok(CreatedStep {
            remote_id,
            index,
            verified_after_failure: false,
        })
    }

    /// Apply `changes` to a step with a full-object round trip.
    ///
    /// A PATCH that reports failure is re-read; if the remote already
    /// reflects the change it counts as applied.
    pub async fn update(
        &self,
        scope: &ScopeKey,
        remote_id: &str,
        changes: &StepChanges,
    ) -> Result<(), ApiError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut object = self.api.get_step(&scope.project_id, remote_id).await?;
        let touched = changes.apply_to(&mut object);
        debug!(remote_id = %remote_id, fields = ?touched, "Updating remote step");

        match self
            .api
            .patch_step(&scope.project_id, remote_id, object)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_auth_error() || e.is_not_found() => Err(e),
            Err(e) => {
                warn!(remote_id = %remote_id, error = %e, "PATCH reported failure, re-reading step");
                if !self.verify_delay.is_zero() {
                    tokio::time::sleep(self.verify_delay).await;
                }
                match self.api.get_step(&scope.project_id, remote_id).await {
                    Ok(current) if changes.is_reflected_in(&current) => {
                        info!(remote_id = %remote_id, "Update was applied despite the reported failure");
                        Ok(())
                    }
                    Ok(_) => Err(e),
                    Err(verify) => Err(ApiError::ambiguous(
                        self.provider(),
                        format!("update step {}", remote_id),
                        format!("{} (verification failed: {})", e, verify),
                    )),
                }
            }
        }
    }

    /// Move a step under another parent (`None` for root)
    pub async fn set_parent(
        &self,
        scope: &ScopeKey,
        remote_id: &str,
        parent_remote_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let changes =
            StepChanges::parent_only(normalize_remote_id(parent_remote_id).map(str::to_string));
        self.update(scope, remote_id, &changes).await
    }

    pub async fn delete(&self, scope: &ScopeKey, remote_id: &str) -> Result<DeleteOutcome, ApiError> {
        match self.api.delete_step(&scope.project_id, remote_id).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => {
                debug!(remote_id = %remote_id, "Step already absent remotely");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }
}

/// First created object in a create response (list or single object)
fn first_created(body: &Value) -> Option<Map<String, Value>> {
    let object = match body {
        Value::Array(items) => items.first()?.as_object()?,
        Value::Object(object) => object,
        _ => return None,
    };
    object.get("Id").and_then(id_from_value)?;
    Some(object.clone())
}
