//! In-memory step API for tests.
//!
//! Stores step objects the way the remote does and can be told to misbehave
//! the way the remote is known to: report 500 after persisting a create,
//! time out, attach a created step to the wrong process, or fail a PATCH
//! that was in fact applied.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::error::ApiError;
use super::step_api::StepApi;
use super::types::{id_from_value, normalize_remote_id, RemoteStep};

const MOCK_PROVIDER: &str = "mock-steps";

/// Misbehavior for the next create call
#[derive(Debug, Clone, PartialEq)]
pub enum CreateFault {
    /// Persist the step, then answer with this status
    ErrorAfterPersist(u16),
    /// Answer with this status without persisting
    ErrorWithoutPersist(u16),
    /// Persist the step, then time out
    TimeoutAfterPersist,
    /// Time out without persisting
    TimeoutWithoutPersist,
    /// Persist the step and answer 200 with an empty body
    EmptyBodyAfterPersist,
    /// Persist the step under another process id and answer 200
    PersistUnderProcess(String),
}

/// Misbehavior for the next PATCH call
#[derive(Debug, Clone, PartialEq)]
pub enum PatchFault {
    /// Apply the change, then answer with this status
    ErrorAfterApply(u16),
    /// Answer with this status without applying
    ErrorWithoutApply(u16),
}

/// One recorded API call
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: String,
    pub step_id: Option<String>,
    /// Request body for writes
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct MockState {
    /// project id -> step objects in creation order
    steps: Vec<(String, Map<String, Value>)>,
    next_id: u64,
    create_faults: VecDeque<CreateFault>,
    /// step name -> fault for the create carrying that name
    named_create_faults: Vec<(String, CreateFault)>,
    patch_faults: VecDeque<PatchFault>,
    list_failures: usize,
    get_failures: usize,
    calls: Vec<MockCall>,
}

#[derive(Clone, Default)]
pub struct MockStepApi {
    state: Arc<Mutex<MockState>>,
}

impl MockStepApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state.lock().unwrap().next_id = 1000;
        api
    }

    /// Insert a step object as-is (it must carry an `Id`)
    pub fn seed(&self, project_id: &str, step: Value) {
        let mut state = self.state.lock().unwrap();
        if let Value::Object(object) = step {
            state.steps.push((project_id.to_string(), object));
        }
    }

    /// Queue a fault for the next create call
    pub fn fail_next_create(&self, fault: CreateFault) {
        self.state.lock().unwrap().create_faults.push_back(fault);
    }

    /// Fault for the create of the step with this name, whenever it comes
    pub fn fail_create_of(&self, name: &str, fault: CreateFault) {
        self.state
            .lock()
            .unwrap()
            .named_create_faults
            .push((name.to_string(), fault));
    }

    /// Queue a fault for the next PATCH call
    pub fn fail_next_patch(&self, fault: PatchFault) {
        self.state.lock().unwrap().patch_faults.push_back(fault);
    }

    /// Make the next `count` list calls fail with 500
    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().unwrap().list_failures = count;
    }

    /// Make the next `count` single-step GETs fail with 500
    pub fn fail_next_gets(&self, count: usize) {
        self.state.lock().unwrap().get_failures = count;
    }

    /// Current remote steps of a project
    pub fn steps(&self, project_id: &str) -> Vec<RemoteStep> {
        self.state
            .lock()
            .unwrap()
            .steps
            .iter()
            .filter(|(p, _)| p == project_id)
            .filter_map(|(_, o)| serde_json::from_value(Value::Object(o.clone())).ok())
            .collect()
    }

    /// Remote step with the given name
    pub fn step_named(&self, project_id: &str, name: &str) -> Option<RemoteStep> {
        self.steps(project_id).into_iter().find(|s| s.name == name)
    }

    /// Raw stored object for a step
    pub fn raw_step(&self, project_id: &str, step_id: &str) -> Option<Map<String, Value>> {
        let state = self.state.lock().unwrap();
        state
            .steps
            .iter()
            .find(|(p, o)| p == project_id && object_id(o).as_deref() == Some(step_id))
            .map(|(_, o)| o.clone())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls of one operation ("list", "get", "create", "patch", "delete")
    pub fn calls_of(&self, operation: &str) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .collect()
    }

    /// Number of create, patch and delete calls
    pub fn write_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c.operation.as_str(), "create" | "patch" | "delete"))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn log_call(&self, operation: &str, step_id: Option<&str>, body: Option<Value>) {
        self.state.lock().unwrap().calls.push(MockCall {
            operation: operation.to_string(),
            step_id: step_id.map(str::to_string),
            body,
        });
    }
}

fn object_id(object: &Map<String, Value>) -> Option<String> {
    object.get("Id").and_then(id_from_value)
}

#[async_trait]
impl StepApi for MockStepApi {
    fn name(&self) -> &str {
        MOCK_PROVIDER
    }

    async fn list_steps(&self, project_id: &str) -> Result<Vec<RemoteStep>, ApiError> {
        self.log_call("list", None, None);
        {
            let mut state = self.state.lock().unwrap();
            if state.list_failures > 0 {
                state.list_failures -= 1;
                return Err(ApiError::http(MOCK_PROVIDER, 500, "list failed"));
            }
        }
        Ok(self.steps(project_id))
    }

    async fn get_step(
        &self,
        project_id: &str,
        step_id: &str,
    ) -> Result<Map<String, Value>, ApiError> {
        self.log_call("get", Some(step_id), None);
        {
            let mut state = self.state.lock().unwrap();
            if state.get_failures > 0 {
                state.get_failures -= 1;
                return Err(ApiError::http(MOCK_PROVIDER, 500, "get failed"));
            }
        }
        self.raw_step(project_id, step_id)
            .ok_or_else(|| ApiError::not_found(MOCK_PROVIDER, format!("step {}", step_id)))
    }

    async fn create_steps(
        &self,
        project_id: &str,
        payload: Vec<Map<String, Value>>,
    ) -> Result<Value, ApiError> {
        self.log_call(
            "create",
            None,
            Some(Value::Array(
                payload.iter().cloned().map(Value::Object).collect(),
            )),
        );

        let (fault, created) = {
            let mut state = self.state.lock().unwrap();
            let first_name = payload
                .first()
                .and_then(|o| o.get("Name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let named = first_name.and_then(|name| {
                let pos = state
                    .named_create_faults
                    .iter()
                    .position(|(n, _)| *n == name)?;
                Some(state.named_create_faults.remove(pos).1)
            });
            let fault = named.or_else(|| state.create_faults.pop_front());
            let persist = !matches!(
                fault,
                Some(CreateFault::ErrorWithoutPersist(_)) | Some(CreateFault::TimeoutWithoutPersist)
            );

            let mut created = Vec::new();
            if persist {
                for mut object in payload {
                    state.next_id += 1;
                    object.insert("Id".into(), Value::from(state.next_id.to_string()));
                    if let Some(CreateFault::PersistUnderProcess(process)) = &fault {
                        object.insert("ProcessId".into(), Value::from(process.as_str()));
                    }
                    if normalize_remote_id(
                        object
                            .get("ParentStepId")
                            .and_then(id_from_value)
                            .as_deref(),
                    )
                    .is_none()
                    {
                        object.remove("ParentStepId");
                    }
                    state.steps.push((project_id.to_string(), object.clone()));
                    created.push(Value::Object(object));
                }
            }
            (fault, created)
        };

        // The step is stored before the answer arrives; concurrent callers
        // see it in their lists
        tokio::task::yield_now().await;

        match fault {
            Some(CreateFault::ErrorAfterPersist(status))
            | Some(CreateFault::ErrorWithoutPersist(status)) => Err(ApiError::from_status(
                MOCK_PROVIDER,
                status,
                format!("project {}", project_id),
                "Internal Server Error",
            )),
            Some(CreateFault::TimeoutAfterPersist) | Some(CreateFault::TimeoutWithoutPersist) => {
                Err(ApiError::network(MOCK_PROVIDER, "timed out"))
            }
            Some(CreateFault::EmptyBodyAfterPersist) => Ok(Value::Null),
            Some(CreateFault::PersistUnderProcess(_)) | None => Ok(Value::Array(created)),
        }
    }

    async fn patch_step(
        &self,
        project_id: &str,
        step_id: &str,
        object: Map<String, Value>,
    ) -> Result<(), ApiError> {
        self.log_call("patch", Some(step_id), Some(Value::Object(object.clone())));

        let mut state = self.state.lock().unwrap();
        let fault = state.patch_faults.pop_front();
        if let Some(PatchFault::ErrorWithoutApply(status)) = fault {
            return Err(ApiError::http(MOCK_PROVIDER, status, "patch failed"));
        }

        let Some(entry) = state
            .steps
            .iter_mut()
            .find(|(p, o)| p == project_id && object_id(o).as_deref() == Some(step_id))
        else {
            return Err(ApiError::not_found(MOCK_PROVIDER, format!("step {}", step_id)));
        };
        let mut object = object;
        object.insert("Id".into(), Value::from(step_id));
        entry.1 = object;

        match fault {
            Some(PatchFault::ErrorAfterApply(status)) => {
                Err(ApiError::http(MOCK_PROVIDER, status, "patch failed"))
            }
            _ => Ok(()),
        }
    }

    async fn delete_step(&self, project_id: &str, step_id: &str) -> Result<(), ApiError> {
        self.log_call("delete", Some(step_id), None);

        let mut state = self.state.lock().unwrap();
        let before = state.steps.len();
        state
            .steps
            .retain(|(p, o)| !(p == project_id && object_id(o).as_deref() == Some(step_id)));
        if state.steps.len() == before {
            return Err(ApiError::not_found(MOCK_PROVIDER, format!("step {}", step_id)));
        }
        Ok(())
    }
}
