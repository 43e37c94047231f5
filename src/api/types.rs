//! Wire types for the remote step API.
//!
//! Ids arrive as strings or numbers depending on the deployment, and
//! `ParentStepId` uses absent, `""` and `"0"` interchangeably for roots.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::steps::{normalize_step_type, ScopeKey, StepFields, StepType};

/// One step as returned by `GET /projects/{projectId}/steps/`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteStep {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, deserialize_with = "de_string")]
    pub name: String,
    #[serde(default)]
    pub step_type: Option<String>,
    /// "Job" or "Process"
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub process_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub parent_step_id: Option<String>,
    #[serde(default, deserialize_with = "de_index")]
    pub index: i64,
    #[serde(default, deserialize_with = "de_bool")]
    pub for_all_variants: bool,
    #[serde(default)]
    pub variant_ids: Vec<Value>,
    #[serde(default, deserialize_with = "de_text_instruction")]
    pub text_instruction: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub image_instruction_id: Option<String>,
    #[serde(default)]
    pub child_step_order: Option<String>,
    #[serde(rename = "StepControlflow", default)]
    pub step_controlflow: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub detection_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub material_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub button_id: Option<String>,
}

impl RemoteStep {
    /// Parent id with root sentinels folded to `None`
    pub fn parent_remote_id(&self) -> Option<&str> {
        normalize_remote_id(self.parent_step_id.as_deref())
    }

    /// Whether this step belongs to the given scope's forest
    pub fn belongs_to(&self, scope: &ScopeKey) -> bool {
        let kind = self.kind.as_deref().map(str::trim).filter(|k| !k.is_empty());
        if kind.is_some_and(|k| !k.eq_ignore_ascii_case(scope.remote_type())) {
            return false;
        }
        let process = normalize_remote_id(self.process_id.as_deref());
        if scope.is_job() {
            process.is_none()
        } else {
            process == Some(scope.remote_process_id())
        }
    }

    /// Process id reported by the remote, `"0"` for job steps
    pub fn reported_process_id(&self) -> &str {
        normalize_remote_id(self.process_id.as_deref()).unwrap_or(ScopeKey::JOB_PROCESS_ID)
    }

    /// Local field set plus the raw step type when it did not normalize
    pub fn to_fields(&self) -> (StepFields, Option<String>) {
        let (step_type, raw) = normalize_step_type(self.step_type.as_deref().unwrap_or(""));
        let fields = StepFields {
            name: self.name.clone(),
            step_type,
            comment: self.comment.clone().filter(|c| !c.is_empty()),
            for_all_variants: self.for_all_variants,
            text_instruction: self.text_instruction.clone(),
            image_instruction_id: normalize_remote_id(self.image_instruction_id.as_deref())
                .map(str::to_string),
            detection_id: normalize_remote_id(self.detection_id.as_deref()).map(str::to_string),
            material_id: normalize_remote_id(self.material_id.as_deref()).map(str::to_string),
            button_id: normalize_remote_id(self.button_id.as_deref()).map(str::to_string),
            control_flow: self
                .step_controlflow
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "None".to_string()),
        };
        (fields, raw)
    }
}

/// Fold absent, empty, `"0"` and `"none"` ids to `None`
pub fn normalize_remote_id(id: Option<&str>) -> Option<&str> {
    let id = id?.trim();
    if id.is_empty() || id == "0" || id.eq_ignore_ascii_case("none") || id.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(id)
    }
}

/// Fields of a step that differ from the last-known remote state.
///
/// `None` means "unchanged"; `parent: Some(None)` moves the step to root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepChanges {
    pub name: Option<String>,
    pub step_type: Option<StepType>,
    pub comment: Option<Option<String>>,
    pub for_all_variants: Option<bool>,
    pub text_instruction: Option<BTreeMap<String, String>>,
    pub image_instruction_id: Option<Option<String>>,
    pub detection_id: Option<Option<String>>,
    pub material_id: Option<Option<String>>,
    pub button_id: Option<Option<String>>,
    pub control_flow: Option<String>,
    pub index: Option<i64>,
    pub parent: Option<Option<String>>,
}

impl StepChanges {
    /// Field changes between two field sets
    pub fn between(old: &StepFields, new: &StepFields) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            (old != new).then(|| new.clone())
        }
        Self {
            name: changed(&old.name, &new.name),
            step_type: changed(&old.step_type, &new.step_type),
            comment: changed(&old.comment, &new.comment),
            for_all_variants: changed(&old.for_all_variants, &new.for_all_variants),
            text_instruction: changed(&old.text_instruction, &new.text_instruction),
            image_instruction_id: changed(&old.image_instruction_id, &new.image_instruction_id),
            detection_id: changed(&old.detection_id, &new.detection_id),
            material_id: changed(&old.material_id, &new.material_id),
            button_id: changed(&old.button_id, &new.button_id),
            control_flow: changed(&old.control_flow, &new.control_flow),
            index: None,
            parent: None,
        }
    }

    /// Only a parent change
    pub fn parent_only(parent: Option<String>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the parent or index changes
    pub fn is_structural(&self) -> bool {
        self.index.is_some() || self.parent.is_some()
    }

    /// Write the changes into a full remote step object. Returns the keys
    /// that were touched (a removed `ParentStepId` counts as touched).
    pub fn apply_to(&self, object: &mut Map<String, Value>) -> Vec<&'static str> {
        let mut touched = Vec::new();
        let mut set = |key: &'static str, value: Value, object: &mut Map<String, Value>| {
            object.insert(key.to_string(), value);
            touched.push(key);
        };

        if let Some(name) = &self.name {
            set("Name", Value::from(name.as_str()), object);
        }
        if let Some(step_type) = self.step_type {
            set("StepType", Value::from(step_type.as_str()), object);
            set(
                "ChildStepOrder",
                Value::from(step_type.child_step_order()),
                object,
            );
        }
        if let Some(comment) = &self.comment {
            set("Comment", opt_value(comment.as_deref()), object);
        }
        if let Some(for_all) = self.for_all_variants {
            set("ForAllVariants", Value::from(for_all), object);
        }
        if let Some(text) = &self.text_instruction {
            set("TextInstruction", text_value(text), object);
        }
        if let Some(image) = &self.image_instruction_id {
            set(
                "ImageInstructionId",
                Value::from(image.as_deref().unwrap_or("0")),
                object,
            );
        }
        if let Some(detection) = &self.detection_id {
            set("DetectionId", opt_value(detection.as_deref()), object);
        }
        if let Some(material) = &self.material_id {
            set("MaterialId", opt_value(material.as_deref()), object);
        }
        if let Some(button) = &self.button_id {
            set("ButtonId", opt_value(button.as_deref()), object);
        }
        if let Some(flow) = &self.control_flow {
            set("StepControlflow", Value::from(flow.as_str()), object);
        }
        if let Some(index) = self.index {
            set("Index", Value::from(index), object);
        }
        if let Some(parent) = &self.parent {
            match parent {
                Some(parent) => set("ParentStepId", Value::from(parent.as_str()), object),
                None => {
                    // Roots carry no ParentStepId at all; "0" is rejected by some deployments
                    object.remove("ParentStepId");
                    touched.push("ParentStepId");
                }
            }
        }
        touched
    }

    /// Whether a fetched object already reflects these changes
    pub fn is_reflected_in(&self, object: &Map<String, Value>) -> bool {
        let mut expected = object.clone();
        let touched = self.apply_to(&mut expected);
        touched.into_iter().all(|key| {
            if key == "ParentStepId" {
                let actual = object.get(key).and_then(id_from_value);
                let wanted = expected.get(key).and_then(id_from_value);
                normalize_remote_id(actual.as_deref()) == normalize_remote_id(wanted.as_deref())
            } else {
                object.get(key) == expected.get(key)
            }
        })
    }
}

/// Payload object for `POST /projects/{projectId}/steps/`
pub fn create_payload(
    scope: &ScopeKey,
    fields: &StepFields,
    parent_remote_id: Option<&str>,
    index: i64,
) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("Type".into(), Value::from(scope.remote_type()));
    object.insert("Name".into(), Value::from(fields.name.as_str()));
    object.insert("StepType".into(), Value::from(fields.step_type.as_str()));
    object.insert("ProcessId".into(), Value::from(scope.remote_process_id()));
    object.insert("Index".into(), Value::from(index));
    object.insert("ForAllVariants".into(), Value::from(fields.for_all_variants));
    object.insert("VariantIds".into(), Value::Array(Vec::new()));
    object.insert("TextInstruction".into(), text_value(&fields.text_instruction));
    object.insert(
        "ImageInstructionId".into(),
        Value::from(fields.image_instruction_id.as_deref().unwrap_or("0")),
    );
    object.insert(
        "ChildStepOrder".into(),
        Value::from(fields.child_step_order()),
    );
    object.insert(
        "StepControlflow".into(),
        Value::from(fields.control_flow.as_str()),
    );
    object.insert("StepConditions".into(), Value::Array(Vec::new()));
    object.insert("Comment".into(), opt_value(fields.comment.as_deref()));
    if let Some(detection) = &fields.detection_id {
        object.insert("DetectionId".into(), Value::from(detection.as_str()));
    }
    if let Some(material) = &fields.material_id {
        object.insert("MaterialId".into(), Value::from(material.as_str()));
    }
    if let Some(button) = &fields.button_id {
        object.insert("ButtonId".into(), Value::from(button.as_str()));
    }
    if let Some(parent) = normalize_remote_id(parent_remote_id) {
        object.insert("ParentStepId".into(), Value::from(parent));
    }
    object
}

fn opt_value(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn text_value(text: &BTreeMap<String, String>) -> Value {
    Value::Object(
        text.iter()
            .map(|(locale, body)| (locale.clone(), Value::from(body.as_str())))
            .collect(),
    )
}

/// String form of an id value (string or number)
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid step id: {value}")))
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(id_from_value(&value))
}

fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn de_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn de_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn de_text_instruction<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(locale, body)| match body {
                Value::String(s) => Some((locale, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}
