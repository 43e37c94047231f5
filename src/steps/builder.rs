//! Build a scope's forest from a remote step listing.

use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use super::forest::Forest;
use super::node::{LocalId, ScopeKey, StepNode};
use super::resequence::index_to_sequence;
use crate::api::RemoteStep;

/// Something off in the remote data that loading tolerated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// Step type did not normalize; loaded as the default type
    UnknownStepType { remote_id: String, raw: String },
    /// Parent id not present in the scope (or part of a remote cycle);
    /// the step was loaded as a root
    OrphanChild {
        remote_id: String,
        parent_remote_id: String,
    },
    /// Same remote id listed twice; later copies ignored
    DuplicateId { remote_id: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::UnknownStepType { remote_id, raw } => {
                write!(f, "step {remote_id}: unknown step type '{raw}'")
            }
            LoadWarning::OrphanChild {
                remote_id,
                parent_remote_id,
            } => write!(
                f,
                "step {remote_id}: parent {parent_remote_id} not found, loaded as root"
            ),
            LoadWarning::DuplicateId { remote_id } => {
                write!(f, "step {remote_id}: listed more than once")
            }
        }
    }
}

/// Build the forest for `scope` from remote steps.
///
/// Sequences come straight from `Index * 10`; nothing is resequenced, so a
/// freshly loaded scope has no pending changes.
pub fn build_forest(scope: &ScopeKey, steps: &[RemoteStep]) -> (Forest, Vec<LoadWarning>) {
    let mut forest = Forest::new(scope.clone());
    let mut warnings = Vec::new();
    let mut by_remote: HashMap<String, LocalId> = HashMap::new();
    let mut pending_parents: Vec<(LocalId, String, String)> = Vec::new();

    for step in steps.iter().filter(|s| s.belongs_to(scope)) {
        if by_remote.contains_key(&step.id) {
            warnings.push(LoadWarning::DuplicateId {
                remote_id: step.id.clone(),
            });
            continue;
        }
        let (fields, raw) = step.to_fields();
        if let Some(raw) = &raw {
            warnings.push(LoadWarning::UnknownStepType {
                remote_id: step.id.clone(),
                raw: raw.clone(),
            });
        }
        let mut node = StepNode::new(scope.clone(), fields);
        node.remote_id = Some(step.id.clone());
        node.sequence = index_to_sequence(step.index);
        node.raw_step_type = raw;
        if let Some(parent) = step.parent_remote_id() {
            pending_parents.push((node.local_id, step.id.clone(), parent.to_string()));
        }
        by_remote.insert(step.id.clone(), node.local_id);
        // Roots at insert time; parents are linked once every node exists
        if let Err(e) = forest.insert(node) {
            warn!(remote_id = %step.id, error = %e, "Skipping step");
        }
    }

    for (local_id, remote_id, parent_remote_id) in pending_parents {
        let linked = match by_remote.get(&parent_remote_id) {
            Some(parent) => forest.attach(local_id, Some(*parent)).is_ok(),
            None => false,
        };
        if !linked {
            warn!(
                remote_id = %remote_id,
                parent = %parent_remote_id,
                "Parent not found in scope, loading step as root"
            );
            warnings.push(LoadWarning::OrphanChild {
                remote_id,
                parent_remote_id,
            });
        }
    }

    (forest, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::hierarchy::HierarchyLabeler;
    use crate::steps::step_type::StepType;
    use serde_json::json;

    fn remote(value: serde_json::Value) -> RemoteStep {
        serde_json::from_value(value).unwrap()
    }

    fn local(forest: &Forest, remote_id: &str) -> LocalId {
        forest.find_by_remote_id(remote_id).unwrap().local_id
    }

    #[test]
    fn test_build_links_parents_in_any_order() {
        let scope = ScopeKey::job("p");
        let steps = vec![
            remote(json!({"Id": "3", "Name": "Child", "ParentStepId": "1", "Index": 2, "StepType": "ACTIVITY"})),
            remote(json!({"Id": "1", "Name": "Root", "Index": 1, "StepType": "COMPOSITE"})),
            remote(json!({"Id": "2", "Name": "First", "ParentStepId": "1", "Index": 1})),
        ];
        let (forest, warnings) = build_forest(&scope, &steps);
        assert!(warnings.is_empty());
        assert_eq!(forest.len(), 3);

        let labels = HierarchyLabeler::label(&forest);
        assert_eq!(labels.label(local(&forest, "1")), "1");
        assert_eq!(labels.label(local(&forest, "2")), "1.1");
        assert_eq!(labels.label(local(&forest, "3")), "1.2");
        assert_eq!(forest.get(local(&forest, "3")).unwrap().sequence, 20);
        assert_eq!(
            forest.get(local(&forest, "1")).unwrap().step_type(),
            StepType::Composite
        );
    }

    #[test]
    fn test_orphan_becomes_root_with_warning() {
        let scope = ScopeKey::job("p");
        let steps = vec![remote(
            json!({"Id": "5", "Name": "Lost", "ParentStepId": "404", "StepType": "ACTIVITY"}),
        )];
        let (forest, warnings) = build_forest(&scope, &steps);
        assert!(forest.get(local(&forest, "5")).unwrap().is_root());
        assert_eq!(
            warnings,
            vec![LoadWarning::OrphanChild {
                remote_id: "5".into(),
                parent_remote_id: "404".into()
            }]
        );
    }

    #[test]
    fn test_remote_cycle_is_broken() {
        let scope = ScopeKey::job("p");
        let steps = vec![
            remote(json!({"Id": "1", "Name": "A", "ParentStepId": "2", "StepType": "ACTIVITY"})),
            remote(json!({"Id": "2", "Name": "B", "ParentStepId": "1", "StepType": "ACTIVITY"})),
        ];
        let (forest, warnings) = build_forest(&scope, &steps);
        assert_eq!(forest.roots().len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(forest.preorder().len(), 2);
    }

    #[test]
    fn test_unknown_type_and_foreign_scope() {
        let scope = ScopeKey::process("p", "7");
        let steps = vec![
            remote(json!({"Id": "1", "Name": "Odd", "ProcessId": "7", "StepType": "HOLOGRAM"})),
            remote(json!({"Id": "2", "Name": "Other", "ProcessId": "8", "StepType": "ACTIVITY"})),
        ];
        let (forest, warnings) = build_forest(&scope, &steps);
        assert_eq!(forest.len(), 1);
        let node = forest.get(local(&forest, "1")).unwrap();
        assert_eq!(node.step_type(), StepType::default());
        assert_eq!(node.raw_step_type.as_deref(), Some("HOLOGRAM"));
        assert!(matches!(
            &warnings[0],
            LoadWarning::UnknownStepType { raw, .. } if raw == "HOLOGRAM"
        ));
    }
}
