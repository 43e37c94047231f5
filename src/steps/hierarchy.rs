//! Hierarchy labels ("1", "1.2", "2.1.3") for a scope's forest.
//!
//! Labels are computed by one side-effect-free walk over the forest. The
//! walk can take hypothetical placements for some nodes (an edited parent or
//! sequence not yet applied) without touching the forest itself.

use std::collections::{HashMap, HashSet};

use super::forest::Forest;
use super::node::LocalId;

/// Label for nodes that cannot be reached from a root
pub const UNASSIGNED_LABEL: &str = "?";

const INDENT: &str = "    ";
const BRANCH: &str = "└─ ";
const UNNAMED: &str = "Unnamed";

/// Hypothetical parent/sequence for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub parent: Option<LocalId>,
    pub sequence: i64,
}

/// Computed display data for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabel {
    /// Dotted path label, or `?` when unreachable
    pub label: String,
    /// Number of dots in the label
    pub depth: usize,
    /// Ancestor names joined with " > "
    pub display_path: String,
    /// Name indented by depth, with a branch marker below the roots
    pub display_name: String,
}

impl NodeLabel {
    pub fn is_assigned(&self) -> bool {
        self.label != UNASSIGNED_LABEL
    }
}

/// Labels for every node of a forest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyLabels {
    labels: HashMap<LocalId, NodeLabel>,
}

impl HierarchyLabels {
    pub fn get(&self, id: LocalId) -> Option<&NodeLabel> {
        self.labels.get(&id)
    }

    /// The dotted label, `?` for unknown ids
    pub fn label(&self, id: LocalId) -> &str {
        self.labels
            .get(&id)
            .map(|l| l.label.as_str())
            .unwrap_or(UNASSIGNED_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocalId, &NodeLabel)> {
        self.labels.iter()
    }
}

/// Indentation used for outline rendering
pub fn indented_name(name: &str, depth: usize) -> String {
    if depth == 0 {
        name.to_string()
    } else {
        format!("{}{}{}", INDENT.repeat(depth), BRANCH, name)
    }
}

pub struct HierarchyLabeler;

impl HierarchyLabeler {
    /// Labels for the forest as stored
    pub fn label(forest: &Forest) -> HierarchyLabels {
        Self::label_with_overrides(forest, &HashMap::new())
    }

    /// Labels with some nodes placed hypothetically.
    ///
    /// A node whose effective parent is not in the forest, or that sits on a
    /// cycle introduced by an override, gets the `?` label.
    pub fn label_with_overrides(
        forest: &Forest,
        overrides: &HashMap<LocalId, Placement>,
    ) -> HierarchyLabels {
        let mut effective_seq: HashMap<LocalId, i64> = HashMap::new();
        let mut children: HashMap<LocalId, Vec<LocalId>> = HashMap::new();
        let mut roots: Vec<LocalId> = Vec::new();

        for node in forest.nodes() {
            let placement = overrides.get(&node.local_id);
            let sequence = placement.map_or(node.sequence, |p| p.sequence);
            let parent = placement.map_or(node.parent, |p| p.parent);
            effective_seq.insert(node.local_id, sequence);
            match parent {
                None => roots.push(node.local_id),
                Some(parent) => children.entry(parent).or_default().push(node.local_id),
            }
        }

        let sort = |ids: &mut Vec<LocalId>| {
            ids.sort_by_key(|id| (effective_seq.get(id).copied().unwrap_or(0), *id));
        };
        sort(&mut roots);
        for kids in children.values_mut() {
            sort(kids);
        }

        let name_of = |id: LocalId| -> String {
            forest
                .get(id)
                .map(|n| n.name().trim())
                .filter(|n| !n.is_empty())
                .unwrap_or(UNNAMED)
                .to_string()
        };

        let mut labels: HashMap<LocalId, NodeLabel> = HashMap::with_capacity(forest.len());
        let mut seen: HashSet<LocalId> = HashSet::new();

        for (position, root) in roots.iter().enumerate() {
            let name = name_of(*root);
            labels.insert(
                *root,
                NodeLabel {
                    label: (position + 1).to_string(),
                    depth: 0,
                    display_path: name.clone(),
                    display_name: indented_name(&name, 0),
                },
            );

            let mut stack = vec![*root];
            while let Some(parent) = stack.pop() {
                if !seen.insert(parent) {
                    continue;
                }
                let Some(parent_label) = labels.get(&parent).cloned() else {
                    continue;
                };
                let Some(kids) = children.get(&parent) else {
                    continue;
                };
                for (position, child) in kids.iter().enumerate() {
                    if seen.contains(child) {
                        continue;
                    }
                    let name = name_of(*child);
                    let depth = parent_label.depth + 1;
                    labels.insert(
                        *child,
                        NodeLabel {
                            label: format!("{}.{}", parent_label.label, position + 1),
                            depth,
                            display_path: format!("{} > {}", parent_label.display_path, name),
                            display_name: indented_name(&name, depth),
                        },
                    );
                    stack.push(*child);
                }
            }
        }

        for node in forest.nodes() {
            labels.entry(node.local_id).or_insert_with(|| {
                let name = name_of(node.local_id);
                NodeLabel {
                    label: UNASSIGNED_LABEL.to_string(),
                    depth: 0,
                    display_path: name.clone(),
                    display_name: name,
                }
            });
        }

        HierarchyLabels { labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::forest::tests::add;
    use crate::steps::node::{ScopeKey, StepFields, StepNode};
    use crate::steps::step_type::StepType;

    #[test]
    fn test_single_root_with_two_children() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "ChildA", Some(root), 20);
        let b = add(&mut forest, "ChildB", Some(root), 30);

        let labels = HierarchyLabeler::label(&forest);
        assert_eq!(labels.label(root), "1");
        assert_eq!(labels.label(a), "1.1");
        assert_eq!(labels.label(b), "1.2");
        assert_eq!(labels.get(b).unwrap().depth, 1);
        assert_eq!(labels.get(b).unwrap().display_path, "Root > ChildB");
        assert_eq!(labels.get(b).unwrap().display_name, "    └─ ChildB");
    }

    #[test]
    fn test_roots_ordered_by_sequence_then_id() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let first = add(&mut forest, "First", None, 50);
        let second = add(&mut forest, "Second", None, 50);
        let zero = add(&mut forest, "Zero", None, 10);
        let deep = add(&mut forest, "Deep", Some(second), 10);
        let deeper = add(&mut forest, "Deeper", Some(deep), 10);

        let labels = HierarchyLabeler::label(&forest);
        assert_eq!(labels.label(zero), "1");
        assert_eq!(labels.label(first), "2");
        assert_eq!(labels.label(second), "3");
        assert_eq!(labels.label(deeper), "3.1.1");
        assert_eq!(labels.get(deeper).unwrap().depth, 2);
    }

    #[test]
    fn test_labels_are_deterministic() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        for i in 0..5 {
            add(&mut forest, &format!("C{i}"), Some(root), 10);
        }
        assert_eq!(
            HierarchyLabeler::label(&forest),
            HierarchyLabeler::label(&forest)
        );
    }

    #[test]
    fn test_overrides_do_not_mutate_forest() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "A", Some(root), 20);
        let b = add(&mut forest, "B", Some(root), 30);

        let overrides = HashMap::from([(
            b,
            Placement {
                parent: Some(a),
                sequence: 40,
            },
        )]);
        let preview = HierarchyLabeler::label_with_overrides(&forest, &overrides);
        assert_eq!(preview.label(b), "1.1.1");

        assert_eq!(forest.get(b).unwrap().parent, Some(root));
        assert_eq!(HierarchyLabeler::label(&forest).label(b), "1.2");
    }

    #[test]
    fn test_override_cycle_is_unassigned() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "A", Some(root), 20);
        let a1 = add(&mut forest, "A1", Some(a), 30);

        let overrides = HashMap::from([(
            a,
            Placement {
                parent: Some(a1),
                sequence: 20,
            },
        )]);
        let preview = HierarchyLabeler::label_with_overrides(&forest, &overrides);
        assert_eq!(preview.label(root), "1");
        assert_eq!(preview.label(a), UNASSIGNED_LABEL);
        assert_eq!(preview.label(a1), UNASSIGNED_LABEL);
    }

    #[test]
    fn test_parent_outside_forest_is_unassigned() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        add(&mut forest, "Root", None, 10);
        let stray = StepNode::new(
            ScopeKey::job("p"),
            StepFields::new("Stray", StepType::Activity),
        );
        let stray_id = stray.local_id;
        forest.insert(stray).unwrap();

        let overrides = HashMap::from([(
            stray_id,
            Placement {
                parent: Some(LocalId::from_raw(u64::MAX)),
                sequence: 0,
            },
        )]);
        let preview = HierarchyLabeler::label_with_overrides(&forest, &overrides);
        assert_eq!(preview.label(stray_id), "?");
        assert!(!preview.get(stray_id).unwrap().is_assigned());
        assert_eq!(preview.len(), 2);
    }

    #[test]
    fn test_unnamed_steps_in_display_path() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "", None, 10);
        let child = add(&mut forest, "Child", Some(root), 20);
        let labels = HierarchyLabeler::label(&forest);
        assert_eq!(labels.get(child).unwrap().display_path, "Unnamed > Child");
    }
}
