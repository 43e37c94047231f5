//! Per-scope step forest.
//!
//! The parent relation is kept cycle-free: every reparent walks the
//! ancestors of the proposed parent and is rejected before mutation when it
//! reaches the node being moved.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::node::{LocalId, ScopeKey, StepNode};
use crate::error::StepError;

#[derive(Debug, Clone)]
pub struct Forest {
    scope: ScopeKey,
    nodes: BTreeMap<LocalId, StepNode>,
}

impl Forest {
    pub fn new(scope: ScopeKey) -> Self {
        Self {
            scope,
            nodes: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: LocalId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: LocalId) -> Option<&StepNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: LocalId) -> Option<&mut StepNode> {
        self.nodes.get_mut(&id)
    }

    /// Lookup that fails with `UnknownNode`
    pub fn node(&self, id: LocalId) -> Result<&StepNode, StepError> {
        self.nodes.get(&id).ok_or(StepError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: LocalId) -> Result<&mut StepNode, StepError> {
        self.nodes.get_mut(&id).ok_or(StepError::UnknownNode(id))
    }

    /// All nodes in local id order
    pub fn nodes(&self) -> impl Iterator<Item = &StepNode> {
        self.nodes.values()
    }

    pub fn find_by_remote_id(&self, remote_id: &str) -> Option<&StepNode> {
        self.nodes
            .values()
            .find(|n| n.remote_id.as_deref() == Some(remote_id))
    }

    /// Insert a node, validating its scope and parent
    pub fn insert(&mut self, node: StepNode) -> Result<LocalId, StepError> {
        if node.scope != self.scope {
            return Err(StepError::CrossScope {
                node_scope: node.scope,
                target_scope: self.scope.clone(),
            });
        }
        if let Some(parent) = node.parent {
            if !self.contains(parent) {
                return Err(StepError::UnknownNode(parent));
            }
        }
        let id = node.local_id;
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Ancestors of a node, nearest first
    pub fn ancestors_of(&self, id: LocalId) -> Result<Vec<LocalId>, StepError> {
        let mut current = self.node(id)?.parent;
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([id]);
        while let Some(parent) = current {
            // Stop at dangling parents or (impossible by construction) cycles
            if !seen.insert(parent) {
                break;
            }
            let Some(node) = self.nodes.get(&parent) else {
                break;
            };
            ancestors.push(parent);
            current = node.parent;
        }
        Ok(ancestors)
    }

    /// Number of ancestors
    pub fn depth_of(&self, id: LocalId) -> Result<usize, StepError> {
        Ok(self.ancestors_of(id)?.len())
    }

    /// Reparent `id` under `parent` (`None` makes it a root).
    ///
    /// Descendants keep pointing at `id` and so move with it.
    pub fn attach(&mut self, id: LocalId, parent: Option<LocalId>) -> Result<(), StepError> {
        self.node(id)?;
        if let Some(parent_id) = parent {
            let parent_node = self.node(parent_id)?;
            if parent_node.scope != self.scope {
                return Err(StepError::CrossScope {
                    node_scope: parent_node.scope.clone(),
                    target_scope: self.scope.clone(),
                });
            }
            if parent_id == id || self.ancestors_of(parent_id)?.contains(&id) {
                return Err(StepError::CircularParent {
                    node: id,
                    parent: parent_id,
                });
            }
        }
        self.node_mut(id)?.parent = parent;
        Ok(())
    }

    /// Make a node a root; its subtree comes along
    pub fn detach(&mut self, id: LocalId) -> Result<(), StepError> {
        self.attach(id, None)
    }

    /// Children of `parent` (roots for `None`), ordered by `(sequence, local id)`
    pub fn children_of(&self, parent: Option<LocalId>) -> Vec<LocalId> {
        let mut children: Vec<&StepNode> = self
            .nodes
            .values()
            .filter(|n| match parent {
                Some(_) => n.parent == parent,
                None => self.is_effective_root(n),
            })
            .collect();
        children.sort_by_key(|n| (n.sequence, n.local_id));
        children.into_iter().map(|n| n.local_id).collect()
    }

    pub fn roots(&self) -> Vec<LocalId> {
        self.children_of(None)
    }

    /// Whole-scope preorder, siblings ordered by `(sequence, local id)`
    pub fn preorder(&self) -> Vec<LocalId> {
        let mut children: HashMap<Option<LocalId>, Vec<&StepNode>> = HashMap::new();
        for node in self.nodes.values() {
            let key = if self.is_effective_root(node) {
                None
            } else {
                node.parent
            };
            children.entry(key).or_default().push(node);
        }
        for kids in children.values_mut() {
            kids.sort_by_key(|n| (n.sequence, n.local_id));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<LocalId> = children
            .get(&None)
            .map(|roots| roots.iter().rev().map(|n| n.local_id).collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(kids) = children.get(&Some(id)) {
                stack.extend(kids.iter().rev().map(|n| n.local_id));
            }
        }
        order
    }

    /// Preorder of the subtree rooted at `id` (including `id`)
    pub fn subtree_of(&self, id: LocalId) -> Result<Vec<LocalId>, StepError> {
        self.node(id)?;
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            let kids = self.children_of(Some(current));
            stack.extend(kids.into_iter().rev());
        }
        Ok(order)
    }

    /// Remove a node and its subtree, returning the removed nodes deepest first
    pub fn remove_subtree(&mut self, id: LocalId) -> Result<Vec<StepNode>, StepError> {
        let subtree = self.subtree_of(id)?;
        Ok(subtree
            .into_iter()
            .rev()
            .filter_map(|n| self.nodes.remove(&n))
            .collect())
    }

    /// Parents that point outside the forest are displayed as roots
    fn is_effective_root(&self, node: &StepNode) -> bool {
        match node.parent {
            None => true,
            Some(parent) => !self.nodes.contains_key(&parent),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::steps::node::StepFields;
    use crate::steps::step_type::StepType;

    /// Add a node under `parent` with the given sequence
    pub(crate) fn add(
        forest: &mut Forest,
        name: &str,
        parent: Option<LocalId>,
        sequence: i64,
    ) -> LocalId {
        let mut node = StepNode::new(
            forest.scope().clone(),
            StepFields::new(name, StepType::WorkInstruction),
        );
        node.parent = parent;
        node.sequence = sequence;
        forest.insert(node).unwrap()
    }

    pub(crate) fn names(forest: &Forest, ids: &[LocalId]) -> Vec<String> {
        ids.iter()
            .map(|id| forest.get(*id).unwrap().name().to_string())
            .collect()
    }

    fn sample() -> (Forest, LocalId, LocalId, LocalId, LocalId) {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "A", Some(root), 20);
        let b = add(&mut forest, "B", Some(root), 30);
        let a1 = add(&mut forest, "A1", Some(a), 25);
        (forest, root, a, b, a1)
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let (forest, root, a, _, a1) = sample();
        assert_eq!(forest.ancestors_of(a1).unwrap(), vec![a, root]);
        assert!(forest.ancestors_of(root).unwrap().is_empty());
        assert_eq!(forest.depth_of(a1).unwrap(), 2);
    }

    #[test]
    fn test_attach_under_self_is_rejected() {
        let (mut forest, _, a, _, _) = sample();
        let before = forest.get(a).unwrap().parent;
        let err = forest.attach(a, Some(a)).unwrap_err();
        assert!(matches!(err, StepError::CircularParent { .. }));
        assert_eq!(forest.get(a).unwrap().parent, before);
    }

    #[test]
    fn test_attach_under_descendant_is_rejected_and_forest_unchanged() {
        let (mut forest, root, _, _, a1) = sample();
        let snapshot: Vec<_> = forest.nodes().cloned().collect();
        let err = forest.attach(root, Some(a1)).unwrap_err();
        assert!(matches!(
            err,
            StepError::CircularParent { node, parent } if node == root && parent == a1
        ));
        let after: Vec<_> = forest.nodes().cloned().collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_attach_moves_subtree() {
        let (mut forest, root, a, b, a1) = sample();
        forest.attach(a, Some(b)).unwrap();
        assert_eq!(forest.ancestors_of(a1).unwrap(), vec![a, b, root]);
    }

    #[test]
    fn test_detach_makes_root_and_keeps_children() {
        let (mut forest, _, a, _, a1) = sample();
        forest.detach(a).unwrap();
        assert!(forest.get(a).unwrap().is_root());
        assert_eq!(forest.get(a1).unwrap().parent, Some(a));
        assert_eq!(forest.roots().len(), 2);
    }

    #[test]
    fn test_insert_rejects_foreign_scope() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let node = StepNode::new(
            ScopeKey::process("p", "7"),
            StepFields::new("X", StepType::Activity),
        );
        assert!(matches!(
            forest.insert(node),
            Err(StepError::CrossScope { .. })
        ));
    }

    #[test]
    fn test_preorder_follows_sequence() {
        let (forest, ..) = sample();
        let order = forest.preorder();
        assert_eq!(names(&forest, &order), vec!["Root", "A", "A1", "B"]);
    }

    #[test]
    fn test_remove_subtree_deepest_first() {
        let (mut forest, _, a, _, _) = sample();
        let removed = forest.remove_subtree(a).unwrap();
        let removed_names: Vec<_> = removed.iter().map(|n| n.name().to_string()).collect();
        assert_eq!(removed_names, vec!["A1", "A"]);
        assert_eq!(forest.len(), 2);
    }
}
