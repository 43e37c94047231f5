//! Structural edits on a single node: move up/down, indent, outdent.
//!
//! Each edit is a forest transformation followed by a full resequencing
//! pass. Edits that cannot move the node (first sibling moving up, a root
//! outdenting, ...) report `AtBoundary` and leave the forest untouched.

use std::fmt;
use std::str::FromStr;

use super::forest::Forest;
use super::node::LocalId;
use super::resequence::{renumber_siblings, resequence, SEQUENCE_STRIDE};
use crate::error::StepError;

/// Offset placing an outdented node right after its former parent
const OUTDENT_OFFSET: i64 = SEQUENCE_STRIDE / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOp {
    MoveUp,
    MoveDown,
    Indent,
    Outdent,
}

impl EditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOp::MoveUp => "move-up",
            EditOp::MoveDown => "move-down",
            EditOp::Indent => "indent",
            EditOp::Outdent => "outdent",
        }
    }
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "move-up" | "up" => Ok(EditOp::MoveUp),
            "move-down" | "down" => Ok(EditOp::MoveDown),
            "indent" => Ok(EditOp::Indent),
            "outdent" => Ok(EditOp::Outdent),
            other => Err(format!(
                "unknown edit '{other}' (expected move-up, move-down, indent or outdent)"
            )),
        }
    }
}

/// Result of an edit that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The forest changed and was resequenced
    Applied,
    /// The node is already first/last/root-level; nothing changed
    AtBoundary,
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied)
    }
}

/// Apply one edit to `node`
pub fn apply_edit(forest: &mut Forest, node: LocalId, op: EditOp) -> Result<EditOutcome, StepError> {
    forest.node(node)?;
    let outcome = match op {
        EditOp::MoveUp => swap_with_neighbor(forest, node, Direction::Up)?,
        EditOp::MoveDown => swap_with_neighbor(forest, node, Direction::Down)?,
        EditOp::Indent => indent(forest, node)?,
        EditOp::Outdent => outdent(forest, node)?,
    };
    if outcome.is_applied() {
        resequence(forest);
    }
    Ok(outcome)
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

fn swap_with_neighbor(
    forest: &mut Forest,
    node: LocalId,
    direction: Direction,
) -> Result<EditOutcome, StepError> {
    let parent = forest.node(node)?.parent;
    let siblings = forest.children_of(parent);
    let Some(position) = siblings.iter().position(|id| *id == node) else {
        return Err(StepError::UnknownNode(node));
    };

    let neighbor = match direction {
        Direction::Up if position == 0 => return Ok(EditOutcome::AtBoundary),
        Direction::Up => siblings[position - 1],
        Direction::Down if position + 1 >= siblings.len() => return Ok(EditOutcome::AtBoundary),
        Direction::Down => siblings[position + 1],
    };

    // Duplicate sequences would turn the swap into a no-op
    renumber_siblings(forest, parent);

    let own_seq = forest.node(node)?.sequence;
    let neighbor_seq = forest.node(neighbor)?.sequence;
    forest.node_mut(node)?.sequence = neighbor_seq;
    forest.node_mut(neighbor)?.sequence = own_seq;
    Ok(EditOutcome::Applied)
}

/// Reparent under the sibling that precedes the node.
///
/// The step immediately preceding the node in scope preorder is either its
/// parent (the node is a first child, nothing to indent under) or lies in
/// the subtree of its previous sibling; climbing from there to the node's
/// own level yields the new parent.
fn indent(forest: &mut Forest, node: LocalId) -> Result<EditOutcome, StepError> {
    let parent = forest.node(node)?.parent;
    let order = forest.preorder();
    let Some(position) = order.iter().position(|id| *id == node) else {
        return Err(StepError::UnknownNode(node));
    };
    if position == 0 {
        return Ok(EditOutcome::AtBoundary);
    }

    let preceding = order[position - 1];
    if Some(preceding) == parent {
        return Ok(EditOutcome::AtBoundary);
    }

    let mut new_parent = preceding;
    loop {
        let candidate = forest.node(new_parent)?;
        if candidate.parent == parent {
            break;
        }
        match candidate.parent {
            Some(up) => new_parent = up,
            None => return Ok(EditOutcome::AtBoundary),
        }
    }

    let last_child_seq = forest
        .children_of(Some(new_parent))
        .last()
        .map(|id| forest.node(*id).map(|n| n.sequence))
        .transpose()?;
    let sequence = last_child_seq.unwrap_or(forest.node(new_parent)?.sequence) + SEQUENCE_STRIDE;

    forest.attach(node, Some(new_parent))?;
    forest.node_mut(node)?.sequence = sequence;
    Ok(EditOutcome::Applied)
}

/// Reparent to the grandparent, right after the former parent
fn outdent(forest: &mut Forest, node: LocalId) -> Result<EditOutcome, StepError> {
    let Some(parent) = forest.node(node)?.parent else {
        return Ok(EditOutcome::AtBoundary);
    };
    let parent_node = forest.node(parent)?;
    let grandparent = parent_node.parent;
    let sequence = parent_node.sequence + OUTDENT_OFFSET;

    forest.attach(node, grandparent)?;
    forest.node_mut(node)?.sequence = sequence;
    Ok(EditOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::forest::tests::{add, names};
    use crate::steps::hierarchy::HierarchyLabeler;
    use crate::steps::node::ScopeKey;

    struct Tree {
        forest: Forest,
        root: LocalId,
        a: LocalId,
        b: LocalId,
    }

    /// Root(10) [ChildA(20), ChildB(30)]
    fn tree() -> Tree {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "ChildA", Some(root), 20);
        let b = add(&mut forest, "ChildB", Some(root), 30);
        Tree { forest, root, a, b }
    }

    fn sibling_names(forest: &Forest, parent: Option<LocalId>) -> Vec<String> {
        names(forest, &forest.children_of(parent))
    }

    #[test]
    fn test_move_up_swaps_with_previous() {
        let mut t = tree();
        let outcome = apply_edit(&mut t.forest, t.b, EditOp::MoveUp).unwrap();
        assert_eq!(outcome, EditOutcome::Applied);
        assert_eq!(
            sibling_names(&t.forest, Some(t.root)),
            vec!["ChildB", "ChildA"]
        );
    }

    #[test]
    fn test_move_at_boundaries_is_noop() {
        let mut t = tree();
        let before: Vec<_> = t.forest.nodes().cloned().collect();
        assert_eq!(
            apply_edit(&mut t.forest, t.a, EditOp::MoveUp).unwrap(),
            EditOutcome::AtBoundary
        );
        assert_eq!(
            apply_edit(&mut t.forest, t.b, EditOp::MoveDown).unwrap(),
            EditOutcome::AtBoundary
        );
        assert_eq!(
            apply_edit(&mut t.forest, t.root, EditOp::MoveUp).unwrap(),
            EditOutcome::AtBoundary
        );
        let after: Vec<_> = t.forest.nodes().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_move_with_duplicate_sequences_still_moves() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let a = add(&mut forest, "A", None, 10);
        add(&mut forest, "B", None, 10);
        let c = add(&mut forest, "C", None, 10);
        apply_edit(&mut forest, c, EditOp::MoveUp).unwrap();
        assert_eq!(sibling_names(&forest, None), vec!["A", "C", "B"]);
        apply_edit(&mut forest, a, EditOp::MoveDown).unwrap();
        assert_eq!(sibling_names(&forest, None), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_move_up_then_down_restores_order() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let ids: Vec<_> = ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(i, name)| add(&mut forest, name, None, (i as i64 + 1) * 10))
            .collect();
        let original = sibling_names(&forest, None);
        apply_edit(&mut forest, ids[2], EditOp::MoveUp).unwrap();
        assert_ne!(sibling_names(&forest, None), original);
        apply_edit(&mut forest, ids[2], EditOp::MoveDown).unwrap();
        assert_eq!(sibling_names(&forest, None), original);
    }

    #[test]
    fn test_indent_under_previous_sibling_without_children() {
        let mut t = tree();
        apply_edit(&mut t.forest, t.b, EditOp::Indent).unwrap();
        assert_eq!(t.forest.get(t.b).unwrap().parent, Some(t.a));

        let labels = HierarchyLabeler::label(&t.forest);
        assert_eq!(labels.label(t.root), "1");
        assert_eq!(labels.label(t.a), "1.1");
        assert_eq!(labels.label(t.b), "1.1.1");
    }

    #[test]
    fn test_indent_places_after_existing_children() {
        let mut t = tree();
        let a1 = add(&mut t.forest, "A1", Some(t.a), 25);
        apply_edit(&mut t.forest, t.b, EditOp::Indent).unwrap();

        assert_eq!(t.forest.get(t.b).unwrap().parent, Some(t.a));
        let labels = HierarchyLabeler::label(&t.forest);
        assert_eq!(labels.label(a1), "1.1.1");
        assert_eq!(labels.label(t.b), "1.1.2");
    }

    #[test]
    fn test_indent_sequence_before_resequence() {
        let mut t = tree();
        add(&mut t.forest, "A1", Some(t.a), 25);
        // Only the transformation, without the resequencing pass
        indent(&mut t.forest, t.b).unwrap();
        assert_eq!(t.forest.get(t.b).unwrap().sequence, 35);
    }

    #[test]
    fn test_indent_first_child_is_boundary() {
        let mut t = tree();
        assert_eq!(
            apply_edit(&mut t.forest, t.a, EditOp::Indent).unwrap(),
            EditOutcome::AtBoundary
        );
        assert_eq!(
            apply_edit(&mut t.forest, t.root, EditOp::Indent).unwrap(),
            EditOutcome::AtBoundary
        );
    }

    #[test]
    fn test_indent_root_under_previous_root() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let first = add(&mut forest, "First", None, 10);
        add(&mut forest, "First-child", Some(first), 20);
        let second = add(&mut forest, "Second", None, 30);
        apply_edit(&mut forest, second, EditOp::Indent).unwrap();
        assert_eq!(forest.get(second).unwrap().parent, Some(first));
        assert_eq!(HierarchyLabeler::label(&forest).label(second), "1.2");
    }

    #[test]
    fn test_outdent_moves_right_after_former_parent() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let root = add(&mut forest, "Root", None, 10);
        let a = add(&mut forest, "A", Some(root), 20);
        let a1 = add(&mut forest, "A1", Some(a), 30);
        let b = add(&mut forest, "B", Some(root), 40);

        outdent(&mut forest, a1).unwrap();
        assert_eq!(forest.get(a1).unwrap().sequence, 25);

        resequence(&mut forest);
        let labels = HierarchyLabeler::label(&forest);
        assert_eq!(forest.get(a1).unwrap().parent, Some(root));
        assert_eq!(labels.label(a), "1.1");
        assert_eq!(labels.label(a1), "1.2");
        assert_eq!(labels.label(b), "1.3");
    }

    #[test]
    fn test_outdent_child_of_root_becomes_root() {
        let mut t = tree();
        apply_edit(&mut t.forest, t.a, EditOp::Outdent).unwrap();
        assert!(t.forest.get(t.a).unwrap().is_root());
        assert_eq!(sibling_names(&t.forest, None), vec!["Root", "ChildA"]);
        assert_eq!(
            apply_edit(&mut t.forest, t.root, EditOp::Outdent).unwrap(),
            EditOutcome::AtBoundary
        );
    }

    #[test]
    fn test_edit_unknown_node() {
        let mut t = tree();
        let err = apply_edit(&mut t.forest, LocalId::from_raw(u64::MAX), EditOp::Indent).unwrap_err();
        assert!(matches!(err, StepError::UnknownNode(_)));
    }

    #[test]
    fn test_edit_op_parsing() {
        assert_eq!("move-up".parse::<EditOp>().unwrap(), EditOp::MoveUp);
        assert_eq!("MOVE_DOWN".parse::<EditOp>().unwrap(), EditOp::MoveDown);
        assert_eq!("indent".parse::<EditOp>().unwrap(), EditOp::Indent);
        assert_eq!("outdent".parse::<EditOp>().unwrap(), EditOp::Outdent);
        assert!("sideways".parse::<EditOp>().is_err());
    }
}
