//! Preorder resequencing.
//!
//! Every node gets `sequence = preorder_position * SEQUENCE_STRIDE`, so
//! sequences are unique, strictly increasing within each sibling group, and
//! a flat listing sorted by sequence still reads as the hierarchy.

use super::forest::Forest;
use super::node::LocalId;

/// Gap between consecutive sequence values
pub const SEQUENCE_STRIDE: i64 = 10;

/// Reassign sequences in preorder. Returns the number of nodes whose
/// sequence changed; a second pass always returns 0.
pub fn resequence(forest: &mut Forest) -> usize {
    let order = forest.preorder();
    let mut changed = 0;
    for (position, id) in order.into_iter().enumerate() {
        let sequence = (position as i64 + 1) * SEQUENCE_STRIDE;
        if let Some(node) = forest.get_mut(id) {
            if node.sequence != sequence {
                node.sequence = sequence;
                changed += 1;
            }
        }
    }
    changed
}

/// Renumber one sibling group 10, 20, 30, ... keeping its current order
pub fn renumber_siblings(forest: &mut Forest, parent: Option<LocalId>) {
    let siblings = forest.children_of(parent);
    for (position, id) in siblings.into_iter().enumerate() {
        if let Some(node) = forest.get_mut(id) {
            node.sequence = (position as i64 + 1) * SEQUENCE_STRIDE;
        }
    }
}

/// Local sequence to remote `Index`
pub fn sequence_to_index(sequence: i64) -> i64 {
    if sequence > 0 {
        sequence / SEQUENCE_STRIDE
    } else {
        0
    }
}

/// Remote `Index` to local sequence
pub fn index_to_sequence(index: i64) -> i64 {
    index.max(0) * SEQUENCE_STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::forest::tests::{add, names};
    use crate::steps::node::ScopeKey;

    fn sequences(forest: &Forest) -> Vec<(LocalId, i64)> {
        forest.nodes().map(|n| (n.local_id, n.sequence)).collect()
    }

    fn messy() -> Forest {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let r1 = add(&mut forest, "R1", None, 7);
        let r2 = add(&mut forest, "R2", None, 3);
        add(&mut forest, "R1-a", Some(r1), 100);
        add(&mut forest, "R1-b", Some(r1), 100);
        add(&mut forest, "R2-a", Some(r2), 1);
        forest
    }

    #[test]
    fn test_resequence_assigns_preorder_stride() {
        let mut forest = messy();
        resequence(&mut forest);
        let order = forest.preorder();
        assert_eq!(
            names(&forest, &order),
            vec!["R2", "R2-a", "R1", "R1-a", "R1-b"]
        );
        let seqs: Vec<i64> = order
            .iter()
            .map(|id| forest.get(*id).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_resequence_is_idempotent() {
        let mut forest = messy();
        resequence(&mut forest);
        let once = sequences(&forest);
        assert_eq!(resequence(&mut forest), 0);
        assert_eq!(sequences(&forest), once);
    }

    #[test]
    fn test_sibling_order_preserved() {
        let mut forest = messy();
        let groups: Vec<Vec<LocalId>> = forest
            .nodes()
            .map(|n| Some(n.local_id))
            .chain(std::iter::once(None))
            .map(|parent| forest.children_of(parent))
            .collect();
        resequence(&mut forest);
        for group in groups {
            for pair in group.windows(2) {
                let a = forest.get(pair[0]).unwrap().sequence;
                let b = forest.get(pair[1]).unwrap().sequence;
                assert!(a < b, "sibling order broken: {a} >= {b}");
            }
        }
    }

    #[test]
    fn test_renumber_siblings() {
        let mut forest = Forest::new(ScopeKey::job("p"));
        let a = add(&mut forest, "A", None, 5);
        let b = add(&mut forest, "B", None, 5);
        renumber_siblings(&mut forest, None);
        assert_eq!(forest.get(a).unwrap().sequence, 10);
        assert_eq!(forest.get(b).unwrap().sequence, 20);
    }

    #[test]
    fn test_index_translation() {
        assert_eq!(sequence_to_index(30), 3);
        assert_eq!(sequence_to_index(35), 3);
        assert_eq!(sequence_to_index(0), 0);
        assert_eq!(sequence_to_index(-10), 0);
        assert_eq!(index_to_sequence(4), 40);
        assert_eq!(sequence_to_index(index_to_sequence(12)), 12);
    }
}
