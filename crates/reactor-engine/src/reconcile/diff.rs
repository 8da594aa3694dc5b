use std::collections::{HashMap, HashSet};

use crate::error::StructuralError;
use crate::tree::{Key, Node, NodeId, NodeKind, SceneTree, TreeIndex};

use super::lis::longest_increasing_run;
use super::{Changeset, Op};

/// Diffs `current` against `previous` (or against nothing on the first frame).
///
/// Pure: reads both trees and returns an edit script. Any structural problem
/// in `current` aborts the diff and nothing is returned for the frame.
pub fn reconcile(
    previous: Option<&SceneTree>,
    current: &SceneTree,
) -> Result<Changeset, StructuralError> {
    let cur = TreeIndex::build(current)?;

    let prev = match previous {
        Some(p) => {
            if p.frame() >= current.frame() {
                return Err(StructuralError::NonMonotonicFrame {
                    previous: p.frame(),
                    current: current.frame(),
                });
            }
            Some(TreeIndex::build(p)?)
        }
        None => None,
    };

    let mut diff = Diff::default();
    match &prev {
        Some(prev) => diff.pair(prev, &cur, prev.root(), cur.root(), None, 0),
        None => diff.insert_subtree(&cur, cur.root(), None, 0),
    }

    let changeset = diff.finish(current.frame());
    log::debug!(
        "reconcile frame {}: {} ops ({} insert, {} update, {} move, {} remove)",
        changeset.frame(),
        changeset.len(),
        changeset.inserts(),
        changeset.updates(),
        changeset.moves(),
        changeset.removes(),
    );
    Ok(changeset)
}

#[derive(Default)]
struct Diff {
    inserts: Vec<Op>,
    updates: Vec<Op>,
    moves: Vec<Op>,
    removes: Vec<(NodeId, NodeKind)>,
}

impl Diff {
    fn pair(
        &mut self,
        prev: &TreeIndex<'_>,
        cur: &TreeIndex<'_>,
        old: &Node,
        new: &Node,
        parent: Option<NodeId>,
        index: usize,
    ) {
        if !same_identity(old, new) {
            self.remove_subtree(prev, old);
            self.insert_subtree(cur, new, parent, index);
            return;
        }

        let changed = old.props.diff(&new.props);
        if !changed.is_empty() {
            self.updates.push(Op::Update {
                id: new.id,
                kind: new.kind,
                changed,
            });
        }

        self.children(prev, cur, old, new);
    }

    fn children(&mut self, prev: &TreeIndex<'_>, cur: &TreeIndex<'_>, old: &Node, new: &Node) {
        let old_children: Vec<&Node> = prev.children(old.id).collect();
        let new_children: Vec<&Node> = cur.children(new.id).collect();

        if old_children.is_empty() {
            for (i, child) in new_children.iter().enumerate() {
                self.insert_subtree(cur, child, Some(new.id), i);
            }
            return;
        }

        let mut keyed: HashMap<&Key, usize> = HashMap::new();
        let mut unkeyed: Vec<usize> = Vec::new();
        for (i, child) in old_children.iter().enumerate() {
            match &child.key {
                Some(k) => {
                    keyed.insert(k, i);
                }
                None => unkeyed.push(i),
            }
        }

        let mut matched = vec![false; old_children.len()];
        let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(new_children.len());
        let mut next_unkeyed = unkeyed.iter();

        for (new_pos, child) in new_children.iter().enumerate() {
            let old_pos = match &child.key {
                Some(k) => keyed.get(k).copied(),
                None => next_unkeyed.next().copied(),
            };
            match old_pos {
                Some(old_pos) => {
                    matched[old_pos] = true;
                    pairs.push((old_pos, new_pos));
                }
                None => self.insert_subtree(cur, child, Some(new.id), new_pos),
            }
        }

        for (old_pos, child) in old_children.iter().enumerate() {
            if !matched[old_pos] {
                self.remove_subtree(prev, child);
            }
        }

        // Retained children already in relative order stay put; the rest move.
        let retained: Vec<(usize, usize)> = pairs
            .iter()
            .copied()
            .filter(|&(o, n)| same_identity(old_children[o], new_children[n]))
            .collect();
        let old_positions: Vec<usize> = retained.iter().map(|&(o, _)| o).collect();
        let stable = longest_increasing_run(&old_positions);
        for (&(_, n), keep) in retained.iter().zip(stable) {
            if !keep {
                self.moves.push(Op::Move {
                    id: new_children[n].id,
                    parent: new.id,
                    index: n,
                });
            }
        }

        for (o, n) in pairs {
            self.pair(prev, cur, old_children[o], new_children[n], Some(new.id), n);
        }
    }

    fn insert_subtree(
        &mut self,
        cur: &TreeIndex<'_>,
        node: &Node,
        parent: Option<NodeId>,
        index: usize,
    ) {
        self.inserts.push(Op::Insert {
            id: node.id,
            kind: node.kind,
            props: node.props.clone(),
            parent,
            index,
        });
        for (i, child) in cur.children(node.id).enumerate() {
            self.insert_subtree(cur, child, Some(node.id), i);
        }
    }

    fn remove_subtree(&mut self, prev: &TreeIndex<'_>, node: &Node) {
        self.removes.push((node.id, node.kind));
        for child in prev.children(node.id) {
            self.remove_subtree(prev, child);
        }
    }

    fn finish(self, frame: u64) -> Changeset {
        let removed: HashMap<NodeId, NodeKind> = self.removes.iter().copied().collect();
        let mut paired: HashSet<NodeId> = HashSet::new();

        let mut ops =
            Vec::with_capacity(self.inserts.len() + self.updates.len() + self.moves.len() + self.removes.len());

        for op in self.inserts {
            let id = op.id();
            if let Some(&kind) = removed.get(&id) {
                ops.push(Op::Remove { id, kind });
                paired.insert(id);
            }
            ops.push(op);
        }
        ops.extend(self.updates);
        ops.extend(self.moves);
        ops.extend(
            self.removes
                .into_iter()
                .filter(|(id, _)| !paired.contains(id))
                .map(|(id, kind)| Op::Remove { id, kind }),
        );

        Changeset::new(frame, ops)
    }
}

#[inline]
fn same_identity(old: &Node, new: &Node) -> bool {
    old.id == new.id && old.kind == new.kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Color, PropKey, PropValue, TreeBuilder, Vec2};

    fn list(frame: u64, items: &[(u64, u64)]) -> SceneTree {
        // (id, key) pairs under a group root.
        let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Group));
        for &(id, key) in items {
            b.child(NodeId(0), Node::new(id, NodeKind::Rect).key(key));
        }
        b.finish()
    }

    fn moves(cs: &Changeset) -> Vec<(NodeId, usize)> {
        cs.iter()
            .filter_map(|op| match op {
                Op::Move { id, index, .. } => Some((*id, *index)),
                _ => None,
            })
            .collect()
    }

    // ── first frame ───────────────────────────────────────────────────────

    #[test]
    fn first_frame_inserts_everything_parents_first() {
        let tree = list(1, &[(1, 1), (2, 2)]);
        let cs = reconcile(None, &tree).unwrap();

        let ids: Vec<NodeId> = cs.iter().map(Op::id).collect();
        assert_eq!(ids, vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert!(cs.iter().all(|op| matches!(op, Op::Insert { .. })));
        assert!(matches!(cs.ops()[0], Op::Insert { parent: None, .. }));
    }

    // ── idempotence ───────────────────────────────────────────────────────

    #[test]
    fn identical_trees_produce_empty_changeset() {
        let build = |frame| {
            let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Camera).prop(PropKey::Zoom, 2.0));
            let g = b.child(NodeId(0), Node::new(1, NodeKind::Group).prop(PropKey::Opacity, f32::NAN));
            b.child(g, Node::new(2, NodeKind::Rect).key("a").prop(PropKey::Color, Color::RED));
            b.child(g, Node::new(3, NodeKind::Mesh).prop(PropKey::Points, vec![Vec2::new(0.0, 1.0)]));
            b.finish()
        };

        assert!(reconcile(Some(&build(1)), &build(2)).unwrap().is_empty());
    }

    // ── updates ───────────────────────────────────────────────────────────

    #[test]
    fn changed_property_produces_update_with_only_that_field() {
        let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
        b.child(
            NodeId(0),
            Node::new(1, NodeKind::Rect)
                .key(1)
                .prop(PropKey::Color, Color::RED)
                .prop(PropKey::Size, Vec2::new(10.0, 10.0)),
        );
        let t1 = b.finish();

        let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
        b.child(
            NodeId(0),
            Node::new(1, NodeKind::Rect)
                .key(1)
                .prop(PropKey::Color, Color::BLUE)
                .prop(PropKey::Size, Vec2::new(10.0, 10.0)),
        );
        let t2 = b.finish();

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(cs.len(), 1);
        let Op::Update { id, changed, .. } = &cs.ops()[0] else {
            panic!("expected update, got {:?}", cs.ops()[0]);
        };
        assert_eq!(*id, NodeId(1));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get(PropKey::Color), Some(&PropValue::Color(Color::BLUE)));
    }

    #[test]
    fn kind_change_is_remove_then_insert() {
        let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect));
        let t1 = b.finish();

        let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
        b.child(NodeId(0), Node::new(1, NodeKind::Mesh));
        let t2 = b.finish();

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(
            cs.ops(),
            &[
                Op::Remove { id: NodeId(1), kind: NodeKind::Rect },
                Op::Insert {
                    id: NodeId(1),
                    kind: NodeKind::Mesh,
                    props: Default::default(),
                    parent: Some(NodeId(0)),
                    index: 0,
                },
            ]
        );
    }

    // ── keyed lists ───────────────────────────────────────────────────────

    #[test]
    fn swap_of_two_produces_one_move() {
        let t1 = list(1, &[(10, 1), (11, 2), (12, 3)]);
        let t2 = list(2, &[(11, 2), (10, 1), (12, 3)]);

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(cs.len(), 1);
        assert_eq!(moves(&cs).len(), 1);
    }

    #[test]
    fn single_relocation_in_long_list_is_one_move() {
        let n = 64u64;
        let before: Vec<(u64, u64)> = (0..n).map(|i| (100 + i, i)).collect();
        let mut after = before.clone();
        let moved = after.remove(5);
        after.insert(50, moved);

        let cs = reconcile(Some(&list(1, &before)), &list(2, &after)).unwrap();
        assert_eq!(moves(&cs), vec![(NodeId(105), 50)]);
        assert_eq!(cs.len(), 1);
    }

    #[test]
    fn insert_and_remove_do_not_cause_moves() {
        let t1 = list(1, &[(10, 1), (11, 2), (12, 3)]);
        let t2 = list(2, &[(13, 4), (10, 1), (12, 3)]);

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(cs.moves(), 0);
        assert_eq!(cs.inserts(), 1);
        assert_eq!(cs.removes(), 1);
        assert!(matches!(cs.ops().last(), Some(Op::Remove { id: NodeId(11), .. })));
    }

    #[test]
    fn unkeyed_children_match_by_position() {
        let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect).prop(PropKey::Color, Color::RED));
        b.child(NodeId(0), Node::new(2, NodeKind::Rect));
        let t1 = b.finish();

        let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect).prop(PropKey::Color, Color::GREEN));
        let t2 = b.finish();

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(cs.updates(), 1);
        assert_eq!(cs.removes(), 1);
        assert!(matches!(cs.ops()[1], Op::Remove { id: NodeId(2), .. }));
    }

    #[test]
    fn reparented_node_is_removed_before_reinsert() {
        let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
        let a = b.child(NodeId(0), Node::new(1, NodeKind::Group).key(1));
        b.child(NodeId(0), Node::new(2, NodeKind::Group).key(2));
        b.child(a, Node::new(3, NodeKind::Rect));
        let t1 = b.finish();

        let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
        b.child(NodeId(0), Node::new(1, NodeKind::Group).key(1));
        let c = b.child(NodeId(0), Node::new(2, NodeKind::Group).key(2));
        b.child(c, Node::new(3, NodeKind::Rect));
        let t2 = b.finish();

        let cs = reconcile(Some(&t1), &t2).unwrap();
        let remove_at = cs.iter().position(|op| matches!(op, Op::Remove { id: NodeId(3), .. })).unwrap();
        let insert_at = cs.iter().position(|op| matches!(op, Op::Insert { id: NodeId(3), .. })).unwrap();
        assert_eq!(remove_at + 1, insert_at);
        assert_eq!(cs.removes(), 1);
    }

    #[test]
    fn removed_subtree_removes_descendants() {
        let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
        let g = b.child(NodeId(0), Node::new(1, NodeKind::Group).key(1));
        b.child(g, Node::new(2, NodeKind::Rect));
        b.child(g, Node::new(3, NodeKind::Rect));
        let t1 = b.finish();
        let t2 = TreeBuilder::new(2, Node::new(0, NodeKind::Group)).finish();

        let cs = reconcile(Some(&t1), &t2).unwrap();
        assert_eq!(cs.removes(), 3);
        assert_eq!(cs.len(), 3);
    }

    // ── errors ────────────────────────────────────────────────────────────

    #[test]
    fn duplicate_keys_abort_reconciliation() {
        let t1 = list(1, &[(10, 1)]);
        let t2 = list(2, &[(10, 1), (11, 1)]);
        let err = reconcile(Some(&t1), &t2).unwrap_err();
        assert!(matches!(err, StructuralError::DuplicateKey { .. }));
    }

    #[test]
    fn frame_counter_must_increase() {
        let t1 = list(3, &[(10, 1)]);
        let t2 = list(3, &[(10, 1)]);
        let err = reconcile(Some(&t1), &t2).unwrap_err();
        assert_eq!(err, StructuralError::NonMonotonicFrame { previous: 3, current: 3 });
    }
}
