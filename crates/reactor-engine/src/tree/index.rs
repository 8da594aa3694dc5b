use std::collections::{HashMap, HashSet};

use crate::error::StructuralError;

use super::{Node, NodeId, NodeKind, PropKey, SceneTree};

#[derive(Copy, Clone, Eq, PartialEq)]
enum Visit {
    Open,
    Closed,
}

/// Validated lookup structure over a [`SceneTree`].
///
/// Building the index is where structural errors are detected:
/// - duplicate node ids (anywhere in the authored set)
/// - children that are missing, attached twice, or their own ancestor
/// - duplicate keys within one sibling list
/// - properties the node kind does not accept, or of the wrong value type
/// - `texture` references that do not name a reachable `Texture` node
#[derive(Debug)]
pub struct TreeIndex<'t> {
    tree: &'t SceneTree,
    slots: HashMap<NodeId, usize>,
    parents: HashMap<NodeId, NodeId>,
    preorder: Vec<NodeId>,
}

impl<'t> TreeIndex<'t> {
    pub fn build(tree: &'t SceneTree) -> Result<Self, StructuralError> {
        let mut slots = HashMap::with_capacity(tree.len());
        for (i, node) in tree.nodes().iter().enumerate() {
            if slots.insert(node.id, i).is_some() {
                return Err(StructuralError::DuplicateId { id: node.id });
            }
        }

        let root = tree.root();
        let mut visits: HashMap<NodeId, Visit> = HashMap::with_capacity(slots.len());
        let mut parents = HashMap::with_capacity(slots.len());
        let mut preorder = Vec::with_capacity(slots.len());

        // Iterative DFS; (node, next child position).
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        let root_node = &tree.nodes()[slots[&root]];
        validate_node(tree, &slots, root_node)?;
        visits.insert(root, Visit::Open);
        preorder.push(root);
        stack.push((root, 0));

        while let Some(&(id, next)) = stack.last() {
            let node = &tree.nodes()[slots[&id]];
            let Some(&child) = node.children.get(next) else {
                visits.insert(id, Visit::Closed);
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            match visits.get(&child) {
                Some(Visit::Open) => return Err(StructuralError::Cycle { id: child }),
                Some(Visit::Closed) => return Err(StructuralError::DuplicateId { id: child }),
                None => {}
            }
            let Some(&slot) = slots.get(&child) else {
                return Err(StructuralError::MissingChild { parent: id, child });
            };

            validate_node(tree, &slots, &tree.nodes()[slot])?;
            visits.insert(child, Visit::Open);
            parents.insert(child, id);
            preorder.push(child);
            stack.push((child, 0));
        }

        let index = Self {
            tree,
            slots,
            parents,
            preorder,
        };
        index.validate_references()?;
        Ok(index)
    }

    #[inline]
    pub fn tree(&self) -> &'t SceneTree {
        self.tree
    }

    #[inline]
    pub fn root(&self) -> &'t Node {
        &self.tree.nodes()[self.slots[&self.tree.root()]]
    }

    /// Looks up a node reachable from the root.
    pub fn get(&self, id: NodeId) -> Option<&'t Node> {
        if !self.contains(id) {
            return None;
        }
        self.slots.get(&id).map(|&slot| &self.tree.nodes()[slot])
    }

    /// Returns `true` if `id` is reachable from the root.
    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        id == self.tree.root() || self.parents.contains_key(&id)
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(&id).copied()
    }

    /// Reachable node ids, parents before children, siblings in order.
    #[inline]
    pub fn preorder(&self) -> &[NodeId] {
        &self.preorder
    }

    /// Number of reachable nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.preorder.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.preorder.is_empty()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &'t Node> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter_map(move |c| self.get(*c))
    }

    fn validate_references(&self) -> Result<(), StructuralError> {
        for &id in &self.preorder {
            let node = &self.tree.nodes()[self.slots[&id]];
            let Some(target) = node.props.node(PropKey::Texture) else {
                continue;
            };
            match self.get(target) {
                Some(t) if t.kind == NodeKind::Texture => {}
                _ => {
                    return Err(StructuralError::BadReference {
                        id,
                        prop: PropKey::Texture,
                        target,
                    });
                }
            }
        }
        Ok(())
    }
}

fn validate_node(
    tree: &SceneTree,
    slots: &HashMap<NodeId, usize>,
    node: &Node,
) -> Result<(), StructuralError> {
    for (key, value) in node.props.iter() {
        if !node.kind.accepts(key) {
            return Err(StructuralError::IncompatibleProperty {
                id: node.id,
                kind: node.kind,
                prop: key,
            });
        }
        if !key.accepts(value) {
            return Err(StructuralError::InvalidPropertyValue {
                id: node.id,
                prop: key,
                found: value.type_name(),
            });
        }
    }

    let mut keys = HashSet::new();
    for child in &node.children {
        let Some(&slot) = slots.get(child) else { continue };
        if let Some(key) = &tree.nodes()[slot].key {
            if !keys.insert(key) {
                return Err(StructuralError::DuplicateKey {
                    parent: node.id,
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Color, Key, Node, TreeBuilder};

    fn group(id: u64) -> Node {
        Node::new(id, NodeKind::Group)
    }

    #[test]
    fn preorder_lists_parents_before_children() {
        let mut b = TreeBuilder::new(1, group(0));
        let a = b.child(NodeId(0), group(1));
        b.child(a, Node::new(2, NodeKind::Rect));
        b.child(NodeId(0), Node::new(3, NodeKind::Rect));
        let tree = b.finish();

        let index = TreeIndex::build(&tree).unwrap();
        assert_eq!(index.preorder(), &[NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(index.parent(NodeId(2)), Some(NodeId(1)));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut b = TreeBuilder::new(1, group(0));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect));
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(err, StructuralError::DuplicateId { id: NodeId(1) });
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut b = TreeBuilder::new(1, group(0));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect).key(7));
        b.child(NodeId(0), Node::new(2, NodeKind::Rect).key(7));
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(err, StructuralError::DuplicateKey { parent: NodeId(0), key: Key::Int(7) });
        assert_eq!(err.node(), Some(NodeId(0)));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut b = TreeBuilder::new(1, group(0));
        let a = b.child(NodeId(0), group(1));
        b.link(a, NodeId(0));
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(err, StructuralError::Cycle { id: NodeId(0) });
    }

    #[test]
    fn child_attached_twice_is_a_duplicate() {
        let mut b = TreeBuilder::new(1, group(0));
        let a = b.child(NodeId(0), group(1));
        let r = b.child(a, Node::new(2, NodeKind::Rect));
        b.link(NodeId(0), r);
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(err, StructuralError::DuplicateId { id: NodeId(2) });
    }

    #[test]
    fn missing_child_is_rejected() {
        let mut b = TreeBuilder::new(1, group(0));
        b.link(NodeId(0), NodeId(42));
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(err, StructuralError::MissingChild { parent: NodeId(0), child: NodeId(42) });
    }

    #[test]
    fn property_not_accepted_by_kind_is_rejected() {
        let tree = TreeBuilder::new(1, group(0).prop(PropKey::Color, Color::RED)).finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert!(matches!(err, StructuralError::IncompatibleProperty { prop: PropKey::Color, .. }));
    }

    #[test]
    fn property_of_wrong_type_is_rejected() {
        let tree = TreeBuilder::new(1, group(0).prop(PropKey::Scale, Color::RED)).finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(
            err,
            StructuralError::InvalidPropertyValue { id: NodeId(0), prop: PropKey::Scale, found: "color" }
        );
    }

    #[test]
    fn sprite_must_reference_a_texture() {
        let mut b = TreeBuilder::new(1, group(0));
        b.child(NodeId(0), Node::new(1, NodeKind::Rect));
        b.child(NodeId(0), Node::new(2, NodeKind::Sprite).prop(PropKey::Texture, NodeId(1)));
        let tree = b.finish();

        let err = TreeIndex::build(&tree).unwrap_err();
        assert_eq!(
            err,
            StructuralError::BadReference { id: NodeId(2), prop: PropKey::Texture, target: NodeId(1) }
        );
    }

    #[test]
    fn sprite_referencing_texture_is_accepted() {
        let mut b = TreeBuilder::new(1, group(0));
        b.child(NodeId(0), Node::new(1, NodeKind::Texture));
        b.child(NodeId(0), Node::new(2, NodeKind::Sprite).prop(PropKey::Texture, NodeId(1)));
        let tree = b.finish();

        assert!(TreeIndex::build(&tree).is_ok());
    }
}
