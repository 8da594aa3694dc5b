use std::collections::HashMap;

use super::{Node, NodeId};

/// An authored frame: a root node plus every node reachable from it.
///
/// Trees are built whole with [`TreeBuilder`] and never mutated after they
/// are handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneTree {
    frame: u64,
    root: NodeId,
    nodes: Vec<Node>,
}

impl SceneTree {
    /// Monotonic frame counter supplied by the author.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// All authored nodes in insertion order, including unreachable ones.
    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Authoring API for one frame's tree.
///
/// ```
/// use reactor_engine::tree::{Color, Node, NodeKind, PropKey, TreeBuilder};
///
/// let mut b = TreeBuilder::new(1, Node::new(0, NodeKind::Group));
/// let root = b.root();
/// b.child(root, Node::new(1, NodeKind::Rect).key(1).prop(PropKey::Color, Color::RED));
/// let tree = b.finish();
/// assert_eq!(tree.len(), 2);
/// ```
///
/// The builder does not validate; duplicate ids, duplicate keys and cycles are
/// reported by the reconciler as structural errors for the frame.
#[derive(Debug)]
pub struct TreeBuilder {
    frame: u64,
    root: NodeId,
    nodes: Vec<Node>,
    // First occurrence of each id; `child` attaches to that node.
    slots: HashMap<NodeId, usize>,
}

impl TreeBuilder {
    pub fn new(frame: u64, root: Node) -> Self {
        let root_id = root.id;
        let mut slots = HashMap::new();
        slots.insert(root_id, 0);
        Self {
            frame,
            root: root_id,
            nodes: vec![root],
            slots,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Adds `node` and appends it to `parent`'s children.
    ///
    /// Children already set on `node` are kept and must be added separately.
    /// An unknown `parent` leaves the node detached.
    pub fn child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        self.slots.entry(id).or_insert(self.nodes.len() - 1);
        self.link(parent, id);
        id
    }

    /// Appends an existing id to `parent`'s children.
    pub fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(&slot) = self.slots.get(&parent) {
            self.nodes[slot].children.push(child);
        } else {
            log::debug!("TreeBuilder: link to unknown parent {parent} ignored");
        }
    }

    pub fn finish(self) -> SceneTree {
        SceneTree {
            frame: self.frame,
            root: self.root,
            nodes: self.nodes,
        }
    }
}
