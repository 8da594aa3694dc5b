use crate::tree::{NodeId, NodeKind, PropPatch, Props};

/// One edit of the changeset.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// A node that has no counterpart in the previous tree.
    Insert {
        id: NodeId,
        kind: NodeKind,
        props: Props,
        /// `None` for the root.
        parent: Option<NodeId>,
        index: usize,
    },
    /// Changed properties of a retained node.
    Update {
        id: NodeId,
        kind: NodeKind,
        changed: PropPatch,
    },
    Remove {
        id: NodeId,
        kind: NodeKind,
    },
    /// A retained node that left the longest stable run of its sibling list.
    ///
    /// `index` is its position in the parent's new child list.
    Move {
        id: NodeId,
        parent: NodeId,
        index: usize,
    },
}

impl Op {
    #[inline]
    pub fn id(&self) -> NodeId {
        match self {
            Op::Insert { id, .. }
            | Op::Update { id, .. }
            | Op::Remove { id, .. }
            | Op::Move { id, .. } => *id,
        }
    }
}

/// Ordered edit script between two trees.
///
/// Ordering:
/// 1) inserts, parents before children; a remove of the same id (type change
///    or reparenting) immediately precedes its insert
/// 2) updates
/// 3) moves
/// 4) remaining removes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    frame: u64,
    ops: Vec<Op>,
}

impl Changeset {
    #[inline]
    pub(crate) fn new(frame: u64, ops: Vec<Op>) -> Self {
        Self { frame, ops }
    }

    /// Frame counter of the tree this changeset leads to.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Op> {
        self.ops.iter()
    }

    pub fn inserts(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Insert { .. })).count()
    }

    pub fn updates(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Update { .. })).count()
    }

    pub fn moves(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Move { .. })).count()
    }

    pub fn removes(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Remove { .. })).count()
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a Op;
    type IntoIter = std::slice::Iter<'a, Op>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
