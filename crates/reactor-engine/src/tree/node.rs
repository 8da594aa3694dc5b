use std::fmt;

use super::{PropKey, PropValue, Props};

/// Stable node identity, unique within one authored tree.
///
/// The resource cache keys GPU objects by this id, so an application that
/// keeps ids stable across frames keeps its GPU resources.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub u64);

impl From<u64> for NodeId {
    fn from(v: u64) -> Self {
        NodeId(v)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Application-supplied reconciliation key for list children.
///
/// Keys identify an element across frames; they must not be list indices.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Key {
    Int(u64),
    Name(String),
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Name(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Name(v)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Name(v) => write!(f, "{v:?}"),
        }
    }
}

/// Closed set of node types.
///
/// Extending the tree:
/// - add a variant here
/// - list its accepted properties in [`NodeKind::accepts`]
/// - derive its resource in `resources::ResourceDesc::for_node`
/// - record it in the scheduler and in each backend
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// Container carrying a transform-like uniform for its subtree.
    Group,
    /// Viewport offset/zoom for its subtree.
    Camera,
    /// 2D texture that sprites reference by node id.
    Texture,
    Rect,
    Sprite,
    Mesh,
}

impl NodeKind {
    /// Drawable nodes produce exactly one draw command each.
    #[inline]
    pub const fn is_drawable(self) -> bool {
        matches!(self, NodeKind::Rect | NodeKind::Sprite | NodeKind::Mesh)
    }

    /// Nodes that scope the bindings of the draws beneath them.
    #[inline]
    pub const fn is_scope(self) -> bool {
        matches!(self, NodeKind::Group | NodeKind::Camera)
    }

    pub fn accepts(self, key: PropKey) -> bool {
        use PropKey as P;
        match self {
            NodeKind::Group => matches!(key, P::Offset | P::Scale | P::Opacity),
            NodeKind::Camera => matches!(key, P::Offset | P::Zoom),
            NodeKind::Texture => matches!(key, P::Width | P::Height | P::Format | P::Color),
            NodeKind::Rect => matches!(key, P::Origin | P::Size | P::Color),
            NodeKind::Sprite => matches!(key, P::Origin | P::Size | P::Color | P::Texture),
            NodeKind::Mesh => matches!(key, P::Points | P::Color),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Group => "Group",
            NodeKind::Camera => "Camera",
            NodeKind::Texture => "Texture",
            NodeKind::Rect => "Rect",
            NodeKind::Sprite => "Sprite",
            NodeKind::Mesh => "Mesh",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One authored node.
///
/// Nodes are values: once a tree is handed to the renderer it is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub key: Option<Key>,
    pub props: Props,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            key: None,
            props: Props::new(),
            children: Vec::new(),
        }
    }

    /// Sets the reconciliation key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets a property.
    pub fn prop(mut self, key: PropKey, value: impl Into<PropValue>) -> Self {
        self.props.set(key, value);
        self
    }
}
