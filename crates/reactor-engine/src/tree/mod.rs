//! Declarative scene tree.
//!
//! Responsibilities:
//! - typed node model (closed [`NodeKind`] set, typed properties, keys)
//! - authoring API ([`TreeBuilder`]) producing an immutable [`SceneTree`]
//! - validation and lookup ([`TreeIndex`]) shared by the reconciler and scheduler

mod builder;
mod index;
mod node;
mod value;

pub use builder::{SceneTree, TreeBuilder};
pub use index::TreeIndex;
pub use node::{Key, Node, NodeId, NodeKind};
pub use value::{Color, PropKey, PropPatch, PropValue, Props, TextureFormat, Vec2};
