use std::fmt;

use crate::error::AllocError;
use crate::tree::{NodeId, NodeKind, PropKey, Props, TextureFormat};

/// Opaque, non-owning reference to a GPU object owned by the resource cache.
///
/// Valid until the pending-deletion epoch of its entry closes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Shape of the GPU object backing a node.
///
/// Two descriptors compare equal exactly when one object can serve both; a
/// property change that alters the descriptor forces recreation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceDesc {
    /// Per-scope uniform block (`Group`, `Camera`).
    Uniform,
    /// Single-instance vertex buffer (`Rect`, `Sprite`).
    Instance,
    /// Vertex buffer sized for the point list plus an instance buffer.
    Mesh { vertex_count: u32 },
    Texture {
        width: u32,
        height: u32,
        format: TextureFormat,
    },
}

impl ResourceDesc {
    /// Derives the descriptor from a node's kind and its structural properties.
    pub fn for_node(kind: NodeKind, props: &Props) -> Self {
        match kind {
            NodeKind::Group | NodeKind::Camera => ResourceDesc::Uniform,
            NodeKind::Rect | NodeKind::Sprite => ResourceDesc::Instance,
            NodeKind::Mesh => ResourceDesc::Mesh {
                vertex_count: props.points(PropKey::Points).map_or(0, |p| p.len() as u32),
            },
            NodeKind::Texture => ResourceDesc::Texture {
                width: props.uint(PropKey::Width).unwrap_or(1).max(1),
                height: props.uint(PropKey::Height).unwrap_or(1).max(1),
                format: props.format(PropKey::Format).unwrap_or_default(),
            },
        }
    }

    /// Approximate device memory footprint, for diagnostics.
    pub fn byte_size(&self) -> u64 {
        match *self {
            ResourceDesc::Uniform => 32,
            ResourceDesc::Instance => 32,
            ResourceDesc::Mesh { vertex_count } => 32 + vertex_count as u64 * 8,
            ResourceDesc::Texture {
                width,
                height,
                format,
            } => width as u64 * height as u64 * format.texel_size() as u64,
        }
    }

    /// Rejects textures wider or taller than `max_dimension`, or whose texel
    /// data cannot be addressed on this host.
    pub fn check_limits(&self, max_dimension: u32) -> Result<(), AllocError> {
        let ResourceDesc::Texture {
            width,
            height,
            format,
        } = *self
        else {
            return Ok(());
        };
        let exceeds = || AllocError::ExceedsLimits {
            what: self.to_string(),
            limit: max_dimension,
        };
        if width > max_dimension || height > max_dimension {
            return Err(exceeds());
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.texel_size() as usize))
            .map(|_| ())
            .ok_or_else(exceeds)
    }
}

impl fmt::Display for ResourceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceDesc::Uniform => f.write_str("uniform"),
            ResourceDesc::Instance => f.write_str("instance buffer"),
            ResourceDesc::Mesh { vertex_count } => write!(f, "mesh ({vertex_count} vertices)"),
            ResourceDesc::Texture {
                width,
                height,
                format,
            } => write!(f, "texture {width}x{height} {format:?}"),
        }
    }
}

/// Device-side operations the resource cache is allowed to perform.
///
/// Implemented by every GPU backend. The cache is the sole caller and the sole
/// owner of what `create` returns.
pub trait ResourceAllocator {
    /// Allocates an object for `node` and uploads its initial contents.
    fn create(
        &mut self,
        node: NodeId,
        kind: NodeKind,
        desc: &ResourceDesc,
        props: &Props,
    ) -> Result<ResourceHandle, AllocError>;

    /// Rewrites the contents of a live object in place.
    fn write(&mut self, handle: ResourceHandle, kind: NodeKind, desc: &ResourceDesc, props: &Props);

    /// Releases an object. Only called once no in-flight frame can read it.
    fn destroy(&mut self, handle: ResourceHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{PropValue, Vec2};

    #[test]
    fn texture_defaults_to_one_texel_rgba8() {
        let desc = ResourceDesc::for_node(NodeKind::Texture, &Props::new());
        assert_eq!(
            desc,
            ResourceDesc::Texture {
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm
            }
        );
        assert_eq!(desc.byte_size(), 4);
    }

    #[test]
    fn mesh_descriptor_tracks_point_count() {
        let mut props = Props::new();
        props.set(PropKey::Points, vec![Vec2::new(0.0, 0.0); 3]);
        assert_eq!(
            ResourceDesc::for_node(NodeKind::Mesh, &props),
            ResourceDesc::Mesh { vertex_count: 3 }
        );

        props.set(PropKey::Points, PropValue::Points(vec![Vec2::new(1.0, 1.0); 4]));
        assert_eq!(
            ResourceDesc::for_node(NodeKind::Mesh, &props),
            ResourceDesc::Mesh { vertex_count: 4 }
        );
    }

    #[test]
    fn texture_limits_apply_per_side() {
        let desc = |width, height| ResourceDesc::Texture {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
        };
        assert!(desc(8192, 8192).check_limits(8192).is_ok());
        assert!(matches!(
            desc(8193, 1).check_limits(8192),
            Err(AllocError::ExceedsLimits { limit: 8192, .. })
        ));
        assert!(desc(1, 70_000).check_limits(8192).is_err());
        assert!(ResourceDesc::Mesh { vertex_count: u32::MAX }.check_limits(1).is_ok());
    }

    #[test]
    fn drawables_without_structural_props_share_a_descriptor() {
        let mut a = Props::new();
        a.set(PropKey::Size, Vec2::new(10.0, 10.0));
        let b = Props::new();
        assert_eq!(
            ResourceDesc::for_node(NodeKind::Rect, &a),
            ResourceDesc::for_node(NodeKind::Rect, &b)
        );
    }
}
