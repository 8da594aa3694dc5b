//! Pipelines and GPU-side data layouts of the wgpu backend.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::tree::{Color, NodeKind, PropKey, Props, TextureFormat, Vec2};

// ── blend ─────────────────────────────────────────────────────────────────

fn premul_alpha_blend() -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

// ── uniforms ──────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct FrameUniform {
    pub viewport: [f32; 2],
    pub _pad: [f32; 2],
}

/// Affine scope transform: `p * scale + offset`, color times `opacity`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct ScopeUniform {
    pub offset: [f32; 2],
    pub scale: f32,
    pub opacity: f32,
}

impl ScopeUniform {
    pub const IDENTITY: ScopeUniform = ScopeUniform {
        offset: [0.0, 0.0],
        scale: 1.0,
        opacity: 1.0,
    };

    pub fn for_node(kind: NodeKind, props: &Props) -> Self {
        let offset = props.vec2(PropKey::Offset).unwrap_or_default();
        match kind {
            NodeKind::Camera => {
                let zoom = props.float(PropKey::Zoom).unwrap_or(1.0);
                ScopeUniform {
                    offset: [-offset.x * zoom, -offset.y * zoom],
                    scale: zoom,
                    opacity: 1.0,
                }
            }
            _ => ScopeUniform {
                offset: [offset.x, offset.y],
                scale: props.float(PropKey::Scale).unwrap_or(1.0),
                opacity: props.float(PropKey::Opacity).unwrap_or(1.0).clamp(0.0, 1.0),
            },
        }
    }
}

fn uniform_min_size<T>() -> Option<NonZeroU64> {
    NonZeroU64::new(std::mem::size_of::<T>() as u64)
}

// ── vertex data ───────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct QuadVertex {
    pub pos: [f32; 2],
}

impl QuadVertex {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { pos: [0.0, 0.0] },
    QuadVertex { pos: [1.0, 0.0] },
    QuadVertex { pos: [1.0, 1.0] },
    QuadVertex { pos: [0.0, 1.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct QuadInstance {
    pub origin: [f32; 2],
    pub size: [f32; 2],
    pub color: [f32; 4],
}

impl QuadInstance {
    const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        1 => Float32x2, // origin
        2 => Float32x2, // size
        3 => Float32x4  // color
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }

    pub fn from_props(kind: NodeKind, props: &Props) -> Self {
        let origin = props.vec2(PropKey::Origin).unwrap_or_default();
        let size = props.vec2(PropKey::Size).unwrap_or_default();
        let tint = if kind == NodeKind::Sprite { Color::WHITE } else { Color::BLACK };
        let color = props.color(PropKey::Color).unwrap_or(tint);
        QuadInstance {
            origin: [origin.x, origin.y],
            size: [size.x, size.y],
            color: color.to_array(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct MeshVertex {
    pub pos: [f32; 2],
}

impl MeshVertex {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }

    /// Vertex data for a mesh; always at least one vertex so the buffer is
    /// never zero-sized.
    pub fn from_points(points: &[Vec2]) -> Vec<MeshVertex> {
        if points.is_empty() {
            return vec![MeshVertex { pos: [0.0, 0.0] }];
        }
        points.iter().map(|p| MeshVertex { pos: [p.x, p.y] }).collect()
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct MeshInstance {
    pub color: [f32; 4],
}

impl MeshInstance {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x4];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

// ── textures ──────────────────────────────────────────────────────────────

pub(super) fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
    }
}

/// Texel data filling a `width` x `height` texture with `color`.
///
/// `None` when the byte count does not fit in memory.
pub(super) fn fill_texels(width: u32, height: u32, format: TextureFormat, color: Color) -> Option<Vec<u8>> {
    let c = color.to_array().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
    let texel: Vec<u8> = match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => c.to_vec(),
        TextureFormat::Bgra8Unorm => vec![c[2], c[1], c[0], c[3]],
        TextureFormat::R8Unorm => vec![c[0]],
    };
    let texels = (width as usize).checked_mul(height as usize)?;
    texels.checked_mul(texel.len())?;
    Some(texel.repeat(texels))
}

// ── pipelines ─────────────────────────────────────────────────────────────

/// Pipelines and shared objects, created once per surface format.
pub(super) struct Pipelines {
    pub format: wgpu::TextureFormat,
    pub quad: wgpu::RenderPipeline,
    pub mesh: wgpu::RenderPipeline,

    pub scope_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,

    pub frame_ubo: wgpu::Buffer,
    pub frame_bind_group: wgpu::BindGroup,
    /// Identity scope for draws outside any `Group`/`Camera`.
    pub default_scope: wgpu::BindGroup,
    /// 1x1 white texture bound for untextured quads.
    pub default_texture: wgpu::BindGroup,

    pub quad_vbo: wgpu::Buffer,
    pub quad_ibo: wgpu::Buffer,
}

impl Pipelines {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let frame_layout = uniform_layout(device, "reactor frame bgl", uniform_min_size::<FrameUniform>());
        let scope_layout = uniform_layout(device, "reactor scope bgl", uniform_min_size::<ScopeUniform>());

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reactor texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("reactor sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let frame_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reactor frame ubo"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reactor frame bind group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_ubo.as_entire_binding(),
            }],
        });

        let default_scope_ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("reactor identity scope"),
            contents: bytemuck::bytes_of(&ScopeUniform::IDENTITY),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let default_scope = scope_bind_group(device, &scope_layout, &default_scope_ubo);

        let white = create_texture(device, queue, 1, 1, TextureFormat::Rgba8Unorm, Color::WHITE);
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let default_texture = texture_bind_group(device, &texture_layout, &white_view, &sampler);

        let quad_vbo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("reactor quad vbo"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let quad_ibo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("reactor quad ibo"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let quad = render_pipeline(
            device,
            format,
            "reactor quad",
            include_str!("shaders/quad.wgsl"),
            &[&frame_layout, &scope_layout, &texture_layout],
            &[QuadVertex::layout(), QuadInstance::layout()],
        );
        let mesh = render_pipeline(
            device,
            format,
            "reactor mesh",
            include_str!("shaders/mesh.wgsl"),
            &[&frame_layout, &scope_layout],
            &[MeshVertex::layout(), MeshInstance::layout()],
        );

        Self {
            format,
            quad,
            mesh,
            scope_layout,
            texture_layout,
            sampler,
            frame_ubo,
            frame_bind_group,
            default_scope,
            default_texture,
            quad_vbo,
            quad_ibo,
        }
    }

    pub fn write_viewport(&self, queue: &wgpu::Queue, width: u32, height: u32) {
        let u = FrameUniform {
            viewport: [width.max(1) as f32, height.max(1) as f32],
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.frame_ubo, 0, bytemuck::bytes_of(&u));
    }
}

fn uniform_layout(
    device: &wgpu::Device,
    label: &'static str,
    min_binding_size: Option<NonZeroU64>,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size,
            },
            count: None,
        }],
    })
}

pub(super) fn scope_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    ubo: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("reactor scope bind group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: ubo.as_entire_binding(),
        }],
    })
}

pub(super) fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("reactor texture bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

pub(super) fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    format: TextureFormat,
    color: Color,
) -> wgpu::Texture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("reactor node texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu_format(format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_texture(queue, &texture, width, height, format, color);
    texture
}

pub(super) fn write_texture(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    format: TextureFormat,
    color: Color,
) {
    let Some(data) = fill_texels(width, height, format, color) else {
        log::error!("texel data for {width}x{height} {format:?} does not fit in memory");
        return;
    };
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * format.texel_size()),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

fn render_pipeline(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    label: &'static str,
    source: &'static str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    buffers: &[wgpu::VertexBufferLayout<'static>],
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(premul_alpha_blend()),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_scope_inverts_offset_and_zooms() {
        let mut p = Props::new();
        p.set(PropKey::Offset, Vec2::new(10.0, 5.0));
        p.set(PropKey::Zoom, 2.0f32);
        let u = ScopeUniform::for_node(NodeKind::Camera, &p);
        assert_eq!(u.offset, [-20.0, -10.0]);
        assert_eq!(u.scale, 2.0);
    }

    #[test]
    fn group_opacity_is_clamped() {
        let mut p = Props::new();
        p.set(PropKey::Opacity, 3.0f32);
        assert_eq!(ScopeUniform::for_node(NodeKind::Group, &p).opacity, 1.0);
    }

    #[test]
    fn texel_fill_matches_format() {
        assert_eq!(fill_texels(2, 1, TextureFormat::R8Unorm, Color::WHITE), Some(vec![255, 255]));
        assert_eq!(
            fill_texels(1, 1, TextureFormat::Bgra8Unorm, Color::RED),
            Some(vec![0, 0, 255, 255])
        );
    }

    #[test]
    fn texel_fill_refuses_unrepresentable_sizes() {
        assert_eq!(fill_texels(u32::MAX, u32::MAX, TextureFormat::Rgba8Unorm, Color::WHITE), None);
    }

    #[test]
    fn empty_mesh_still_has_a_vertex() {
        assert_eq!(MeshVertex::from_points(&[]).len(), 1);
    }
}
