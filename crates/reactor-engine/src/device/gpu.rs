use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::{AllocError, DeviceError, SurfaceError};
use crate::resources::{ResourceAllocator, ResourceDesc, ResourceHandle};
use crate::schedule::{Command, CommandBatch, PipelineKind};
use crate::tree::{Color, NodeId, NodeKind, PropKey, Props};

use super::pipelines::{
    MeshInstance, MeshVertex, Pipelines, QuadInstance, ScopeUniform, create_texture,
    scope_bind_group, texture_bind_group, write_texture,
};
use super::{GpuBackend, GpuInit, surface};

/// GPU object owned on behalf of the resource cache.
enum GpuObject {
    Uniform {
        ubo: wgpu::Buffer,
        bind_group: wgpu::BindGroup,
    },
    Instance {
        vbo: wgpu::Buffer,
    },
    Mesh {
        vertices: wgpu::Buffer,
        instance: wgpu::Buffer,
        vertex_count: u32,
    },
    Texture {
        texture: wgpu::Texture,
        bind_group: wgpu::BindGroup,
    },
}

/// Completion of one queue submission.
pub struct WgpuFence {
    submission: wgpu::SubmissionIndex,
    signaled: Arc<AtomicBool>,
}

/// wgpu tracks semaphores and command pools internally; a slot only
/// remembers its ring position.
pub struct WgpuSlot {
    index: usize,
}

impl WgpuSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Acquired swapchain image.
pub struct WgpuTarget {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

impl WgpuTarget {
    /// View of the swapchain image, for overlay recorders.
    #[inline]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// wgpu implementation of [`GpuBackend`] bound to a winit window.
///
/// Owns:
/// - Instance/Adapter/Device/Queue and the window surface
/// - every node object allocated by the resource cache
/// - the quad and mesh pipelines plus their shared bind groups
///
/// Barriers are no-ops at record time: wgpu derives resource transitions from
/// usage itself.
pub struct WgpuBackend<'w> {
    instance: wgpu::Instance,

    /// The window must outlive the backend (`'w`).
    surface: wgpu::Surface<'w>,

    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    clear: wgpu::Color,

    pipelines: Pipelines,
    objects: HashMap<ResourceHandle, GpuObject>,
    next_handle: u64,

    lost: Arc<AtomicBool>,
    oom: Arc<AtomicBool>,
}

impl<'w> WgpuBackend<'w> {
    /// Creates the device and configures the window surface.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(window: &'w Window, init: GpuInit, clear_color: Color) -> Result<Self> {
        let size = window.inner_size();
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let GpuInit {
            prefer_srgb,
            present_mode,
            alpha_mode,
            power_preference,
            required_features,
            required_limits,
            desired_maximum_frame_latency,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("reactor-engine device"),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        let oom = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&oom);
        device.on_uncaptured_error(Arc::new(move |e| {
            if let wgpu::Error::OutOfMemory { .. } = e {
                flag.store(true, Ordering::Release);
            }
            log::error!("wgpu uncaptured error: {e:?}");
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&caps, prefer_srgb)
            .context("no supported surface formats")?;
        let alpha_mode = surface::choose_alpha_mode(&caps, alpha_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);

        let pipelines = Pipelines::new(&device, &queue, format);
        pipelines.write_viewport(&queue, size.width, size.height);

        log::info!(
            "wgpu backend ready: {} ({:?}), surface {format:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            size.width,
            size.height
        );

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            config,
            size,
            clear: wgpu::Color {
                r: clear_color.r as f64,
                g: clear_color.g as f64,
                b: clear_color.b as f64,
                a: clear_color.a as f64,
            },
            pipelines,
            objects: HashMap::new(),
            next_handle: 0,
            lost,
            oom,
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.pipelines.format
    }

    /// Current drawable size in physical pixels.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            Err(DeviceError::Lost("wgpu device lost".to_string()))
        } else {
            Ok(())
        }
    }

    fn wait_all(&self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| DeviceError::Other(e.to_string()))?;
        self.check_lost()
    }

    /// Blocks until `submission` has executed; later submissions keep running.
    fn wait_submission(&self, submission: &wgpu::SubmissionIndex) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission.clone()),
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| DeviceError::Other(e.to_string()))?;
        self.check_lost()
    }

    fn create_object(&self, kind: NodeKind, desc: &ResourceDesc, props: &Props) -> GpuObject {
        match *desc {
            ResourceDesc::Uniform => {
                let ubo = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("reactor scope ubo"),
                    contents: bytemuck::bytes_of(&ScopeUniform::for_node(kind, props)),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bind_group = scope_bind_group(&self.device, &self.pipelines.scope_layout, &ubo);
                GpuObject::Uniform { ubo, bind_group }
            }
            ResourceDesc::Instance => {
                let vbo = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("reactor quad instance"),
                    contents: bytemuck::bytes_of(&QuadInstance::from_props(kind, props)),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                });
                GpuObject::Instance { vbo }
            }
            ResourceDesc::Mesh { vertex_count } => {
                let points = props.points(PropKey::Points).unwrap_or(&[]);
                let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("reactor mesh vertices"),
                    contents: bytemuck::cast_slice(&MeshVertex::from_points(points)),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                });
                let instance = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("reactor mesh instance"),
                    contents: bytemuck::bytes_of(&mesh_instance(props)),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                });
                GpuObject::Mesh {
                    vertices,
                    instance,
                    vertex_count,
                }
            }
            ResourceDesc::Texture {
                width,
                height,
                format,
            } => {
                let fill = props.color(PropKey::Color).unwrap_or(Color::WHITE);
                let texture = create_texture(&self.device, &self.queue, width, height, format, fill);
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                let bind_group = texture_bind_group(
                    &self.device,
                    &self.pipelines.texture_layout,
                    &view,
                    &self.pipelines.sampler,
                );
                GpuObject::Texture {
                    texture,
                    bind_group,
                }
            }
        }
    }

    fn object(&self, handle: ResourceHandle) -> Result<&GpuObject, DeviceError> {
        self.objects
            .get(&handle)
            .ok_or(DeviceError::DestroyedHandle(handle.0))
    }
}

fn mesh_instance(props: &Props) -> MeshInstance {
    MeshInstance {
        color: props.color(PropKey::Color).unwrap_or(Color::BLACK).to_array(),
    }
}

impl ResourceAllocator for WgpuBackend<'_> {
    fn create(
        &mut self,
        node: NodeId,
        kind: NodeKind,
        desc: &ResourceDesc,
        props: &Props,
    ) -> Result<ResourceHandle, AllocError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(AllocError::DeviceLost { what: desc.to_string() });
        }

        if let Err(err) = desc.check_limits(self.device.limits().max_texture_dimension_2d) {
            log::warn!("allocating {desc} for node {node}: {err}");
            return Err(err);
        }

        let object = self.create_object(kind, desc, props);
        if self.oom.swap(false, Ordering::AcqRel) {
            log::warn!("allocating {desc} for node {node}: out of memory");
            return Err(AllocError::OutOfMemory { what: desc.to_string() });
        }

        self.next_handle += 1;
        let handle = ResourceHandle(self.next_handle);
        self.objects.insert(handle, object);
        log::trace!("created {handle} ({desc}) for {kind} {node}");
        Ok(handle)
    }

    fn write(&mut self, handle: ResourceHandle, kind: NodeKind, desc: &ResourceDesc, props: &Props) {
        let Some(object) = self.objects.get(&handle) else {
            log::error!("write to unknown {handle}");
            return;
        };
        match object {
            GpuObject::Uniform { ubo, .. } => {
                self.queue
                    .write_buffer(ubo, 0, bytemuck::bytes_of(&ScopeUniform::for_node(kind, props)));
            }
            GpuObject::Instance { vbo } => {
                self.queue
                    .write_buffer(vbo, 0, bytemuck::bytes_of(&QuadInstance::from_props(kind, props)));
            }
            GpuObject::Mesh {
                vertices, instance, ..
            } => {
                let points = props.points(PropKey::Points).unwrap_or(&[]);
                self.queue
                    .write_buffer(vertices, 0, bytemuck::cast_slice(&MeshVertex::from_points(points)));
                self.queue
                    .write_buffer(instance, 0, bytemuck::bytes_of(&mesh_instance(props)));
            }
            GpuObject::Texture { texture, .. } => {
                if let ResourceDesc::Texture {
                    width,
                    height,
                    format,
                } = *desc
                {
                    let fill = props.color(PropKey::Color).unwrap_or(Color::WHITE);
                    write_texture(&self.queue, texture, width, height, format, fill);
                }
            }
        }
    }

    fn destroy(&mut self, handle: ResourceHandle) {
        match self.objects.remove(&handle) {
            Some(GpuObject::Uniform { ubo, .. }) => ubo.destroy(),
            Some(GpuObject::Instance { vbo }) => vbo.destroy(),
            Some(GpuObject::Mesh {
                vertices, instance, ..
            }) => {
                vertices.destroy();
                instance.destroy();
            }
            Some(GpuObject::Texture { texture, .. }) => texture.destroy(),
            None => log::error!("destroy of unknown {handle}"),
        }
    }
}

impl<'w> GpuBackend for WgpuBackend<'w> {
    type Fence = WgpuFence;
    type SlotSync = WgpuSlot;
    type Target = WgpuTarget;
    type CommandBuffer = wgpu::CommandBuffer;

    fn create_slot(&mut self, index: usize) -> WgpuSlot {
        WgpuSlot { index }
    }

    fn fence_signaled(&self, fence: &WgpuFence) -> bool {
        fence.signaled.load(Ordering::Acquire)
    }

    fn wait_fence(&mut self, fence: &WgpuFence) -> Result<(), DeviceError> {
        if self.fence_signaled(fence) {
            return Ok(());
        }
        self.wait_submission(&fence.submission)?;
        if !self.fence_signaled(fence) {
            log::warn!("fence still unsignaled after waiting for its submission");
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("non-blocking device poll failed: {e}");
        }
        self.check_lost()
    }

    fn acquire(&mut self, _slot: &mut WgpuSlot) -> Result<WgpuTarget, SurfaceError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(SurfaceError::Fatal("wgpu device lost".to_string()));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(SurfaceError::Timeout);
        }

        let surface_texture = self
            .surface
            .get_current_texture()
            .map_err(surface::classify)?;
        if surface_texture.suboptimal {
            drop(surface_texture);
            return Err(SurfaceError::Stale);
        }

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTarget {
            surface_texture,
            view,
        })
    }

    fn record(
        &self,
        slot: &WgpuSlot,
        target: &WgpuTarget,
        batch: &CommandBatch,
        first: bool,
    ) -> Result<wgpu::CommandBuffer, DeviceError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reactor batch encoder"),
            });

        {
            let load = if first {
                wgpu::LoadOp::Clear(self.clear)
            } else {
                wgpu::LoadOp::Load
            };
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("reactor batch pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let p = &self.pipelines;
            for cmd in batch.commands() {
                match *cmd {
                    Command::Barrier { .. } => {}
                    Command::Setup { handle, .. } => {
                        // Contents were uploaded by the cache; only check liveness.
                        self.object(handle)?;
                    }
                    Command::BindPipeline(key) => {
                        let scope = match key.scope {
                            Some(h) => match self.object(h)? {
                                GpuObject::Uniform { bind_group, .. } => bind_group,
                                _ => &p.default_scope,
                            },
                            None => &p.default_scope,
                        };
                        match key.pipeline {
                            PipelineKind::Quad => {
                                let texture = match key.texture {
                                    Some(h) => match self.object(h)? {
                                        GpuObject::Texture { bind_group, .. } => bind_group,
                                        _ => &p.default_texture,
                                    },
                                    None => &p.default_texture,
                                };
                                rpass.set_pipeline(&p.quad);
                                rpass.set_bind_group(0, &p.frame_bind_group, &[]);
                                rpass.set_bind_group(1, scope, &[]);
                                rpass.set_bind_group(2, texture, &[]);
                                rpass.set_vertex_buffer(0, p.quad_vbo.slice(..));
                                rpass.set_index_buffer(p.quad_ibo.slice(..), wgpu::IndexFormat::Uint16);
                            }
                            PipelineKind::Mesh => {
                                rpass.set_pipeline(&p.mesh);
                                rpass.set_bind_group(0, &p.frame_bind_group, &[]);
                                rpass.set_bind_group(1, scope, &[]);
                            }
                        }
                    }
                    Command::Draw { handle, .. } => match self.object(handle)? {
                        GpuObject::Instance { vbo } => {
                            rpass.set_vertex_buffer(1, vbo.slice(..));
                            rpass.draw_indexed(0..6, 0, 0..1);
                        }
                        GpuObject::Mesh {
                            vertices,
                            instance,
                            vertex_count,
                        } => {
                            let n = vertex_count - vertex_count % 3;
                            if n > 0 {
                                rpass.set_vertex_buffer(0, vertices.slice(..));
                                rpass.set_vertex_buffer(1, instance.slice(..));
                                rpass.draw(0..n, 0..1);
                            }
                        }
                        GpuObject::Uniform { .. } | GpuObject::Texture { .. } => {
                            log::warn!("draw of non-drawable {handle} in slot {}", slot.index);
                        }
                    },
                }
            }
        }

        Ok(encoder.finish())
    }

    fn submit(
        &mut self,
        _slot: &mut WgpuSlot,
        target: WgpuTarget,
        buffers: Vec<wgpu::CommandBuffer>,
    ) -> Result<WgpuFence, DeviceError> {
        self.check_lost()?;

        let submission = self.queue.submit(buffers);
        let signaled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&signaled);
        self.queue.on_submitted_work_done(move || {
            flag.store(true, Ordering::Release);
        });

        let WgpuTarget {
            surface_texture,
            view,
        } = target;
        drop(view);
        surface_texture.present();

        Ok(WgpuFence { submission, signaled })
    }

    fn discard(&mut self, target: WgpuTarget) {
        drop(target);
    }

    fn recreate_surface(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        if self.size.width > 0 && self.size.height > 0 {
            self.surface.configure(&self.device, &self.config);
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        surface::apply_resize(
            &self.surface,
            &self.device,
            &mut self.config,
            &mut self.size,
            PhysicalSize::new(width, height),
        );
        self.pipelines.write_viewport(&self.queue, width, height);
    }

    fn wait_idle(&mut self) -> Result<(), DeviceError> {
        self.wait_all()
    }
}
