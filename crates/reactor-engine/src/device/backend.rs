use crate::error::{DeviceError, SurfaceError};
use crate::resources::ResourceAllocator;
use crate::schedule::CommandBatch;

/// Device seam of the renderer.
///
/// A backend owns the device, the presentable surface and every object the
/// resource cache allocates through [`ResourceAllocator`]. The frame executor
/// drives it in this order per frame:
///
/// 1) `acquire` the target image for a frame slot
/// 2) `record` each batch (called concurrently from worker threads)
/// 3) `submit` the recorded buffers, which also presents the target
///
/// A swapchain that no longer matches the surface is reported by `acquire` as
/// [`SurfaceError::Stale`]; nothing has been submitted for the frame yet.
pub trait GpuBackend: ResourceAllocator + Sync {
    /// Completion signal of one submission.
    type Fence: Send;
    /// Per-slot synchronization state (semaphores, command pools).
    type SlotSync: Send + Sync;
    /// Acquired presentable image.
    type Target: Send + Sync;
    /// Recorded, not yet submitted, command buffer.
    type CommandBuffer: Send;

    /// Creates the synchronization state for frame slot `index`.
    fn create_slot(&mut self, index: usize) -> Self::SlotSync;

    /// Non-blocking fence query.
    fn fence_signaled(&self, fence: &Self::Fence) -> bool;

    /// Blocks until `fence` signals.
    fn wait_fence(&mut self, fence: &Self::Fence) -> Result<(), DeviceError>;

    /// Processes completion callbacks without blocking. Reports device loss.
    fn poll(&mut self) -> Result<(), DeviceError>;

    fn acquire(&mut self, slot: &mut Self::SlotSync) -> Result<Self::Target, SurfaceError>;

    /// Records one batch. `first` is set for the first buffer of the frame,
    /// which clears the target.
    fn record(
        &self,
        slot: &Self::SlotSync,
        target: &Self::Target,
        batch: &CommandBatch,
        first: bool,
    ) -> Result<Self::CommandBuffer, DeviceError>;

    /// Submits `buffers` in order and presents `target`.
    fn submit(
        &mut self,
        slot: &mut Self::SlotSync,
        target: Self::Target,
        buffers: Vec<Self::CommandBuffer>,
    ) -> Result<Self::Fence, DeviceError>;

    /// Drops an acquired target without presenting it.
    fn discard(&mut self, target: Self::Target);

    /// Rebuilds the swapchain after a stale acquisition.
    fn recreate_surface(&mut self) -> Result<(), DeviceError>;

    /// Applies a new drawable size (physical pixels).
    fn resize(&mut self, width: u32, height: u32);

    /// Blocks until all submitted work has completed.
    fn wait_idle(&mut self) -> Result<(), DeviceError>;
}
