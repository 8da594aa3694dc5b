use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{AllocError, DeviceError, SurfaceError};
use crate::resources::{ResourceAllocator, ResourceDesc, ResourceHandle};
use crate::schedule::{Command, CommandBatch};
use crate::tree::{NodeId, NodeKind, Props};

use super::GpuBackend;

/// Object created through the headless allocator.
#[derive(Debug, Clone)]
pub struct HeadlessObject {
    pub node: NodeId,
    pub kind: NodeKind,
    pub desc: ResourceDesc,
    pub writes: u32,
}

/// Completion flag of one headless submission.
#[derive(Debug, Clone)]
pub struct HeadlessFence {
    submission: u64,
    signaled: Arc<AtomicBool>,
}

impl HeadlessFence {
    #[inline]
    pub fn submission(&self) -> u64 {
        self.submission
    }
}

#[derive(Debug)]
pub struct HeadlessSlot {
    index: usize,
    acquisitions: u64,
}

impl HeadlessSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }
}

#[derive(Debug)]
pub struct HeadlessTarget {
    image: u64,
}

/// Recorded headless buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessBuffer {
    Batch { commands: Vec<Command>, clears: bool },
    /// Buffer built outside the renderer (debug overlay).
    External(String),
}

impl HeadlessBuffer {
    pub fn external(label: impl Into<String>) -> Self {
        HeadlessBuffer::External(label.into())
    }

    pub fn draws(&self) -> usize {
        match self {
            HeadlessBuffer::Batch { commands, .. } => commands
                .iter()
                .filter(|c| matches!(c, Command::Draw { .. }))
                .count(),
            HeadlessBuffer::External(_) => 0,
        }
    }
}

/// One entry of the submission log.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: u64,
    pub slot: usize,
    pub image: u64,
    pub buffers: Vec<HeadlessBuffer>,
}

impl Submission {
    pub fn draws(&self) -> usize {
        self.buffers.iter().map(HeadlessBuffer::draws).sum()
    }

    /// Handles read by this submission.
    pub fn handles(&self) -> HashSet<ResourceHandle> {
        self.buffers
            .iter()
            .flat_map(|b| match b {
                HeadlessBuffer::Batch { commands, .. } => commands.as_slice(),
                HeadlessBuffer::External(_) => [].as_slice(),
            })
            .filter_map(Command::handle)
            .collect()
    }
}

/// CPU-only backend.
///
/// Allocates opaque handles, records batches as command lists and keeps a
/// submission log. GPU completion is simulated: fences either signal at
/// submission (`auto_complete`, the default) or when completed explicitly.
/// Waiting on a fence completes it and every earlier submission.
///
/// Failure injection covers what the renderer must survive: allocation
/// failures, stale and timed-out surfaces, and device loss.
///
/// Completing a submission that reads an already destroyed handle is recorded
/// as a violation (see [`HeadlessBackend::violations`]).
#[derive(Debug)]
pub struct HeadlessBackend {
    next_handle: u64,
    objects: HashMap<ResourceHandle, HeadlessObject>,
    destroyed: Vec<ResourceHandle>,

    next_submission: u64,
    next_image: u64,
    submissions: Vec<Submission>,
    outstanding: Vec<(HeadlessFence, HashSet<ResourceHandle>)>,
    auto_complete: bool,
    fence_waits: u64,
    violations: Vec<(u64, ResourceHandle)>,

    fail_allocations: u32,
    max_texture_dimension: u32,
    stale_acquires: u32,
    timeout_acquires: u32,
    lost: bool,
    recreations: u32,
    size: (u32, u32),
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            objects: HashMap::new(),
            destroyed: Vec::new(),
            next_submission: 0,
            next_image: 0,
            submissions: Vec::new(),
            outstanding: Vec::new(),
            auto_complete: true,
            fence_waits: 0,
            violations: Vec::new(),
            fail_allocations: 0,
            max_texture_dimension: 8192,
            stale_acquires: 0,
            timeout_acquires: 0,
            lost: false,
            recreations: 0,
            size: (1, 1),
        }
    }

    // ── simulation controls ───────────────────────────────────────────────

    /// When disabled, fences stay unsignaled until completed or waited on.
    pub fn set_auto_complete(&mut self, on: bool) {
        self.auto_complete = on;
    }

    /// Signals every outstanding submission up to and including `submission`.
    pub fn complete_through(&mut self, submission: u64) {
        let (done, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.outstanding)
            .into_iter()
            .partition(|(f, _)| f.submission <= submission);
        self.outstanding = rest;
        for (fence, handles) in done {
            self.execute(&fence, &handles);
        }
    }

    pub fn complete_all(&mut self) {
        self.complete_through(u64::MAX);
    }

    pub fn fail_next_allocations(&mut self, n: u32) {
        self.fail_allocations = n;
    }

    /// Largest texture side `create` accepts. Defaults to wgpu's 8192.
    pub fn set_max_texture_dimension(&mut self, texels: u32) {
        self.max_texture_dimension = texels;
    }

    pub fn mark_surface_stale(&mut self) {
        self.stale_acquires += 1;
    }

    pub fn timeout_next_acquire(&mut self) {
        self.timeout_acquires += 1;
    }

    pub fn lose_device(&mut self) {
        self.lost = true;
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&Submission> {
        self.submissions.last()
    }

    pub fn object(&self, handle: ResourceHandle) -> Option<&HeadlessObject> {
        self.objects.get(&handle)
    }

    pub fn is_live(&self, handle: ResourceHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Handles in destruction order.
    pub fn destroyed(&self) -> &[ResourceHandle] {
        &self.destroyed
    }

    /// Submissions that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of blocking fence waits.
    pub fn fence_waits(&self) -> u64 {
        self.fence_waits
    }

    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    /// `(submission, handle)` pairs executed after the handle was destroyed.
    pub fn violations(&self) -> &[(u64, ResourceHandle)] {
        &self.violations
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn execute(&mut self, fence: &HeadlessFence, handles: &HashSet<ResourceHandle>) {
        for h in handles {
            if !self.objects.contains_key(h) {
                log::error!("submission {} read destroyed {h}", fence.submission);
                self.violations.push((fence.submission, *h));
            }
        }
        fence.signaled.store(true, Ordering::Release);
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::Lost("headless device marked lost".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ResourceAllocator for HeadlessBackend {
    fn create(
        &mut self,
        node: NodeId,
        kind: NodeKind,
        desc: &ResourceDesc,
        _props: &Props,
    ) -> Result<ResourceHandle, AllocError> {
        if self.lost {
            return Err(AllocError::DeviceLost { what: desc.to_string() });
        }
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(AllocError::OutOfMemory { what: desc.to_string() });
        }
        desc.check_limits(self.max_texture_dimension)?;
        self.next_handle += 1;
        let handle = ResourceHandle(self.next_handle);
        self.objects.insert(
            handle,
            HeadlessObject {
                node,
                kind,
                desc: *desc,
                writes: 0,
            },
        );
        Ok(handle)
    }

    fn write(&mut self, handle: ResourceHandle, _kind: NodeKind, _desc: &ResourceDesc, _props: &Props) {
        match self.objects.get_mut(&handle) {
            Some(obj) => obj.writes += 1,
            None => log::error!("write to unknown {handle}"),
        }
    }

    fn destroy(&mut self, handle: ResourceHandle) {
        if self.objects.remove(&handle).is_none() {
            log::error!("destroy of unknown {handle}");
        }
        self.destroyed.push(handle);
    }
}

impl GpuBackend for HeadlessBackend {
    type Fence = HeadlessFence;
    type SlotSync = HeadlessSlot;
    type Target = HeadlessTarget;
    type CommandBuffer = HeadlessBuffer;

    fn create_slot(&mut self, index: usize) -> HeadlessSlot {
        HeadlessSlot {
            index,
            acquisitions: 0,
        }
    }

    fn fence_signaled(&self, fence: &HeadlessFence) -> bool {
        fence.signaled.load(Ordering::Acquire)
    }

    fn wait_fence(&mut self, fence: &HeadlessFence) -> Result<(), DeviceError> {
        self.check_lost()?;
        if !self.fence_signaled(fence) {
            self.fence_waits += 1;
            self.complete_through(fence.submission);
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        self.check_lost()
    }

    fn acquire(&mut self, slot: &mut HeadlessSlot) -> Result<HeadlessTarget, SurfaceError> {
        if self.lost {
            return Err(SurfaceError::Fatal("headless device marked lost".to_string()));
        }
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Err(SurfaceError::Stale);
        }
        if self.timeout_acquires > 0 {
            self.timeout_acquires -= 1;
            return Err(SurfaceError::Timeout);
        }
        slot.acquisitions += 1;
        self.next_image += 1;
        Ok(HeadlessTarget {
            image: self.next_image,
        })
    }

    fn record(
        &self,
        _slot: &HeadlessSlot,
        _target: &HeadlessTarget,
        batch: &CommandBatch,
        first: bool,
    ) -> Result<HeadlessBuffer, DeviceError> {
        for cmd in batch.commands() {
            if let Some(h) = cmd.handle() {
                if !self.objects.contains_key(&h) {
                    return Err(DeviceError::DestroyedHandle(h.0));
                }
            }
        }
        Ok(HeadlessBuffer::Batch {
            commands: batch.commands().to_vec(),
            clears: first,
        })
    }

    fn submit(
        &mut self,
        slot: &mut HeadlessSlot,
        target: HeadlessTarget,
        buffers: Vec<HeadlessBuffer>,
    ) -> Result<HeadlessFence, DeviceError> {
        self.check_lost()?;
        self.next_submission += 1;
        let submission = Submission {
            id: self.next_submission,
            slot: slot.index,
            image: target.image,
            buffers,
        };
        let handles = submission.handles();
        let fence = HeadlessFence {
            submission: submission.id,
            signaled: Arc::new(AtomicBool::new(false)),
        };
        self.submissions.push(submission);

        if self.auto_complete {
            self.execute(&fence, &handles);
        } else {
            self.outstanding.push((fence.clone(), handles));
        }
        Ok(fence)
    }

    fn discard(&mut self, _target: HeadlessTarget) {}

    fn recreate_surface(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.recreations += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn wait_idle(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.complete_all();
        Ok(())
    }
}
