use rayon::prelude::*;

use crate::device::GpuBackend;
use crate::error::{DeviceError, EngineError, SurfaceError};
use crate::resources::ResourceCache;
use crate::schedule::{CommandBatch, CommandSequence, SequenceItem};

use super::context::{FrameContext, FrameSlot, SlotState};

/// Externally recorded overlay, inserted unmodified at the overlay slot.
pub type OverlayFn<'o, B> =
    dyn FnMut(&B, &<B as GpuBackend>::Target) -> <B as GpuBackend>::CommandBuffer + 'o;

/// Ring of D frame slots driving submission and presentation.
///
/// Each completed or abandoned frame is retired in the resource cache, which
/// is what releases deferred deletions. `begin` is the only call that blocks
/// on the GPU during normal operation.
pub struct FrameExecutor<B: GpuBackend> {
    slots: Vec<FrameContext<B>>,
    cursor: usize,
    next_frame: u64,
}

impl<B: GpuBackend> FrameExecutor<B> {
    pub fn new(backend: &mut B, depth: usize) -> Result<Self, EngineError> {
        if depth == 0 {
            return Err(EngineError::Config("buffering_depth must be >= 1".to_string()));
        }
        let slots = (0..depth)
            .map(|i| FrameContext::new(backend.create_slot(i)))
            .collect();
        Ok(Self {
            slots,
            cursor: 0,
            next_frame: 0,
        })
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slots(&self) -> &[FrameContext<B>] {
        &self.slots
    }

    /// Frames handed out so far; the next `begin` returns this index.
    #[inline]
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Slots whose submission has not been observed complete.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Submitted)
            .count()
    }

    /// Retires every slot whose fence has signaled. Never blocks.
    pub fn poll(&mut self, backend: &mut B, cache: &mut ResourceCache) -> Result<usize, DeviceError> {
        backend.poll()?;
        let mut retired = 0;
        for i in 0..self.slots.len() {
            let signaled = match (&self.slots[i].state, &self.slots[i].fence) {
                (SlotState::Submitted, Some(fence)) => backend.fence_signaled(fence),
                _ => false,
            };
            if signaled {
                self.complete(i, backend, cache);
                retired += 1;
            }
        }
        Ok(retired)
    }

    /// Claims the next slot in ring order.
    ///
    /// Blocks only when the slot's previous frame is still executing.
    pub fn begin(&mut self, backend: &mut B, cache: &mut ResourceCache) -> Result<FrameSlot, EngineError> {
        let index = self.cursor;
        match self.slots[index].state {
            SlotState::Idle => {}
            SlotState::Submitted | SlotState::Complete => {
                if let Some(fence) = &self.slots[index].fence
                    && !backend.fence_signaled(fence)
                {
                    log::trace!("slot {index} still in flight; waiting on its fence");
                    backend.wait_fence(fence)?;
                }
                self.complete(index, backend, cache);
            }
            SlotState::Recording => {
                return Err(EngineError::Schedule(format!(
                    "slot {index} is still recording frame {:?}",
                    self.slots[index].occupant
                )));
            }
        }

        let frame = self.next_frame;
        self.next_frame += 1;
        self.cursor = (self.cursor + 1) % self.slots.len();

        let slot = &mut self.slots[index];
        slot.state = SlotState::Recording;
        slot.occupant = Some(frame);
        Ok(FrameSlot { index, frame })
    }

    pub fn acquire(&mut self, backend: &mut B, slot: FrameSlot) -> Result<B::Target, SurfaceError> {
        backend.acquire(&mut self.slots[slot.index].sync)
    }

    /// Records every batch of `sequence` on `pool` and returns the buffers in
    /// submission order, the overlay buffer placed at the overlay slot (or
    /// last, when the sequence reserves none).
    pub fn record(
        &self,
        backend: &B,
        pool: &rayon::ThreadPool,
        slot: FrameSlot,
        target: &B::Target,
        sequence: &CommandSequence,
        overlay: Option<&mut OverlayFn<'_, B>>,
    ) -> Result<Vec<B::CommandBuffer>, DeviceError> {
        debug_assert_eq!(self.slots[slot.index].state, SlotState::Recording);
        let sync = &self.slots[slot.index].sync;

        // An empty frame still clears the target.
        let empty = CommandBatch::default();
        let mut batches: Vec<&CommandBatch> = sequence.batches().collect();
        if batches.is_empty() {
            batches.push(&empty);
        }

        let recorded: Vec<B::CommandBuffer> = pool.install(|| {
            batches
                .par_iter()
                .enumerate()
                .map(|(i, batch)| backend.record(sync, target, batch, i == 0))
                .collect::<Result<Vec<_>, DeviceError>>()
        })?;

        let mut overlay_buffer = overlay.map(|f| f(backend, target));
        let mut out = Vec::with_capacity(recorded.len() + 1);
        let mut recorded = recorded.into_iter();
        for item in sequence.items() {
            match item {
                SequenceItem::Batch(_) => out.extend(recorded.next()),
                SequenceItem::Overlay => out.extend(overlay_buffer.take()),
            }
        }
        // Only the synthetic clear batch can remain here.
        out.extend(recorded);
        out.extend(overlay_buffer);
        Ok(out)
    }

    pub fn submit(
        &mut self,
        backend: &mut B,
        slot: FrameSlot,
        target: B::Target,
        buffers: Vec<B::CommandBuffer>,
    ) -> Result<(), DeviceError> {
        let ctx = &mut self.slots[slot.index];
        debug_assert_eq!(ctx.state, SlotState::Recording);
        let fence = backend.submit(&mut ctx.sync, target, buffers)?;
        ctx.fence = Some(fence);
        ctx.state = SlotState::Submitted;
        Ok(())
    }

    /// Returns a recording slot to `Idle` without submitting, retiring its
    /// frame at once.
    pub fn abandon(
        &mut self,
        backend: &mut B,
        cache: &mut ResourceCache,
        slot: FrameSlot,
        target: Option<B::Target>,
    ) -> usize {
        if let Some(target) = target {
            backend.discard(target);
        }
        let ctx = &mut self.slots[slot.index];
        ctx.fence = None;
        ctx.state = SlotState::Idle;
        let destroyed = cache.retire(slot.frame, backend);
        log::debug!("frame {} abandoned in slot {}", slot.frame, slot.index);
        destroyed
    }

    /// Blocks on every outstanding fence and retires the frames.
    pub fn wait_idle(&mut self, backend: &mut B, cache: &mut ResourceCache) -> Result<usize, DeviceError> {
        let mut retired = 0;
        for i in 0..self.slots.len() {
            if self.slots[i].state != SlotState::Submitted {
                continue;
            }
            if let Some(fence) = &self.slots[i].fence
                && !backend.fence_signaled(fence)
            {
                backend.wait_fence(fence)?;
            }
            self.complete(i, backend, cache);
            retired += 1;
        }
        backend.wait_idle()?;
        Ok(retired)
    }

    /// `Submitted -> Complete -> Idle`, retiring the occupant's frame.
    fn complete(&mut self, index: usize, backend: &mut B, cache: &mut ResourceCache) {
        let slot = &mut self.slots[index];
        slot.state = SlotState::Complete;
        slot.fence = None;
        if let Some(frame) = slot.occupant {
            let destroyed = cache.retire(frame, backend);
            if destroyed > 0 {
                log::debug!("frame {frame} retired; destroyed {destroyed} deferred resources");
            }
        }
        slot.state = SlotState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessBackend, HeadlessBuffer, HeadlessTarget};
    use crate::reconcile::reconcile;
    use crate::schedule::CommandScheduler;
    use crate::tree::{Color, Node, NodeKind, PropKey, SceneTree, TreeBuilder};

    fn rects(frame: u64, ids: &[u64]) -> SceneTree {
        let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Group));
        let root = b.root();
        for &id in ids {
            b.child(
                root,
                Node::new(id, NodeKind::Rect).key(id).prop(PropKey::Color, Color::RED),
            );
        }
        b.finish()
    }

    struct Rig {
        backend: HeadlessBackend,
        cache: ResourceCache,
        scheduler: CommandScheduler,
        exec: FrameExecutor<HeadlessBackend>,
        previous: Option<SceneTree>,
    }

    impl Rig {
        fn new(depth: usize) -> Self {
            let mut backend = HeadlessBackend::new();
            let exec = FrameExecutor::new(&mut backend, depth).unwrap();
            Self {
                backend,
                cache: ResourceCache::new(depth),
                scheduler: CommandScheduler::new(Some(2), true).unwrap(),
                exec,
                previous: None,
            }
        }

        fn run(&mut self, tree: SceneTree) -> FrameSlot {
            let changes = reconcile(self.previous.as_ref(), &tree).unwrap();
            let slot = self.exec.begin(&mut self.backend, &mut self.cache).unwrap();
            self.cache.apply(&changes, slot.frame, &mut self.backend).unwrap();
            let seq = self
                .scheduler
                .build(&tree, &changes, self.cache.view(), false)
                .unwrap();
            let target = self.exec.acquire(&mut self.backend, slot).unwrap();
            let buffers = self
                .exec
                .record(&self.backend, self.scheduler.pool(), slot, &target, &seq, None)
                .unwrap();
            self.exec.submit(&mut self.backend, slot, target, buffers).unwrap();
            self.cache.mark_recorded(&seq, slot.frame);
            self.previous = Some(tree);
            slot
        }
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut backend = HeadlessBackend::new();
        assert!(matches!(
            FrameExecutor::new(&mut backend, 0),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn slots_are_claimed_in_ring_order() {
        let mut rig = Rig::new(3);
        let frames: Vec<(usize, u64)> = (1..=5)
            .map(|f| {
                let s = rig.run(rects(f, &[1]));
                (s.index, s.frame)
            })
            .collect();
        assert_eq!(frames, vec![(0, 0), (1, 1), (2, 2), (0, 3), (1, 4)]);
    }

    #[test]
    fn begin_blocks_only_on_an_unsignaled_slot() {
        let mut rig = Rig::new(2);
        rig.backend.set_auto_complete(false);

        rig.run(rects(1, &[1]));
        rig.run(rects(2, &[1]));
        assert_eq!(rig.exec.in_flight(), 2);
        assert_eq!(rig.backend.fence_waits(), 0);

        // Third frame reuses slot 0, whose fence never signaled.
        rig.run(rects(3, &[1]));
        assert_eq!(rig.backend.fence_waits(), 1);
        assert!(rig.exec.in_flight() <= 2);
    }

    #[test]
    fn poll_retires_completed_slots_without_blocking() {
        let mut rig = Rig::new(3);
        rig.backend.set_auto_complete(false);
        rig.run(rects(1, &[1]));
        rig.run(rects(2, &[1]));

        assert_eq!(rig.exec.poll(&mut rig.backend, &mut rig.cache).unwrap(), 0);
        rig.backend.complete_through(1);
        assert_eq!(rig.exec.poll(&mut rig.backend, &mut rig.cache).unwrap(), 1);
        assert_eq!(rig.exec.slots()[0].state(), SlotState::Idle);
        assert_eq!(rig.exec.slots()[1].state(), SlotState::Submitted);
        assert_eq!(rig.backend.fence_waits(), 0);
    }

    #[test]
    fn removed_resource_outlives_every_frame_that_may_read_it() {
        let mut rig = Rig::new(2);
        rig.run(rects(1, &[1, 2]));
        let gone = rig.cache.entry(2.into()).unwrap().handle();

        // Removed at frame 1; destroyed once frame 1 + D = 3 retires.
        rig.run(rects(2, &[1]));
        rig.run(rects(3, &[1]));
        assert!(rig.backend.is_live(gone));
        rig.run(rects(4, &[1]));
        assert!(rig.backend.is_live(gone));
        rig.run(rects(5, &[1]));
        rig.exec.wait_idle(&mut rig.backend, &mut rig.cache).unwrap();
        assert!(!rig.backend.is_live(gone));
        assert!(rig.backend.violations().is_empty());
    }

    #[test]
    fn abandoned_frame_returns_slot_to_idle() {
        let mut rig = Rig::new(2);
        let slot = rig.exec.begin(&mut rig.backend, &mut rig.cache).unwrap();
        assert_eq!(rig.exec.slots()[slot.index].state(), SlotState::Recording);

        rig.backend.mark_surface_stale();
        assert_eq!(rig.exec.acquire(&mut rig.backend, slot).err(), Some(SurfaceError::Stale));
        rig.exec.abandon(&mut rig.backend, &mut rig.cache, slot, None);
        assert_eq!(rig.exec.slots()[slot.index].state(), SlotState::Idle);
        assert!(rig.backend.submissions().is_empty());
    }

    #[test]
    fn overlay_lands_in_its_slot_and_empty_frames_still_clear() {
        let mut rig = Rig::new(2);
        let tree = rects(1, &[]);
        let changes = reconcile(None, &tree).unwrap();
        let slot = rig.exec.begin(&mut rig.backend, &mut rig.cache).unwrap();
        rig.cache.apply(&changes, slot.frame, &mut rig.backend).unwrap();
        let seq = rig
            .scheduler
            .build(&tree, &changes, rig.cache.view(), true)
            .unwrap();
        let target = rig.exec.acquire(&mut rig.backend, slot).unwrap();

        let mut hud = |_: &HeadlessBackend, _: &HeadlessTarget| HeadlessBuffer::external("hud");
        let buffers = rig
            .exec
            .record(&rig.backend, rig.scheduler.pool(), slot, &target, &seq, Some(&mut hud))
            .unwrap();

        assert_eq!(buffers.len(), seq.batch_count() + 1);
        assert!(matches!(buffers.last(), Some(HeadlessBuffer::External(l)) if l == "hud"));
        assert!(matches!(buffers.first(), Some(HeadlessBuffer::Batch { clears: true, .. })));
    }
}
