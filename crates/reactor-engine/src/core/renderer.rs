use std::time::Instant;

use crate::config::RendererConfig;
use crate::device::GpuBackend;
use crate::error::{AllocError, DeviceError, EngineError, ResourceError, StructuralError, SurfaceError};
use crate::frame::{FrameExecutor, FrameSlot, OverlayFn};
use crate::reconcile::reconcile;
use crate::resources::ResourceCache;
use crate::schedule::{CommandScheduler, CommandSequence};
use crate::tree::SceneTree;

use super::report::{AbandonCause, FrameOutcome, FrameReport, FrameTimings};

/// Top-level frame loop object.
///
/// Owns the previous tree, the last committed command sequence and every
/// stage of the pipeline:
///
/// `tree -> reconcile -> ResourceCache::apply -> CommandScheduler::build -> FrameExecutor`
///
/// Recoverable and structural failures are reported through
/// [`FrameReport::outcome`]. Any `Err` halts the renderer; later calls return
/// [`EngineError::Halted`].
pub struct Renderer<B: GpuBackend> {
    backend: B,
    cache: ResourceCache,
    scheduler: CommandScheduler,
    executor: FrameExecutor<B>,

    previous: Option<SceneTree>,
    committed: CommandSequence,

    config: RendererConfig,
    alloc_failures: u32,
    halted: bool,
    shut_down: bool,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(mut backend: B, config: RendererConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let scheduler = CommandScheduler::new(config.worker_threads, config.coalesce_draws)?;
        let executor = FrameExecutor::new(&mut backend, config.buffering_depth)?;
        log::info!(
            "renderer ready: depth={} workers={} coalesce={}",
            config.buffering_depth,
            scheduler.pool().current_num_threads(),
            config.coalesce_draws
        );
        Ok(Self {
            backend,
            cache: ResourceCache::new(config.buffering_depth),
            scheduler,
            executor,
            previous: None,
            committed: CommandSequence::default(),
            config,
            alloc_failures: 0,
            halted: false,
            shut_down: false,
        })
    }

    /// Runs one frame for `tree`.
    ///
    /// `overlay` records an external buffer that is submitted unmodified after
    /// every tree-derived batch.
    pub fn frame(
        &mut self,
        tree: SceneTree,
        overlay: Option<&mut OverlayFn<'_, B>>,
    ) -> Result<FrameReport, EngineError> {
        if self.halted || self.shut_down {
            return Err(EngineError::Halted);
        }
        let result = self.run(tree, overlay);
        if let Err(e) = &result {
            log::error!("renderer halted: {e}");
            self.halted = true;
        }
        result
    }

    fn run(
        &mut self,
        tree: SceneTree,
        overlay: Option<&mut OverlayFn<'_, B>>,
    ) -> Result<FrameReport, EngineError> {
        let mut timings = FrameTimings::default();
        let tree_frame = tree.frame();

        self.executor.poll(&mut self.backend, &mut self.cache)?;

        let t = Instant::now();
        let diff = reconcile(self.previous.as_ref(), &tree);
        timings.reconcile = t.elapsed();

        let slot = self.executor.begin(&mut self.backend, &mut self.cache)?;

        let changeset = match diff {
            Ok(changeset) => changeset,
            Err(err) => return self.resubmit(slot, tree_frame, err, overlay, timings),
        };

        let t = Instant::now();
        let applied = self
            .cache
            .apply(&changeset, slot.frame, &mut self.backend)
            .map(|_| ());
        timings.apply = t.elapsed();

        match applied {
            Ok(()) => self.alloc_failures = 0,
            Err(ResourceError::Structural(err)) => {
                return self.resubmit(slot, tree_frame, err, overlay, timings);
            }
            Err(ResourceError::Allocation(err)) => {
                self.executor.abandon(&mut self.backend, &mut self.cache, slot, None);
                return self.allocation_failed(slot, tree_frame, err, timings);
            }
        }

        let t = Instant::now();
        let sequence = self
            .scheduler
            .build(&tree, &changeset, self.cache.view(), overlay.is_some())?;
        timings.schedule = t.elapsed();

        log::debug!(
            "frame {} (tree {tree_frame}): {} ops, {} batches, {} draws",
            slot.frame,
            changeset.len(),
            sequence.batch_count(),
            sequence.draw_count()
        );

        // Resource effects are committed from here on, presented or not.
        self.previous = Some(tree);
        self.committed = sequence;

        self.present(
            slot,
            tree_frame,
            changeset.len(),
            FrameOutcome::Presented,
            overlay,
            timings,
        )
    }

    fn resubmit(
        &mut self,
        slot: FrameSlot,
        tree_frame: u64,
        err: StructuralError,
        overlay: Option<&mut OverlayFn<'_, B>>,
        timings: FrameTimings,
    ) -> Result<FrameReport, EngineError> {
        match err.node() {
            Some(node) => log::warn!("tree {tree_frame} rejected at node {node}: {err}"),
            None => log::warn!("tree {tree_frame} rejected: {err}"),
        }
        self.present(slot, tree_frame, 0, FrameOutcome::Resubmitted(err), overlay, timings)
    }

    fn allocation_failed(
        &mut self,
        slot: FrameSlot,
        tree_frame: u64,
        err: AllocError,
        timings: FrameTimings,
    ) -> Result<FrameReport, EngineError> {
        if let AllocError::DeviceLost { what } = err {
            return Err(DeviceError::Lost(format!("while allocating {what}")).into());
        }

        self.alloc_failures += 1;
        if self.alloc_failures > self.config.max_allocation_retries {
            return Err(EngineError::AllocationExhausted {
                attempts: self.alloc_failures,
                source: err,
            });
        }
        log::warn!(
            "allocation failed for tree {tree_frame}, retry {} of {}: {err}",
            self.alloc_failures,
            self.config.max_allocation_retries
        );
        Ok(self.report(
            slot,
            tree_frame,
            FrameOutcome::Abandoned(AbandonCause::Allocation(err)),
            timings,
        ))
    }

    /// Acquires, records and submits the committed sequence in `slot`.
    fn present(
        &mut self,
        slot: FrameSlot,
        tree_frame: u64,
        ops: usize,
        outcome: FrameOutcome,
        overlay: Option<&mut OverlayFn<'_, B>>,
        mut timings: FrameTimings,
    ) -> Result<FrameReport, EngineError> {
        let target = match self.executor.acquire(&mut self.backend, slot) {
            Ok(target) => target,
            Err(SurfaceError::Stale) => {
                self.executor.abandon(&mut self.backend, &mut self.cache, slot, None);
                self.backend.recreate_surface()?;
                log::warn!("surface stale; frame {} abandoned and swapchain recreated", slot.frame);
                return Ok(self.report(
                    slot,
                    tree_frame,
                    FrameOutcome::Abandoned(AbandonCause::StaleSurface),
                    timings,
                ));
            }
            Err(SurfaceError::Timeout) => {
                self.executor.abandon(&mut self.backend, &mut self.cache, slot, None);
                log::debug!("surface acquisition timed out; frame {} skipped", slot.frame);
                return Ok(self.report(slot, tree_frame, FrameOutcome::Skipped, timings));
            }
            Err(err @ SurfaceError::Fatal(_)) => {
                self.executor.abandon(&mut self.backend, &mut self.cache, slot, None);
                return Err(EngineError::Surface(err));
            }
        };

        let t = Instant::now();
        let recorded = self.executor.record(
            &self.backend,
            self.scheduler.pool(),
            slot,
            &target,
            &self.committed,
            overlay,
        );
        timings.record = t.elapsed();
        let buffers = match recorded {
            Ok(buffers) => buffers,
            Err(err) => {
                self.executor
                    .abandon(&mut self.backend, &mut self.cache, slot, Some(target));
                return Err(err.into());
            }
        };

        let t = Instant::now();
        self.executor.submit(&mut self.backend, slot, target, buffers)?;
        self.cache.mark_recorded(&self.committed, slot.frame);
        timings.submit = t.elapsed();

        Ok(FrameReport {
            frame: slot.frame,
            tree_frame,
            outcome,
            ops,
            draws: self.committed.draw_count(),
            batches: self.committed.batch_count(),
            timings,
        })
    }

    fn report(
        &self,
        slot: FrameSlot,
        tree_frame: u64,
        outcome: FrameOutcome,
        timings: FrameTimings,
    ) -> FrameReport {
        FrameReport {
            frame: slot.frame,
            tree_frame,
            outcome,
            ops: 0,
            draws: 0,
            batches: 0,
            timings,
        }
    }

    /// Applies a new drawable size (physical pixels).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
    }

    /// Blocks until every submitted frame has completed and retires them.
    pub fn wait_idle(&mut self) -> Result<(), EngineError> {
        self.executor.wait_idle(&mut self.backend, &mut self.cache)?;
        Ok(())
    }

    /// Waits for the GPU and destroys every resource the cache owns.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let waited = self.executor.wait_idle(&mut self.backend, &mut self.cache);
        let destroyed = self.cache.drain(&mut self.backend);
        self.previous = None;
        self.committed = CommandSequence::default();
        log::info!("renderer shut down; {destroyed} resources destroyed");
        waited.map(|_| ()).map_err(EngineError::from)
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access for backend-specific controls.
    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    #[inline]
    pub fn executor(&self) -> &FrameExecutor<B> {
        &self.executor
    }

    /// Last accepted tree.
    #[inline]
    pub fn previous(&self) -> Option<&SceneTree> {
        self.previous.as_ref()
    }

    /// Sequence presented by the last accepted tree, reused when a tree is
    /// rejected.
    #[inline]
    pub fn committed(&self) -> &CommandSequence {
        &self.committed
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("renderer shutdown on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessBackend;
    use crate::tree::{Color, Node, NodeKind, PropKey, TreeBuilder};

    fn renderer() -> Renderer<HeadlessBackend> {
        Renderer::new(
            HeadlessBackend::new(),
            RendererConfig::default().with_threads(2),
        )
        .unwrap()
    }

    fn one_rect(frame: u64, color: Color) -> SceneTree {
        let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Group));
        let root = b.root();
        b.child(root, Node::new(1, NodeKind::Rect).key(1).prop(PropKey::Color, color));
        b.finish()
    }

    #[test]
    fn rejects_invalid_config() {
        let r = Renderer::new(HeadlessBackend::new(), RendererConfig::default().with_depth(0));
        assert!(matches!(r, Err(EngineError::Config(_))));
    }

    #[test]
    fn first_frame_presents_every_drawable() {
        let mut r = renderer();
        let report = r.frame(one_rect(1, Color::RED), None).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(report.ops, 2);
        assert_eq!(report.draws, 1);
        assert_eq!(r.backend().submissions().len(), 1);
        assert_eq!(r.previous().map(SceneTree::frame), Some(1));
    }

    #[test]
    fn unchanged_tree_reconciles_to_nothing() {
        let mut r = renderer();
        r.frame(one_rect(1, Color::RED), None).unwrap();
        let report = r.frame(one_rect(2, Color::RED), None).unwrap();
        assert_eq!(report.ops, 0);
        assert_eq!(report.draws, 1);
    }

    #[test]
    fn timeout_skips_without_recreating_the_surface() {
        let mut r = renderer();
        r.backend_mut().timeout_next_acquire();
        let report = r.frame(one_rect(1, Color::RED), None).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Skipped);
        assert_eq!(r.backend().recreations(), 0);
        assert!(r.backend().submissions().is_empty());
        // Resource effects were committed.
        assert_eq!(r.cache().live(), 2);
    }

    #[test]
    fn halted_renderer_refuses_frames() {
        let mut r = renderer();
        r.backend_mut().lose_device();
        assert!(r.frame(one_rect(1, Color::RED), None).is_err());
        assert!(r.is_halted());
        assert_eq!(r.frame(one_rect(2, Color::RED), None), Err(EngineError::Halted));
    }

    #[test]
    fn shutdown_destroys_everything_once() {
        let mut r = renderer();
        r.frame(one_rect(1, Color::RED), None).unwrap();
        r.frame(one_rect(2, Color::BLUE), None).unwrap();
        r.shutdown().unwrap();
        assert_eq!(r.backend().live_objects(), 0);
        assert_eq!(r.cache().live(), 0);
        assert!(r.shutdown().is_ok());
        assert_eq!(r.frame(one_rect(3, Color::RED), None), Err(EngineError::Halted));
    }
}
