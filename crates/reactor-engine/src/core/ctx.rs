use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use crate::device::WgpuBackend;
use crate::frame::OverlayFn;
use crate::time::FrameTime;
use crate::tree::SceneTree;
use crate::window::RuntimeCtx;

use super::app::AppControl;
use super::renderer::Renderer;
use super::report::FrameReport;

/// Per-window handles.
pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl WindowCtx<'_> {
    /// Drawable size in physical pixels; scene coordinates use the same unit.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.window.inner_size()
    }

    pub fn scale_factor(&self) -> f64 {
        self.window.scale_factor()
    }
}

/// Per-frame context passed to `App::on_frame`.
///
/// Lifetimes:
/// - `'a` is the duration of the callback invocation
/// - `'w` is the window borrow carried by `WgpuBackend<'w>`
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    pub renderer: &'a mut Renderer<WgpuBackend<'w>>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
    /// Report of the last `render` call in this callback.
    pub report: Option<FrameReport>,
}

impl<'w> FrameCtx<'_, 'w> {
    /// Reconciles `tree` against the previous one and presents it.
    ///
    /// Recoverable and structural outcomes keep the loop running; a renderer
    /// error asks the runtime to exit.
    pub fn render(&mut self, tree: SceneTree) -> AppControl {
        self.render_inner(tree, None)
    }

    /// Like [`Self::render`], with `overlay` recorded into the frame's overlay
    /// slot after every tree-derived batch.
    pub fn render_with_overlay(
        &mut self,
        tree: SceneTree,
        overlay: &mut OverlayFn<'_, WgpuBackend<'w>>,
    ) -> AppControl {
        self.render_inner(tree, Some(overlay))
    }

    fn render_inner(
        &mut self,
        tree: SceneTree,
        overlay: Option<&mut OverlayFn<'_, WgpuBackend<'w>>>,
    ) -> AppControl {
        self.window.window.pre_present_notify();
        match self.renderer.frame(tree, overlay) {
            Ok(report) => {
                log::trace!("{report:?}");
                self.report = Some(report);
                AppControl::Continue
            }
            Err(e) => {
                log::error!("frame failed: {e}");
                AppControl::Exit
            }
        }
    }
}
