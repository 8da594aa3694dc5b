//! Engine-facing contracts and the top-level frame loop.
//!
//! [`Renderer`] owns the reconciliation pipeline for one surface; [`App`] and
//! [`FrameCtx`] are the interface the window runtime offers to applications.

mod app;
mod ctx;
mod renderer;
mod report;

pub use app::{App, AppControl};
pub use ctx::{FrameCtx, WindowCtx};
pub use renderer::Renderer;
pub use report::{AbandonCause, FrameOutcome, FrameReport, FrameTimings};
