//! Multi-buffered frame slots: backpressure, fences, submission and
//! abandonment of frames whose surface went stale.

mod context;
mod executor;

pub use context::{FrameContext, FrameSlot, SlotState};
pub use executor::{FrameExecutor, OverlayFn};
