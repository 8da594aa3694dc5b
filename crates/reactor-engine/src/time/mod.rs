//! Frame timing for applications animating their trees.
//!
//! One `FrameClock` per window; `tick()` once per redraw.

mod clock;

pub use clock::{FrameClock, FrameTime};
