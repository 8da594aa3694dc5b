//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and windows, each with its own renderer.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
