//! GPU device seam and its backends.
//!
//! This module is responsible for:
//! - the [`GpuBackend`] contract the frame executor drives
//! - the wgpu backend (device, surface, pipelines, node objects)
//! - a headless backend that records submissions for tests and tools

mod backend;
mod gpu;
mod headless;
mod init;
mod pipelines;
mod surface;

pub use backend::GpuBackend;
pub use gpu::{WgpuBackend, WgpuFence, WgpuSlot, WgpuTarget};
pub use headless::{
    HeadlessBackend, HeadlessBuffer, HeadlessFence, HeadlessObject, HeadlessSlot, HeadlessTarget,
    Submission,
};
pub use init::GpuInit;
