//! Reactor engine crate.
//!
//! Turns successive declarative scene trees into GPU work: the reconciler
//! diffs trees into changesets, the resource cache maps them onto long-lived
//! GPU objects with epoch-deferred destruction, the scheduler orders the
//! result into parallel-recordable batches and the frame executor submits
//! them against a multi-buffered surface.

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod frame;
pub mod logging;
pub mod reconcile;
pub mod resources;
pub mod schedule;
pub mod time;
pub mod tree;
pub mod window;

pub use config::RendererConfig;
pub use core::{FrameOutcome, FrameReport, Renderer};
pub use error::{EngineError, ErrorKind, StructuralError};
