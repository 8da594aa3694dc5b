//! Error types shared by the reconciliation core and the backends.
//!
//! Errors fall into three kinds (see [`ErrorKind`]):
//! - recoverable: handled inside the renderer, the frame is skipped or abandoned
//! - structural: the authored tree is rejected for one frame
//! - fatal: the renderer halts until it is rebuilt

use crate::tree::{Key, NodeId, NodeKind, PropKey};

/// Handling class of an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    Recoverable,
    Structural,
    Fatal,
}

/// The authored tree (or the changeset derived from it) is malformed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("node id {id} appears more than once in the tree")]
    DuplicateId { id: NodeId },

    #[error("key {key} appears more than once among the children of {parent}")]
    DuplicateKey { parent: NodeId, key: Key },

    #[error("node {id} is its own ancestor")]
    Cycle { id: NodeId },

    #[error("node {parent} lists child {child} which is not in the tree")]
    MissingChild { parent: NodeId, child: NodeId },

    #[error("{kind} node {id} does not accept property `{prop}`")]
    IncompatibleProperty { id: NodeId, kind: NodeKind, prop: PropKey },

    #[error("property `{prop}` of node {id} holds a {found} value")]
    InvalidPropertyValue { id: NodeId, prop: PropKey, found: &'static str },

    #[error("property `{prop}` of node {id} references {target}, which is not a reachable Texture")]
    BadReference { id: NodeId, prop: PropKey, target: NodeId },

    #[error("frame counter went from {previous} to {current}; it must increase")]
    NonMonotonicFrame { previous: u64, current: u64 },

    #[error("update targets {found} node {id} but its resource was built for {expected}")]
    IncompatibleUpdate { id: NodeId, expected: NodeKind, found: NodeKind },

    #[error("operation targets node {id} which has no live resource")]
    UnknownTarget { id: NodeId },

    #[error("insert of node {id} which already has a live resource")]
    AlreadyLive { id: NodeId },
}

impl StructuralError {
    /// The node the diagnostic is about.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            StructuralError::DuplicateId { id }
            | StructuralError::Cycle { id }
            | StructuralError::IncompatibleProperty { id, .. }
            | StructuralError::InvalidPropertyValue { id, .. }
            | StructuralError::BadReference { id, .. }
            | StructuralError::IncompatibleUpdate { id, .. }
            | StructuralError::UnknownTarget { id }
            | StructuralError::AlreadyLive { id } => Some(*id),
            StructuralError::DuplicateKey { parent, .. } => Some(*parent),
            StructuralError::MissingChild { child, .. } => Some(*child),
            StructuralError::NonMonotonicFrame { .. } => None,
        }
    }
}

/// A GPU object could not be allocated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("out of device memory allocating {what}")]
    OutOfMemory { what: String },

    #[error("device lost while allocating {what}")]
    DeviceLost { what: String },

    #[error("{what} exceeds the device limit of {limit} texels per side")]
    ExceedsLimits { what: String, limit: u32 },
}

/// Failure reported by the resource cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Allocation(#[from] AllocError),
}

/// Device-level failure during recording, submission or synchronization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("device lost: {0}")]
    Lost(String),

    #[error("command references a destroyed resource {0}")]
    DestroyedHandle(u64),

    #[error("device error: {0}")]
    Other(String),
}

/// Outcome of acquiring the presentable surface image.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SurfaceError {
    /// Swapchain no longer matches the surface; recreate it.
    #[error("surface is out of date")]
    Stale,

    /// Transient; skip this frame.
    #[error("timed out acquiring the surface image")]
    Timeout,

    #[error("surface acquisition failed fatally: {0}")]
    Fatal(String),
}

/// Errors returned by [`crate::core::Renderer`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    #[error("allocation failed {attempts} frames in a row: {source}")]
    AllocationExhausted { attempts: u32, source: AllocError },

    #[error("surface failure: {0}")]
    Surface(SurfaceError),

    #[error("scheduling failed: {0}")]
    Schedule(String),

    #[error("renderer halted after a fatal error; rebuild it to continue")]
    Halted,
}

impl EngineError {
    /// Every error the renderer returns stops it; recoverable and structural
    /// failures are reported through `FrameReport` instead.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}

impl SurfaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SurfaceError::Stale | SurfaceError::Timeout => ErrorKind::Recoverable,
            SurfaceError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl ResourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResourceError::Structural(_) => ErrorKind::Structural,
            ResourceError::Allocation(AllocError::OutOfMemory { .. }) => ErrorKind::Recoverable,
            ResourceError::Allocation(AllocError::DeviceLost { .. }) => ErrorKind::Fatal,
        }
    }
}
