//! GPU resource ownership.
//!
//! The [`ResourceCache`] maps node ids to GPU objects created through a
//! [`ResourceAllocator`], mutates them in place where possible, and defers
//! destruction until no in-flight frame can still read them.

mod cache;
mod desc;

pub use cache::{ReconciledResources, ResourceCache, ResourceEntry};
pub use desc::{ResourceAllocator, ResourceDesc, ResourceHandle};
