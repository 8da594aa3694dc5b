//! Command scheduling.
//!
//! Converts the current tree plus its reconciled resources into a
//! [`CommandSequence`]: barriers before first use of fresh objects, parents
//! before children, independent root subtrees in separate batches, and
//! consecutive draws with equal binding state coalesced into one region.

mod command;
mod scheduler;

pub use command::{
    Command, CommandBatch, CommandSequence, PipelineKey, PipelineKind, SequenceItem,
};
pub use scheduler::CommandScheduler;
