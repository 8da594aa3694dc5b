//! Tree diffing.
//!
//! [`reconcile`] turns two consecutive authored trees into a [`Changeset`]:
//! keyed children match by key, unkeyed children by position, and reordering
//! is expressed with the fewest moves (members of the longest run of retained
//! children whose relative order is unchanged stay in place).

mod changeset;
mod diff;
mod lis;

pub use changeset::{Changeset, Op};
pub use diff::reconcile;
