use std::time::Duration;

use crate::error::{AllocError, StructuralError};

/// Why a frame was dropped after its slot was claimed.
#[derive(Debug, Clone, PartialEq)]
pub enum AbandonCause {
    /// The swapchain no longer matched the surface; it has been recreated.
    StaleSurface,
    /// Resource allocation failed; the tree is retried next frame.
    Allocation(AllocError),
}

/// What happened to one call of `Renderer::frame`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The tree was reconciled, recorded and presented.
    Presented,
    /// The tree was rejected; the last committed sequence was presented again.
    Resubmitted(StructuralError),
    /// Nothing was submitted.
    Abandoned(AbandonCause),
    /// The surface image was not available in time. Nothing was submitted.
    Skipped,
}

impl FrameOutcome {
    #[inline]
    pub fn submitted(&self) -> bool {
        matches!(self, FrameOutcome::Presented | FrameOutcome::Resubmitted(_))
    }
}

/// Wall-clock cost of each stage of one frame.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct FrameTimings {
    pub reconcile: Duration,
    pub apply: Duration,
    pub schedule: Duration,
    pub record: Duration,
    pub submit: Duration,
}

impl FrameTimings {
    pub fn total(&self) -> Duration {
        self.reconcile + self.apply + self.schedule + self.record + self.submit
    }
}

/// Summary returned by `Renderer::frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Executor frame index (also the resource epoch).
    pub frame: u64,
    /// Author-supplied counter of the tree passed in.
    pub tree_frame: u64,
    pub outcome: FrameOutcome,
    /// Changeset length; zero unless the tree was accepted.
    pub ops: usize,
    /// Draws submitted this frame.
    pub draws: usize,
    /// Tree-derived batches submitted this frame.
    pub batches: usize,
    pub timings: FrameTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_presented_and_resubmitted_frames_submit() {
        assert!(FrameOutcome::Presented.submitted());
        assert!(
            FrameOutcome::Resubmitted(StructuralError::NonMonotonicFrame {
                previous: 2,
                current: 1
            })
            .submitted()
        );
        assert!(!FrameOutcome::Skipped.submitted());
        assert!(!FrameOutcome::Abandoned(AbandonCause::StaleSurface).submitted());
    }

    #[test]
    fn total_sums_stages() {
        let t = FrameTimings {
            reconcile: Duration::from_micros(10),
            apply: Duration::from_micros(20),
            schedule: Duration::from_micros(30),
            record: Duration::from_micros(40),
            submit: Duration::from_micros(50),
        };
        assert_eq!(t.total(), Duration::from_micros(150));
    }
}
