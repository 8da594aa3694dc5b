use crate::device::GpuBackend;

/// Lifecycle of one frame slot.
///
/// `Idle -> Recording -> Submitted -> Complete -> Idle`; an abandoned frame
/// goes straight from `Recording` back to `Idle`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

/// One of the D ring-buffered frame slots.
pub struct FrameContext<B: GpuBackend> {
    pub(super) sync: B::SlotSync,
    pub(super) fence: Option<B::Fence>,
    pub(super) state: SlotState,
    /// Frame index currently (or last) held by the slot.
    pub(super) occupant: Option<u64>,
}

impl<B: GpuBackend> FrameContext<B> {
    pub(super) fn new(sync: B::SlotSync) -> Self {
        Self {
            sync,
            fence: None,
            state: SlotState::Idle,
            occupant: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn occupant(&self) -> Option<u64> {
        self.occupant
    }

    #[inline]
    pub fn sync(&self) -> &B::SlotSync {
        &self.sync
    }
}

/// Token for the slot handed out by `FrameExecutor::begin`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameSlot {
    pub index: usize,
    pub frame: u64,
}
