use crate::resources::ResourceHandle;
use crate::tree::{NodeId, NodeKind};

/// Pipeline family of a drawable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PipelineKind {
    /// Instanced unit quad (`Rect`, `Sprite`).
    Quad,
    /// Triangle fan over a vertex buffer (`Mesh`).
    Mesh,
}

/// Binding state a draw needs.
///
/// Consecutive draws with equal keys share one state region.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineKey {
    pub pipeline: PipelineKind,
    /// Texture sampled by a `Sprite`.
    pub texture: Option<ResourceHandle>,
    /// Uniform of the nearest enclosing `Group` or `Camera`.
    pub scope: Option<ResourceHandle>,
}

/// One recorded GPU command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    /// Resource transition for an object whose generation has not yet been
    /// covered by a submitted barrier.
    Barrier {
        node: NodeId,
        handle: ResourceHandle,
        generation: u32,
    },
    /// Per-frame setup of a non-drawable node (scope uniforms, textures).
    Setup {
        node: NodeId,
        kind: NodeKind,
        handle: ResourceHandle,
    },
    /// Opens a state region; following draws use this binding state.
    BindPipeline(PipelineKey),
    Draw {
        node: NodeId,
        kind: NodeKind,
        handle: ResourceHandle,
        pipeline: PipelineKey,
    },
}

impl Command {
    /// Handle this command reads, if any.
    #[inline]
    pub fn handle(&self) -> Option<ResourceHandle> {
        match *self {
            Command::Barrier { handle, .. }
            | Command::Setup { handle, .. }
            | Command::Draw { handle, .. } => Some(handle),
            Command::BindPipeline(_) => None,
        }
    }
}

/// Commands for a run of consecutive root subtrees, recordable on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandBatch {
    commands: Vec<Command>,
    draws: usize,
}

impl CommandBatch {
    pub(crate) fn push(&mut self, cmd: Command) {
        if matches!(cmd, Command::Draw { .. }) {
            self.draws += 1;
        }
        self.commands.push(cmd);
    }

    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[inline]
    pub fn draws(&self) -> usize {
        self.draws
    }

    pub fn barriers(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Barrier { .. }))
            .count()
    }

    /// Number of state regions (`BindPipeline` commands).
    pub fn regions(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::BindPipeline(_)))
            .count()
    }
}

/// Position in the primary sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceItem {
    Batch(CommandBatch),
    /// Reserved for an externally recorded overlay buffer.
    Overlay,
}

/// Ordered primary sequence of one frame: tree-derived batches in tree order,
/// optionally followed by the overlay slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSequence {
    frame: u64,
    items: Vec<SequenceItem>,
}

impl CommandSequence {
    pub(crate) fn new(frame: u64, items: Vec<SequenceItem>) -> Self {
        Self { frame, items }
    }

    /// Frame counter of the tree the sequence was built from.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn items(&self) -> &[SequenceItem] {
        &self.items
    }

    pub fn batches(&self) -> impl Iterator<Item = &CommandBatch> {
        self.items.iter().filter_map(|item| match item {
            SequenceItem::Batch(b) => Some(b),
            SequenceItem::Overlay => None,
        })
    }

    pub fn batch_count(&self) -> usize {
        self.batches().count()
    }

    /// Position of the overlay slot among the items, if reserved.
    pub fn overlay_slot(&self) -> Option<usize> {
        self.items
            .iter()
            .position(|item| matches!(item, SequenceItem::Overlay))
    }

    /// All commands in submission order, overlay excluded.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.batches().flat_map(|b| b.commands().iter())
    }

    pub fn draw_count(&self) -> usize {
        self.batches().map(CommandBatch::draws).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
