use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::EngineError;
use crate::reconcile::{Changeset, Op};
use crate::resources::{ReconciledResources, ResourceHandle};
use crate::tree::{Node, NodeId, NodeKind, PropKey, SceneTree, TreeIndex};

use super::{Command, CommandBatch, CommandSequence, PipelineKey, PipelineKind, SequenceItem};

/// Turns a reconciled tree into an ordered, parallel-recordable command
/// sequence.
///
/// Batching rules:
/// - the root's own commands form the prologue batch
/// - each child subtree of the root is a candidate batch
/// - a hazard (object written by this changeset or awaiting a barrier) that is
///   referenced from several subtrees merges every subtree between its first
///   and last reference into one batch
///
/// Batches are built on the worker pool and kept in tree order.
pub struct CommandScheduler {
    pool: Arc<rayon::ThreadPool>,
    coalesce: bool,
}

impl CommandScheduler {
    /// `threads`: `None` uses the rayon default; `Some(0)` is rejected.
    pub fn new(threads: Option<usize>, coalesce: bool) -> Result<Self, EngineError> {
        Ok(Self {
            pool: Arc::new(build_thread_pool(threads)?),
            coalesce,
        })
    }

    /// Worker pool shared with the frame executor for parallel recording.
    #[inline]
    pub fn pool(&self) -> &Arc<rayon::ThreadPool> {
        &self.pool
    }

    #[inline]
    pub fn coalesces(&self) -> bool {
        self.coalesce
    }

    pub fn build(
        &self,
        tree: &SceneTree,
        changeset: &Changeset,
        resources: ReconciledResources<'_>,
        overlay: bool,
    ) -> Result<CommandSequence, EngineError> {
        let index = TreeIndex::build(tree).map_err(|e| EngineError::Schedule(e.to_string()))?;
        let root = index.root();

        let written: HashSet<NodeId> = changeset
            .iter()
            .filter_map(|op| match op {
                Op::Insert { id, .. } | Op::Update { id, .. } => Some(*id),
                Op::Remove { .. } | Op::Move { .. } => None,
            })
            .collect();
        let hazard = |id: NodeId| written.contains(&id) || resources.needs_barrier(id);

        let subtrees: Vec<&Node> = index.children(root.id).collect();
        let groups = group_subtrees(&index, &subtrees, &hazard);

        let writer = Writer {
            index: &index,
            resources,
            coalesce: self.coalesce,
        };

        let mut prologue = BatchState::new(HashSet::new());
        writer.node(root, None, &mut prologue)?;
        let root_scope = scope_of(root, &resources);
        let prologue_barriers = prologue.barriered.clone();

        let built: Vec<Result<CommandBatch, EngineError>> = self.pool.install(|| {
            groups
                .par_iter()
                .map(|range| -> Result<CommandBatch, EngineError> {
                    let mut state = BatchState::new(prologue_barriers.clone());
                    for child in &subtrees[range.0..=range.1] {
                        writer.subtree(child, root_scope, &mut state)?;
                    }
                    Ok(state.batch)
                })
                .collect()
        });

        let mut items = Vec::with_capacity(built.len() + 2);
        if !prologue.batch.is_empty() {
            items.push(SequenceItem::Batch(prologue.batch));
        }
        for batch in built {
            items.push(SequenceItem::Batch(batch?));
        }
        if overlay {
            items.push(SequenceItem::Overlay);
        }

        let sequence = CommandSequence::new(tree.frame(), items);
        log::debug!(
            "schedule frame {}: {} batches from {} subtrees, {} draws",
            tree.frame(),
            sequence.batch_count(),
            subtrees.len(),
            sequence.draw_count()
        );
        Ok(sequence)
    }
}

/// Groups root subtrees into inclusive index ranges.
fn group_subtrees(
    index: &TreeIndex<'_>,
    subtrees: &[&Node],
    hazard: &dyn Fn(NodeId) -> bool,
) -> Vec<(usize, usize)> {
    if subtrees.is_empty() {
        return Vec::new();
    }

    // Owning subtree of every node below the root.
    let mut owner: HashMap<NodeId, usize> = HashMap::new();
    let mut refs: Vec<(usize, NodeId)> = Vec::new();
    for (i, child) in subtrees.iter().enumerate() {
        let mut stack = vec![*child];
        while let Some(node) = stack.pop() {
            owner.insert(node.id, i);
            if let Some(target) = node.props.node(PropKey::Texture) {
                refs.push((i, target));
            }
            stack.extend(index.children(node.id));
        }
    }

    // reach[i] = last subtree index that must share a batch with subtree i.
    let mut reach: Vec<usize> = (0..subtrees.len()).collect();
    for (user, target) in refs {
        let Some(&home) = owner.get(&target) else { continue };
        if home == user || !hazard(target) {
            continue;
        }
        let (lo, hi) = (home.min(user), home.max(user));
        reach[lo] = reach[lo].max(hi);
    }

    let mut groups = Vec::new();
    let mut start = 0;
    let mut end = reach[0];
    for (i, &r) in reach.iter().enumerate().skip(1) {
        if i > end {
            groups.push((start, end));
            start = i;
            end = r;
        } else {
            end = end.max(r);
        }
    }
    groups.push((start, end));
    groups
}

fn scope_of(node: &Node, resources: &ReconciledResources<'_>) -> Option<ResourceHandle> {
    if node.kind.is_scope() {
        resources.handle(node.id)
    } else {
        None
    }
}

struct BatchState {
    batch: CommandBatch,
    /// Handles already covered by a barrier earlier in the sequence.
    barriered: HashSet<ResourceHandle>,
    bound: Option<PipelineKey>,
}

impl BatchState {
    fn new(barriered: HashSet<ResourceHandle>) -> Self {
        Self {
            batch: CommandBatch::default(),
            barriered,
            bound: None,
        }
    }
}

struct Writer<'a, 'c> {
    index: &'a TreeIndex<'a>,
    resources: ReconciledResources<'c>,
    coalesce: bool,
}

impl Writer<'_, '_> {
    fn subtree(
        &self,
        node: &Node,
        scope: Option<ResourceHandle>,
        state: &mut BatchState,
    ) -> Result<(), EngineError> {
        self.node(node, scope, state)?;
        let scope = scope_of(node, &self.resources).or(scope);
        for child in self.index.children(node.id) {
            self.subtree(child, scope, state)?;
        }
        Ok(())
    }

    /// Emits the commands of `node` alone.
    fn node(
        &self,
        node: &Node,
        scope: Option<ResourceHandle>,
        state: &mut BatchState,
    ) -> Result<(), EngineError> {
        let handle = self.resource(node.id)?;
        self.barrier(node.id, state);

        if !node.kind.is_drawable() {
            state.batch.push(Command::Setup {
                node: node.id,
                kind: node.kind,
                handle,
            });
            return Ok(());
        }

        let (pipeline, texture) = match node.kind {
            NodeKind::Mesh => (PipelineKind::Mesh, None),
            NodeKind::Sprite => match node.props.node(PropKey::Texture) {
                Some(target) => {
                    self.barrier(target, state);
                    (PipelineKind::Quad, Some(self.resource(target)?))
                }
                None => (PipelineKind::Quad, None),
            },
            _ => (PipelineKind::Quad, None),
        };
        let key = PipelineKey {
            pipeline,
            texture,
            scope,
        };

        if !self.coalesce || state.bound != Some(key) {
            state.batch.push(Command::BindPipeline(key));
            state.bound = Some(key);
        }
        state.batch.push(Command::Draw {
            node: node.id,
            kind: node.kind,
            handle,
            pipeline: key,
        });
        Ok(())
    }

    fn barrier(&self, id: NodeId, state: &mut BatchState) {
        let Some(entry) = self.resources.get(id) else { return };
        if entry.needs_barrier() && state.barriered.insert(entry.handle()) {
            state.batch.push(Command::Barrier {
                node: id,
                handle: entry.handle(),
                generation: entry.generation(),
            });
        }
    }

    fn resource(&self, id: NodeId) -> Result<ResourceHandle, EngineError> {
        self.resources
            .handle(id)
            .ok_or_else(|| EngineError::Schedule(format!("node {id} has no reconciled resource")))
    }
}

fn build_thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, EngineError> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(EngineError::Config(
            "worker_threads must be >= 1 when set".to_string(),
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("reactor-record-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| EngineError::Config(format!("failed to build rayon thread pool: {e}")))
}
