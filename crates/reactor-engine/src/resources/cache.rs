use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{ResourceError, StructuralError};
use crate::reconcile::{Changeset, Op};
use crate::schedule::{Command, CommandSequence};
use crate::tree::{NodeId, NodeKind, Props};

use super::{ResourceAllocator, ResourceDesc, ResourceHandle};

/// Cache-side record of one node's GPU object.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    handle: ResourceHandle,
    kind: NodeKind,
    desc: ResourceDesc,
    props: Props,
    generation: u32,
    last_frame: Option<u64>,
    /// Generation last covered by a submitted barrier.
    recorded_generation: Option<u32>,
}

impl ResourceEntry {
    #[inline]
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[inline]
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    /// Properties as of the last applied changeset.
    #[inline]
    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Bumped exactly when the GPU object is destroyed and recreated.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Last frame whose submitted commands referenced this entry.
    #[inline]
    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    #[inline]
    pub fn needs_barrier(&self) -> bool {
        self.recorded_generation != Some(self.generation)
    }
}

#[derive(Debug, Copy, Clone)]
struct PendingDeletion {
    handle: ResourceHandle,
    node: NodeId,
    destroy_at: u64,
}

/// Owner of every GPU object created for the scene.
///
/// Lifetime rules:
/// - objects are keyed by node id and survive as long as the node does
/// - in-place property changes keep handle and generation
/// - removal and structural replacement defer destruction: an object released
///   while recording frame `F` is destroyed once `retire(F + depth)` runs
#[derive(Debug)]
pub struct ResourceCache {
    depth: u64,
    entries: HashMap<NodeId, ResourceEntry>,
    pending: VecDeque<PendingDeletion>,
    touched: HashSet<NodeId>,
    destroyed: u64,
}

#[derive(Debug, Clone)]
struct Planned {
    kind: NodeKind,
    desc: ResourceDesc,
    props: Props,
    generation: u32,
}

#[derive(Debug)]
enum Step {
    /// New object; replaces the live one for `id` if there is any.
    Create { id: NodeId, planned: Planned },
    Write { id: NodeId, props: Props },
    Release { id: NodeId },
}

impl ResourceCache {
    /// Creates a cache for a pipeline with `depth` frames in flight.
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1) as u64,
            entries: HashMap::new(),
            pending: VecDeque::new(),
            touched: HashSet::new(),
            destroyed: 0,
        }
    }

    /// Applies a changeset while recording frame `frame`.
    ///
    /// All or nothing: a structural problem is reported before any device
    /// work, and a failed allocation releases everything this call allocated.
    pub fn apply(
        &mut self,
        changeset: &Changeset,
        frame: u64,
        alloc: &mut dyn ResourceAllocator,
    ) -> Result<ReconciledResources<'_>, ResourceError> {
        let steps = self.plan(changeset)?;

        let mut created: Vec<Option<ResourceHandle>> = Vec::with_capacity(steps.len());
        for step in &steps {
            let handle = match step {
                Step::Create { id, planned } => {
                    match alloc.create(*id, planned.kind, &planned.desc, &planned.props) {
                        Ok(h) => Some(h),
                        Err(e) => {
                            log::warn!("allocating {} for node {id} failed: {e}", planned.desc);
                            for h in created.into_iter().flatten() {
                                alloc.destroy(h);
                            }
                            return Err(e.into());
                        }
                    }
                }
                _ => None,
            };
            created.push(handle);
        }

        self.touched.clear();
        for (step, handle) in steps.into_iter().zip(created) {
            match step {
                Step::Create { id, planned } => {
                    let Some(handle) = handle else { continue };
                    if let Some(old) = self.entries.remove(&id) {
                        self.defer(id, old.handle, frame);
                    }
                    self.entries.insert(
                        id,
                        ResourceEntry {
                            handle,
                            kind: planned.kind,
                            desc: planned.desc,
                            props: planned.props,
                            generation: planned.generation,
                            last_frame: None,
                            recorded_generation: None,
                        },
                    );
                    self.touched.insert(id);
                }
                Step::Write { id, props } => {
                    if let Some(entry) = self.entries.get_mut(&id) {
                        alloc.write(entry.handle, entry.kind, &entry.desc, &props);
                        entry.props = props;
                        self.touched.insert(id);
                    }
                }
                Step::Release { id } => {
                    if let Some(old) = self.entries.remove(&id) {
                        self.defer(id, old.handle, frame);
                    }
                    self.touched.remove(&id);
                }
            }
        }

        log::debug!(
            "frame {frame}: resources live={} pending={} touched={}",
            self.entries.len(),
            self.pending.len(),
            self.touched.len()
        );
        Ok(self.view())
    }

    /// Validates the changeset against a shadow of the cache and lists the
    /// device steps it implies. Touches nothing.
    fn plan(&self, changeset: &Changeset) -> Result<Vec<Step>, StructuralError> {
        let mut shadow: HashMap<NodeId, Option<Planned>> = HashMap::new();
        let mut released: HashMap<NodeId, u32> = HashMap::new();
        let mut steps = Vec::with_capacity(changeset.len());

        let lookup = |shadow: &HashMap<NodeId, Option<Planned>>, id: NodeId| -> Option<Planned> {
            match shadow.get(&id) {
                Some(s) => s.clone(),
                None => self.entries.get(&id).map(|e| Planned {
                    kind: e.kind,
                    desc: e.desc,
                    props: e.props.clone(),
                    generation: e.generation,
                }),
            }
        };

        for op in changeset {
            match op {
                Op::Insert {
                    id, kind, props, ..
                } => {
                    if lookup(&shadow, *id).is_some() {
                        return Err(StructuralError::AlreadyLive { id: *id });
                    }
                    let planned = Planned {
                        kind: *kind,
                        desc: ResourceDesc::for_node(*kind, props),
                        props: props.clone(),
                        generation: released.get(id).map_or(0, |g| g + 1),
                    };
                    shadow.insert(*id, Some(planned.clone()));
                    steps.push(Step::Create { id: *id, planned });
                }
                Op::Update { id, kind, changed } => {
                    let Some(current) = lookup(&shadow, *id) else {
                        return Err(StructuralError::UnknownTarget { id: *id });
                    };
                    if current.kind != *kind {
                        return Err(StructuralError::IncompatibleUpdate {
                            id: *id,
                            expected: current.kind,
                            found: *kind,
                        });
                    }
                    let mut props = current.props.clone();
                    props.apply(changed);
                    let desc = ResourceDesc::for_node(*kind, &props);

                    if desc == current.desc {
                        shadow.insert(
                            *id,
                            Some(Planned {
                                props: props.clone(),
                                ..current
                            }),
                        );
                        steps.push(Step::Write { id: *id, props });
                    } else {
                        let planned = Planned {
                            kind: *kind,
                            desc,
                            props,
                            generation: current.generation + 1,
                        };
                        shadow.insert(*id, Some(planned.clone()));
                        steps.push(Step::Create { id: *id, planned });
                    }
                }
                Op::Remove { id, .. } => {
                    let Some(current) = lookup(&shadow, *id) else {
                        return Err(StructuralError::UnknownTarget { id: *id });
                    };
                    released.insert(*id, current.generation);
                    shadow.insert(*id, None);
                    steps.push(Step::Release { id: *id });
                }
                Op::Move { id, .. } => {
                    if lookup(&shadow, *id).is_none() {
                        return Err(StructuralError::UnknownTarget { id: *id });
                    }
                }
            }
        }
        Ok(steps)
    }

    fn defer(&mut self, node: NodeId, handle: ResourceHandle, frame: u64) {
        self.pending.push_back(PendingDeletion {
            handle,
            node,
            destroy_at: frame + self.depth,
        });
    }

    /// Called once frame `frame` can no longer be read by the GPU.
    ///
    /// Destroys every pending object whose epoch closed at or before `frame`.
    /// Returns the number of destroyed objects.
    pub fn retire(&mut self, frame: u64, alloc: &mut dyn ResourceAllocator) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| {
            if p.destroy_at <= frame {
                log::trace!("destroying {} of node {} (epoch {})", p.handle, p.node, p.destroy_at);
                alloc.destroy(p.handle);
                false
            } else {
                true
            }
        });
        let n = before - self.pending.len();
        self.destroyed += n as u64;
        if n > 0 {
            log::debug!("retire frame {frame}: destroyed {n} resources");
        }
        n
    }

    /// Records that `sequence` was submitted as frame `frame`.
    pub fn mark_recorded(&mut self, sequence: &CommandSequence, frame: u64) {
        for cmd in sequence.commands() {
            match *cmd {
                Command::Barrier {
                    node,
                    handle,
                    generation,
                } => {
                    if let Some(e) = self.entries.get_mut(&node) {
                        if e.handle == handle && e.generation == generation {
                            e.recorded_generation = Some(generation);
                            e.last_frame = Some(frame);
                        }
                    }
                }
                Command::Setup { node, handle, .. } | Command::Draw { node, handle, .. } => {
                    if let Some(e) = self.entries.get_mut(&node) {
                        if e.handle == handle {
                            e.last_frame = Some(frame);
                        }
                    }
                }
                Command::BindPipeline(_) => {}
            }
        }
    }

    /// Destroys every live and pending object. Used at shutdown, after the
    /// device is idle.
    pub fn drain(&mut self, alloc: &mut dyn ResourceAllocator) -> usize {
        let mut n = 0;
        for p in self.pending.drain(..) {
            alloc.destroy(p.handle);
            n += 1;
        }
        for (_, e) in self.entries.drain() {
            alloc.destroy(e.handle);
            n += 1;
        }
        self.touched.clear();
        self.destroyed += n as u64;
        n
    }

    /// Read-only view for the scheduler and recording workers.
    #[inline]
    pub fn view(&self) -> ReconciledResources<'_> {
        ReconciledResources { cache: self }
    }

    #[inline]
    pub fn depth(&self) -> u64 {
        self.depth
    }

    #[inline]
    pub fn entry(&self, id: NodeId) -> Option<&ResourceEntry> {
        self.entries.get(&id)
    }

    /// Number of live entries.
    #[inline]
    pub fn live(&self) -> usize {
        self.entries.len()
    }

    /// Number of objects awaiting their epoch.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total objects destroyed since creation.
    #[inline]
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }
}

/// Resources as they stand after an `apply`.
///
/// Shared by the scheduler and by every recording worker.
#[derive(Debug, Copy, Clone)]
pub struct ReconciledResources<'c> {
    cache: &'c ResourceCache,
}

impl<'c> ReconciledResources<'c> {
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&'c ResourceEntry> {
        self.cache.entries.get(&id)
    }

    #[inline]
    pub fn handle(&self, id: NodeId) -> Option<ResourceHandle> {
        self.get(id).map(ResourceEntry::handle)
    }

    /// Returns `true` if the object changed generation since its last
    /// submitted barrier (or was never covered by one).
    #[inline]
    pub fn needs_barrier(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(ResourceEntry::needs_barrier)
    }

    /// Returns `true` if the last `apply` created or wrote this object.
    #[inline]
    pub fn touched(&self, id: NodeId) -> bool {
        self.cache.touched.contains(&id)
    }

    pub fn touched_ids(&self) -> impl Iterator<Item = NodeId> + 'c {
        self.cache.touched.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.entries.is_empty()
    }
}
