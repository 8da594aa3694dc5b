//! End-to-end frames over the headless backend.

use reactor_engine::core::{AbandonCause, FrameOutcome, Renderer};
use reactor_engine::device::{HeadlessBackend, HeadlessBuffer, HeadlessTarget};
use reactor_engine::error::{AllocError, EngineError, StructuralError};
use reactor_engine::reconcile::{Op, reconcile};
use reactor_engine::schedule::Command;
use reactor_engine::tree::{Color, Node, NodeId, NodeKind, PropKey, Props, SceneTree, TreeBuilder, Vec2};
use reactor_engine::RendererConfig;

fn renderer(depth: usize) -> Renderer<HeadlessBackend> {
    let config = RendererConfig::default().with_depth(depth).with_threads(4);
    Renderer::new(HeadlessBackend::new(), config).unwrap()
}

/// Root group with keyed rects `(id, color)`; keys equal ids.
fn list(frame: u64, items: &[(u64, Color)]) -> SceneTree {
    let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Group));
    let root = b.root();
    for &(id, color) in items {
        b.child(
            root,
            Node::new(id, NodeKind::Rect)
                .key(id)
                .prop(PropKey::Origin, Vec2::new(id as f32 * 10.0, 0.0))
                .prop(PropKey::Size, Vec2::new(8.0, 8.0))
                .prop(PropKey::Color, color),
        );
    }
    b.finish()
}

fn reds(frame: u64, ids: &[u64]) -> SceneTree {
    let items: Vec<(u64, Color)> = ids.iter().map(|&id| (id, Color::RED)).collect();
    list(frame, &items)
}

fn handle_of(r: &Renderer<HeadlessBackend>, id: u64) -> reactor_engine::resources::ResourceHandle {
    r.cache().entry(NodeId(id)).unwrap().handle()
}

fn drawn_handles(r: &Renderer<HeadlessBackend>) -> Vec<reactor_engine::resources::ResourceHandle> {
    let last = r.backend().last_submission().unwrap();
    last.buffers
        .iter()
        .flat_map(|b| match b {
            HeadlessBuffer::Batch { commands, .. } => commands.clone(),
            HeadlessBuffer::External(_) => Vec::new(),
        })
        .filter_map(|c| match c {
            Command::Draw { handle, .. } => Some(handle),
            _ => None,
        })
        .collect()
}

#[test]
fn color_change_updates_in_place() {
    let before = list(1, &[(1, Color::RED)]);
    let after = list(2, &[(1, Color::BLUE)]);

    let changes = reconcile(Some(&before), &after).unwrap();
    let mut red = Props::new();
    red.set(PropKey::Origin, Vec2::new(10.0, 0.0));
    red.set(PropKey::Size, Vec2::new(8.0, 8.0));
    red.set(PropKey::Color, Color::RED);
    let mut blue = red.clone();
    blue.set(PropKey::Color, Color::BLUE);
    assert_eq!(
        changes.ops(),
        &[Op::Update {
            id: NodeId(1),
            kind: NodeKind::Rect,
            changed: red.diff(&blue),
        }]
    );

    let mut r = renderer(3);
    r.frame(before, None).unwrap();
    let handle = handle_of(&r, 1);
    let generation = r.cache().entry(NodeId(1)).unwrap().generation();

    let report = r.frame(after, None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Presented);
    assert_eq!(report.ops, 1);
    assert_eq!(handle_of(&r, 1), handle);
    assert_eq!(r.cache().entry(NodeId(1)).unwrap().generation(), generation);
    assert_eq!(drawn_handles(&r), vec![handle]);
    assert_eq!(r.backend().object(handle).unwrap().writes, 1);
}

#[test]
fn swapping_two_keyed_siblings_is_one_move() {
    let before = reds(1, &[1, 2, 3]);
    let after = reds(2, &[2, 1, 3]);

    let changes = reconcile(Some(&before), &after).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes.moves(), 1);

    let mut r = renderer(3);
    r.frame(before, None).unwrap();
    let handles: Vec<_> = [1, 2, 3].iter().map(|&id| handle_of(&r, id)).collect();

    r.frame(after, None).unwrap();
    let again: Vec<_> = [1, 2, 3].iter().map(|&id| handle_of(&r, id)).collect();
    assert_eq!(handles, again);

    // Draw order follows the new tree order.
    assert_eq!(drawn_handles(&r), vec![handles[1], handles[0], handles[2]]);
}

#[test]
fn duplicate_key_resubmits_the_previous_sequence() {
    let mut r = renderer(3);
    r.frame(reds(1, &[1, 2]), None).unwrap();

    let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
    let root = b.root();
    b.child(root, Node::new(1, NodeKind::Rect).key(7));
    b.child(root, Node::new(2, NodeKind::Rect).key(7));
    let report = r.frame(b.finish(), None).unwrap();

    match &report.outcome {
        FrameOutcome::Resubmitted(err @ StructuralError::DuplicateKey { .. }) => {
            assert_eq!(err.node(), Some(NodeId(0)));
        }
        other => panic!("expected a resubmission, got {other:?}"),
    }

    let subs = r.backend().submissions();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[1].buffers, subs[0].buffers);

    // The rejected tree never became the previous one.
    assert_eq!(r.previous().map(SceneTree::frame), Some(1));
    let next = r.frame(reds(3, &[1, 2, 3]), None).unwrap();
    assert_eq!(next.outcome, FrameOutcome::Presented);
    assert_eq!(next.ops, 1);
}

#[test]
fn removed_resources_survive_until_their_epoch_closes() {
    let depth = 2;
    let mut r = renderer(depth);
    r.backend_mut().set_auto_complete(false);

    r.frame(reds(1, &[1, 2, 3]), None).unwrap();
    let gone = handle_of(&r, 3);

    let removed_at = r.frame(reds(2, &[1, 2]), None).unwrap().frame;
    assert_eq!(r.cache().pending(), 1);

    let mut tree = 3;
    while r.executor().next_frame() <= removed_at + depth as u64 {
        r.frame(reds(tree, &[1, 2]), None).unwrap();
        tree += 1;
        assert!(r.backend().is_live(gone), "destroyed before frame {} retired", removed_at + depth as u64);
    }

    r.wait_idle().unwrap();
    assert!(!r.backend().is_live(gone));
    assert_eq!(r.cache().pending(), 0);
    assert!(r.backend().violations().is_empty());
}

#[test]
fn churn_never_reads_a_destroyed_resource() {
    let mut r = renderer(3);
    r.backend_mut().set_auto_complete(false);

    for frame in 1..=40u64 {
        let ids: Vec<u64> = (1..=12).filter(|id| (id + frame) % 3 != 0).collect();
        let items: Vec<(u64, Color)> = ids
            .iter()
            .map(|&id| (id, if frame % 2 == 0 { Color::RED } else { Color::GREEN }))
            .collect();
        let report = r.frame(list(frame, &items), None).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert!(r.executor().in_flight() <= 3);
        if frame % 5 == 0 {
            r.backend_mut().complete_all();
        }
    }

    r.shutdown().unwrap();
    assert!(r.backend().violations().is_empty());
    assert_eq!(r.backend().live_objects(), 0);
}

#[test]
fn backpressure_blocks_only_when_a_slot_is_reused_in_flight() {
    let mut r = renderer(3);
    r.backend_mut().set_auto_complete(false);

    for frame in 1..=3 {
        r.frame(reds(frame, &[1]), None).unwrap();
    }
    assert_eq!(r.backend().fence_waits(), 0);
    assert_eq!(r.executor().in_flight(), 3);

    r.frame(reds(4, &[1]), None).unwrap();
    assert_eq!(r.backend().fence_waits(), 1);

    r.backend_mut().complete_all();
    r.frame(reds(5, &[1]), None).unwrap();
    assert_eq!(r.backend().fence_waits(), 1);
}

#[test]
fn reclaiming_a_slot_leaves_later_frames_in_flight() {
    let mut r = renderer(3);
    r.backend_mut().set_auto_complete(false);

    for frame in 1..=3 {
        r.frame(reds(frame, &[1]), None).unwrap();
    }
    assert_eq!(r.backend().in_flight(), 3);

    // Frame 4 reuses the first slot: only its submission is waited for.
    r.frame(reds(4, &[1]), None).unwrap();
    assert_eq!(r.backend().fence_waits(), 1);
    assert_eq!(r.backend().in_flight(), 3);
}

#[test]
fn stale_surface_abandons_after_committing_resources() {
    let mut r = renderer(3);
    r.frame(reds(1, &[1]), None).unwrap();

    r.backend_mut().mark_surface_stale();
    let report = r.frame(reds(2, &[1, 2]), None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Abandoned(AbandonCause::StaleSurface));
    assert_eq!(r.backend().recreations(), 1);
    assert_eq!(r.backend().submissions().len(), 1);

    // Node 2's resource exists and the tree was committed.
    assert!(r.cache().entry(NodeId(2)).is_some());
    assert_eq!(r.previous().map(SceneTree::frame), Some(2));

    let report = r.frame(reds(3, &[1, 2]), None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Presented);
    assert_eq!(report.ops, 0);
    assert_eq!(report.draws, 2);
}

#[test]
fn transient_allocation_failure_is_retried_next_frame() {
    let mut r = renderer(3);
    r.backend_mut().fail_next_allocations(1);

    let report = r.frame(reds(1, &[1, 2]), None).unwrap();
    assert!(matches!(
        report.outcome,
        FrameOutcome::Abandoned(AbandonCause::Allocation(_))
    ));
    assert_eq!(r.cache().live(), 0);
    assert_eq!(r.backend().live_objects(), 0);
    assert!(r.previous().is_none());

    let report = r.frame(reds(2, &[1, 2]), None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Presented);
    assert_eq!(report.draws, 2);
}

#[test]
fn sustained_allocation_failure_is_fatal() {
    let mut r = renderer(3);
    r.backend_mut().fail_next_allocations(u32::MAX);
    let retries = r.config().max_allocation_retries;

    for frame in 1..=u64::from(retries) {
        assert!(r.frame(reds(frame, &[1]), None).is_ok());
    }
    let err = r.frame(reds(u64::from(retries) + 1, &[1]), None).unwrap_err();
    assert!(matches!(err, EngineError::AllocationExhausted { attempts, .. } if attempts == retries + 1));
    assert_eq!(r.frame(reds(99, &[1]), None), Err(EngineError::Halted));
}

#[test]
fn every_configured_retry_is_taken_before_giving_up() {
    let mut r = renderer(3);
    let retries = r.config().max_allocation_retries;
    r.backend_mut().fail_next_allocations(retries);

    for frame in 1..=u64::from(retries) {
        let report = r.frame(reds(frame, &[1]), None).unwrap();
        assert!(matches!(
            report.outcome,
            FrameOutcome::Abandoned(AbandonCause::Allocation(AllocError::OutOfMemory { .. }))
        ));
    }

    let report = r.frame(reds(u64::from(retries) + 1, &[1]), None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Presented);
    assert!(!r.is_halted());
}

#[test]
fn zero_retries_makes_the_first_allocation_failure_fatal() {
    let mut config = RendererConfig::default().with_depth(2);
    config.max_allocation_retries = 0;
    let mut r = Renderer::new(HeadlessBackend::new(), config).unwrap();
    r.backend_mut().fail_next_allocations(1);

    let err = r.frame(reds(1, &[1]), None).unwrap_err();
    assert!(matches!(err, EngineError::AllocationExhausted { attempts: 1, .. }));
}

/// Root group holding one `width` x `height` texture node.
fn textured(frame: u64, width: u32, height: u32) -> SceneTree {
    let mut b = TreeBuilder::new(frame, Node::new(0, NodeKind::Group));
    let root = b.root();
    b.child(
        root,
        Node::new(1, NodeKind::Texture)
            .prop(PropKey::Width, width)
            .prop(PropKey::Height, height)
            .prop(PropKey::Color, Color::RED),
    );
    b.finish()
}

#[test]
fn oversized_texture_abandons_the_frame_instead_of_aborting() {
    let mut r = renderer(2);
    r.backend_mut().set_max_texture_dimension(64);

    let report = r.frame(textured(1, 65, 8), None).unwrap();
    assert!(matches!(
        report.outcome,
        FrameOutcome::Abandoned(AbandonCause::Allocation(AllocError::ExceedsLimits { limit: 64, .. }))
    ));
    assert_eq!(r.cache().live(), 0);
    assert_eq!(r.backend().live_objects(), 0);
    assert!(r.previous().is_none());

    let report = r.frame(textured(2, 64, 8), None).unwrap();
    assert_eq!(report.outcome, FrameOutcome::Presented);
    assert!(r.cache().entry(NodeId(1)).is_some());
}

#[test]
fn device_loss_halts_the_renderer() {
    let mut r = renderer(2);
    r.frame(reds(1, &[1]), None).unwrap();
    r.backend_mut().lose_device();

    let err = r.frame(reds(2, &[1]), None).unwrap_err();
    assert!(matches!(err, EngineError::Device(_)));
    assert!(r.is_halted());
    assert_eq!(r.frame(reds(3, &[1]), None), Err(EngineError::Halted));
}

#[test]
fn overlay_is_submitted_after_tree_batches() {
    let mut r = renderer(2);
    let mut hud = |_: &HeadlessBackend, _: &HeadlessTarget| HeadlessBuffer::external("hud");

    r.frame(reds(1, &[1, 2]), Some(&mut hud)).unwrap();
    let last = r.backend().last_submission().unwrap();
    assert_eq!(last.buffers.last(), Some(&HeadlessBuffer::external("hud")));
    assert_eq!(last.draws(), 2);

    // A rejected tree still gets the overlay.
    let mut b = TreeBuilder::new(2, Node::new(0, NodeKind::Group));
    let root = b.root();
    b.link(root, NodeId(0));
    let report = r.frame(b.finish(), Some(&mut hud)).unwrap();
    assert!(matches!(report.outcome, FrameOutcome::Resubmitted(_)));
    let last = r.backend().last_submission().unwrap();
    assert_eq!(last.buffers.last(), Some(&HeadlessBuffer::external("hud")));
}
