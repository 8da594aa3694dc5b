use anyhow::Result;
use reactor_engine::RendererConfig;
use reactor_engine::core::{App, AppControl, FrameCtx, FrameOutcome};
use reactor_engine::device::GpuInit;
use reactor_engine::logging::{LoggingConfig, init_logging};
use reactor_engine::tree::{Color, Node, NodeId, NodeKind, PropKey, SceneTree, TextureFormat, TreeBuilder, Vec2};
use reactor_engine::window::{Runtime, RuntimeConfig};

const CARDS: u64 = 24;
const CARD: f32 = 36.0;
const GAP: f32 = 8.0;

/// Ids below 100 are fixed nodes; cards use 100 + key.
mod ids {
    pub const ROOT: u64 = 0;
    pub const CAMERA: u64 = 1;
    pub const DECK: u64 = 2;
    pub const CHECKER: u64 = 3;
    pub const BANNER: u64 = 4;
    pub const WAVE: u64 = 5;
    pub const CARD_BASE: u64 = 100;
}

/// Keyed deck of cards that rotates one position per second, with a pulsing
/// sprite and a mesh that only changes shape every few seconds.
struct Studio {
    rejected: u64,
    presented: u64,
}

impl Studio {
    fn scene(&self, frame: u64, t: f32, width: f32) -> SceneTree {
        let mut b = TreeBuilder::new(frame, Node::new(ids::ROOT, NodeKind::Group));
        let root = b.root();

        b.child(
            root,
            Node::new(ids::CHECKER, NodeKind::Texture)
                .prop(PropKey::Width, 8u32)
                .prop(PropKey::Height, 8u32)
                .prop(PropKey::Format, TextureFormat::Rgba8UnormSrgb)
                .prop(PropKey::Color, Color::from_straight(0.9, 0.7, 0.2, 1.0)),
        );

        let camera = b.child(
            root,
            Node::new(ids::CAMERA, NodeKind::Camera)
                .prop(PropKey::Offset, Vec2::new((t * 0.5).sin() * 20.0, 0.0))
                .prop(PropKey::Zoom, 1.0f32),
        );

        let deck = b.child(
            camera,
            Node::new(ids::DECK, NodeKind::Group).prop(PropKey::Offset, Vec2::new(40.0, 80.0)),
        );

        // Rotating the keyed list shifts one element per step: a single move.
        let shift = t as u64 % CARDS;
        let per_row = ((width - 80.0) / (CARD + GAP)).max(1.0) as u64;
        for slot in 0..CARDS {
            let key = (slot + shift) % CARDS;
            let hue = key as f32 / CARDS as f32;
            b.child(
                deck,
                Node::new(ids::CARD_BASE + key, NodeKind::Rect)
                    .key(key)
                    .prop(
                        PropKey::Origin,
                        Vec2::new(
                            (slot % per_row) as f32 * (CARD + GAP),
                            (slot / per_row) as f32 * (CARD + GAP),
                        ),
                    )
                    .prop(PropKey::Size, Vec2::new(CARD, CARD))
                    .prop(PropKey::Color, Color::from_straight(hue, 0.4, 1.0 - hue, 1.0)),
            );
        }

        let pulse = 0.5 + 0.5 * (t * 2.0).sin();
        b.child(
            root,
            Node::new(ids::BANNER, NodeKind::Sprite)
                .prop(PropKey::Origin, Vec2::new(40.0, 20.0))
                .prop(PropKey::Size, Vec2::new(240.0, 40.0))
                .prop(PropKey::Color, Color::from_straight(1.0, 1.0, 1.0, 0.4 + 0.6 * pulse))
                .prop(PropKey::Texture, NodeId(ids::CHECKER)),
        );

        // Vertex count changes every few seconds, which recreates the mesh.
        let teeth = 3 + (t as u32 / 4) % 5;
        b.child(
            root,
            Node::new(ids::WAVE, NodeKind::Mesh)
                .prop(PropKey::Points, saw(teeth, Vec2::new(320.0, 20.0), 200.0, 40.0))
                .prop(PropKey::Color, Color::from_straight(0.3, 0.9, 0.6, 1.0)),
        );

        b.finish()
    }
}

/// Triangle list of `teeth` saw teeth spanning `width` x `height` from `origin`.
fn saw(teeth: u32, origin: Vec2, width: f32, height: f32) -> Vec<Vec2> {
    let step = width / teeth as f32;
    (0..teeth)
        .flat_map(|i| {
            let x = origin.x + i as f32 * step;
            [
                Vec2::new(x, origin.y + height),
                Vec2::new(x + step, origin.y + height),
                Vec2::new(x + step, origin.y),
            ]
        })
        .collect()
}

impl App for Studio {
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let width = ctx.window.size().width as f32;
        let tree = self.scene(ctx.time.frame, ctx.time.elapsed, width);

        let control = ctx.render(tree);
        match ctx.report.as_ref().map(|r| &r.outcome) {
            Some(FrameOutcome::Presented) => self.presented += 1,
            Some(FrameOutcome::Resubmitted(err)) => {
                self.rejected += 1;
                log::warn!("scene rejected ({} so far): {err}", self.rejected);
            }
            _ => {}
        }
        if self.presented > 0 && self.presented % 600 == 0 {
            log::info!("{} frames presented", self.presented);
        }
        control
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    Runtime::run(
        RuntimeConfig {
            title: "Reactor Studio".to_string(),
            ..Default::default()
        },
        GpuInit::default(),
        RendererConfig::default(),
        Studio {
            rejected: 0,
            presented: 0,
        },
    )
}
