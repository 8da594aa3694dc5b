use std::collections::BTreeMap;
use std::fmt;

use super::NodeId;

// ── primitive values ──────────────────────────────────────────────────────

/// 2D vector in logical pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    fn bits(self) -> (u32, u32) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

/// Linear premultiplied RGBA color.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::from_premul(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::from_premul(0.0, 0.0, 0.0, 1.0);
    pub const RED: Color = Color::from_premul(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color = Color::from_premul(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color = Color::from_premul(0.0, 0.0, 1.0, 1.0);

    #[inline]
    pub const fn from_premul(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a premultiplied color from straight alpha components.
    #[inline]
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Self {
        let a = a.clamp(0.0, 1.0);
        Self {
            r: r.clamp(0.0, 1.0) * a,
            g: g.clamp(0.0, 1.0) * a,
            b: b.clamp(0.0, 1.0) * a,
            a,
        }
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    fn bits(self) -> [u32; 4] {
        [self.r.to_bits(), self.g.to_bits(), self.b.to_bits(), self.a.to_bits()]
    }
}

/// Texel format of a `Texture` node.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R8Unorm,
}

impl TextureFormat {
    /// Bytes per texel.
    pub const fn texel_size(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm => 4,
            TextureFormat::R8Unorm => 1,
        }
    }
}

// ── property values ───────────────────────────────────────────────────────

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Float(f32),
    UInt(u32),
    Bool(bool),
    Vec2(Vec2),
    Color(Color),
    Points(Vec<Vec2>),
    Format(TextureFormat),
    /// Reference to another node of the same tree.
    Node(NodeId),
}

impl PropValue {
    /// Shallow equality used by the reconciler.
    ///
    /// Floats compare by bit pattern: a NaN property equals itself, so an
    /// unchanged tree never produces an update.
    pub fn same(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::UInt(a), PropValue::UInt(b)) => a == b,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Vec2(a), PropValue::Vec2(b)) => a.bits() == b.bits(),
            (PropValue::Color(a), PropValue::Color(b)) => a.bits() == b.bits(),
            (PropValue::Points(a), PropValue::Points(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(p, q)| p.bits() == q.bits())
            }
            (PropValue::Format(a), PropValue::Format(b)) => a == b,
            (PropValue::Node(a), PropValue::Node(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            PropValue::Float(_) => "float",
            PropValue::UInt(_) => "uint",
            PropValue::Bool(_) => "bool",
            PropValue::Vec2(_) => "vec2",
            PropValue::Color(_) => "color",
            PropValue::Points(_) => "points",
            PropValue::Format(_) => "format",
            PropValue::Node(_) => "node",
        }
    }
}

impl From<f32> for PropValue {
    fn from(v: f32) -> Self {
        PropValue::Float(v)
    }
}

impl From<u32> for PropValue {
    fn from(v: u32) -> Self {
        PropValue::UInt(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<Vec2> for PropValue {
    fn from(v: Vec2) -> Self {
        PropValue::Vec2(v)
    }
}

impl From<Color> for PropValue {
    fn from(v: Color) -> Self {
        PropValue::Color(v)
    }
}

impl From<Vec<Vec2>> for PropValue {
    fn from(v: Vec<Vec2>) -> Self {
        PropValue::Points(v)
    }
}

impl From<TextureFormat> for PropValue {
    fn from(v: TextureFormat) -> Self {
        PropValue::Format(v)
    }
}

impl From<NodeId> for PropValue {
    fn from(v: NodeId) -> Self {
        PropValue::Node(v)
    }
}

// ── property keys ─────────────────────────────────────────────────────────

/// Closed set of property names.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PropKey {
    Origin,
    Size,
    Color,
    Offset,
    Scale,
    Zoom,
    Opacity,
    Width,
    Height,
    Format,
    Points,
    Texture,
}

impl PropKey {
    /// Returns `true` if `value` has the variant this key stores.
    pub fn accepts(self, value: &PropValue) -> bool {
        matches!(
            (self, value),
            (PropKey::Origin | PropKey::Size | PropKey::Offset, PropValue::Vec2(_))
                | (PropKey::Color, PropValue::Color(_))
                | (PropKey::Scale | PropKey::Zoom | PropKey::Opacity, PropValue::Float(_))
                | (PropKey::Width | PropKey::Height, PropValue::UInt(_))
                | (PropKey::Format, PropValue::Format(_))
                | (PropKey::Points, PropValue::Points(_))
                | (PropKey::Texture, PropValue::Node(_))
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PropKey::Origin => "origin",
            PropKey::Size => "size",
            PropKey::Color => "color",
            PropKey::Offset => "offset",
            PropKey::Scale => "scale",
            PropKey::Zoom => "zoom",
            PropKey::Opacity => "opacity",
            PropKey::Width => "width",
            PropKey::Height => "height",
            PropKey::Format => "format",
            PropKey::Points => "points",
            PropKey::Texture => "texture",
        }
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── property sets ─────────────────────────────────────────────────────────

/// Ordered property map of a node.
///
/// Ordered by key so field-by-field comparison walks both sides in lockstep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(BTreeMap<PropKey, PropValue>);

impl Props {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&mut self, key: PropKey, value: impl Into<PropValue>) {
        self.0.insert(key, value.into());
    }

    #[inline]
    pub fn get(&self, key: PropKey) -> Option<&PropValue> {
        self.0.get(&key)
    }

    #[inline]
    pub fn remove(&mut self, key: PropKey) -> Option<PropValue> {
        self.0.remove(&key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropKey, &PropValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn vec2(&self, key: PropKey) -> Option<Vec2> {
        match self.get(key) {
            Some(PropValue::Vec2(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, key: PropKey) -> Option<f32> {
        match self.get(key) {
            Some(PropValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn uint(&self, key: PropKey) -> Option<u32> {
        match self.get(key) {
            Some(PropValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn color(&self, key: PropKey) -> Option<Color> {
        match self.get(key) {
            Some(PropValue::Color(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn points(&self, key: PropKey) -> Option<&[Vec2]> {
        match self.get(key) {
            Some(PropValue::Points(v)) => Some(v),
            _ => None,
        }
    }

    pub fn format(&self, key: PropKey) -> Option<TextureFormat> {
        match self.get(key) {
            Some(PropValue::Format(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn node(&self, key: PropKey) -> Option<NodeId> {
        match self.get(key) {
            Some(PropValue::Node(v)) => Some(*v),
            _ => None,
        }
    }

    /// Field-by-field diff from `self` to `next`.
    pub fn diff(&self, next: &Props) -> PropPatch {
        let mut patch = PropPatch::default();
        for (key, value) in &next.0 {
            match self.0.get(key) {
                Some(old) if old.same(value) => {}
                _ => {
                    patch.0.insert(*key, Some(value.clone()));
                }
            }
        }
        for key in self.0.keys() {
            if !next.0.contains_key(key) {
                patch.0.insert(*key, None);
            }
        }
        patch
    }

    /// Applies a patch produced by [`Props::diff`].
    pub fn apply(&mut self, patch: &PropPatch) {
        for (key, value) in &patch.0 {
            match value {
                Some(v) => {
                    self.0.insert(*key, v.clone());
                }
                None => {
                    self.0.remove(key);
                }
            }
        }
    }
}

/// Changed fields of an update: `Some(v)` is a new value, `None` a cleared one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropPatch(BTreeMap<PropKey, Option<PropValue>>);

impl PropPatch {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// New value of `key`, if it was set by this patch.
    pub fn get(&self, key: PropKey) -> Option<&PropValue> {
        self.0.get(&key).and_then(Option::as_ref)
    }

    pub fn contains(&self, key: PropKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn is_cleared(&self, key: PropKey) -> bool {
        matches!(self.0.get(&key), Some(None))
    }

    pub fn keys(&self) -> impl Iterator<Item = PropKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropKey, Option<&PropValue>)> {
        self.0.iter().map(|(k, v)| (*k, v.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(entries: &[(PropKey, PropValue)]) -> Props {
        let mut p = Props::new();
        for (k, v) in entries {
            p.set(*k, v.clone());
        }
        p
    }

    #[test]
    fn nan_float_is_same_as_itself() {
        let a = PropValue::Float(f32::NAN);
        assert!(a.same(&a.clone()));
    }

    #[test]
    fn diff_of_equal_props_is_empty() {
        let p = props(&[(PropKey::Color, Color::RED.into()), (PropKey::Size, Vec2::new(4.0, 4.0).into())]);
        assert!(p.diff(&p.clone()).is_empty());
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let a = props(&[(PropKey::Color, Color::RED.into()), (PropKey::Size, Vec2::new(4.0, 4.0).into())]);
        let b = props(&[(PropKey::Color, Color::BLUE.into()), (PropKey::Size, Vec2::new(4.0, 4.0).into())]);
        let patch = a.diff(&b);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(PropKey::Color), Some(&PropValue::Color(Color::BLUE)));
    }

    #[test]
    fn diff_marks_removed_fields_cleared() {
        let a = props(&[(PropKey::Color, Color::RED.into())]);
        let b = Props::new();
        let patch = a.diff(&b);
        assert!(patch.is_cleared(PropKey::Color));

        let mut applied = a.clone();
        applied.apply(&patch);
        assert_eq!(applied, b);
    }

    #[test]
    fn keys_accept_only_their_value_type() {
        assert!(PropKey::Color.accepts(&Color::RED.into()));
        assert!(!PropKey::Color.accepts(&PropValue::Float(1.0)));
        assert!(PropKey::Texture.accepts(&PropValue::Node(NodeId(3))));
        assert!(!PropKey::Width.accepts(&PropValue::Float(3.0)));
    }
}
