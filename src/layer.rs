use std::collections::BTreeMap;
use std::fmt;

use image::Rgba;
use uuid::Uuid;

use crate::canvas::{BlendMode, PixelRect, TiledImage};

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable identity of a layer. Survives moves between holders and
/// undo/redo round trips, so edits refer to layers by id, never by reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Non-owning reference from a layer to the container that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HolderId {
    /// The composition itself.
    Root,
    /// A group layer, identified by the group's own layer id.
    Group(LayerId),
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderId::Root => write!(f, "root"),
            HolderId::Group(id) => write!(f, "group {}", id),
        }
    }
}

// ============================================================================
// LAYER CONTENT
// ============================================================================

/// Pixels of an image or mask layer plus their offset on the canvas.
/// Pixel `(0, 0)` of `pixels` sits at canvas position `(tx, ty)`.
#[derive(Clone, Debug)]
pub struct ImageContent {
    pub pixels: TiledImage,
    pub tx: i32,
    pub ty: i32,
}

impl ImageContent {
    pub fn new(pixels: TiledImage) -> Self {
        Self { pixels, tx: 0, ty: 0 }
    }

    /// Content rectangle in canvas coordinates.
    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(self.tx, self.ty, self.pixels.width(), self.pixels.height())
    }

    /// Converts a canvas-space rectangle into buffer coordinates.
    pub fn canvas_to_local(&self, rect: PixelRect) -> PixelRect {
        rect.translate(-self.tx, -self.ty)
    }
}

/// Parameters of an adjustment layer. The filter itself is an external
/// collaborator looked up by name at render time.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AdjustmentSettings {
    pub filter: String,
    pub params: BTreeMap<String, f32>,
}

impl AdjustmentSettings {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f32) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Children of a group layer, bottom to top.
#[derive(Clone, Debug)]
pub struct LayerGroup {
    id: LayerId,
    layers: Vec<Layer>,
}

#[derive(Clone, Debug)]
pub enum LayerKind {
    Image(ImageContent),
    Adjustment(AdjustmentSettings),
    Mask(ImageContent),
    Group(LayerGroup),
}

/// Initial fill of a freshly added mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskInit {
    RevealAll,
    HideAll,
}

/// The user-editable properties of a layer, captured as one value so
/// property edits can swap them wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerProps {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// `None` when the layer has no mask.
    pub mask_enabled: Option<bool>,
}

// ============================================================================
// LAYER
// ============================================================================

/// A node of the layer tree: image, adjustment, mask, or group.
#[derive(Clone, Debug)]
pub struct Layer {
    id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    holder: Option<HolderId>,
    mask: Option<Box<Layer>>,
    kind: LayerKind,
}

impl Layer {
    pub(crate) fn with_kind(id: LayerId, name: String, kind: LayerKind) -> Self {
        Self {
            id,
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            holder: None,
            mask: None,
            kind,
        }
    }

    /// Transparent image layer of the given size.
    pub fn new_image(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::from_pixels(name, TiledImage::new(width, height))
    }

    pub fn from_pixels(name: impl Into<String>, pixels: TiledImage) -> Self {
        Self::with_kind(LayerId::new(), name.into(), LayerKind::Image(ImageContent::new(pixels)))
    }

    pub fn new_adjustment(name: impl Into<String>, settings: AdjustmentSettings) -> Self {
        Self::with_kind(LayerId::new(), name.into(), LayerKind::Adjustment(settings))
    }

    /// Group owning `children` (bottom to top).
    pub fn new_group(name: impl Into<String>, children: Vec<Layer>) -> Self {
        let id = LayerId::new();
        let mut group = LayerGroup { id, layers: Vec::with_capacity(children.len()) };
        for child in children {
            let len = group.layers.len();
            group.insert_child(child, len);
        }
        Self::with_kind(id, name.into(), LayerKind::Group(group))
    }

    /// Mask layer: white reveals the host, black hides it.
    pub fn new_mask(width: u32, height: u32, init: MaskInit) -> Self {
        let fill = match init {
            MaskInit::RevealAll => Rgba([255, 255, 255, 255]),
            MaskInit::HideAll => Rgba([0, 0, 0, 255]),
        };
        let pixels = TiledImage::new_filled(width, height, fill);
        Self::with_kind(LayerId::new(), "Mask".to_string(), LayerKind::Mask(ImageContent::new(pixels)))
    }

    /// Re-key a freshly built layer, used when reconstructing a saved tree.
    pub(crate) fn with_id(mut self, id: LayerId) -> Self {
        self.id = id;
        if let LayerKind::Group(group) = &mut self.kind {
            group.id = id;
            for child in &mut group.layers {
                child.holder = Some(HolderId::Group(id));
            }
        }
        self
    }

    /// Deep copy with fresh ids for the layer, its mask, and all descendants.
    pub fn duplicate(&self, name: impl Into<String>) -> Layer {
        let mut copy = self.clone();
        copy.name = name.into();
        copy.refresh_ids();
        copy.holder = None;
        copy
    }

    fn refresh_ids(&mut self) {
        self.id = LayerId::new();
        if let Some(mask) = &mut self.mask {
            mask.refresh_ids();
        }
        if let LayerKind::Group(group) = &mut self.kind {
            group.id = self.id;
            for child in &mut group.layers {
                child.refresh_ids();
                child.holder = Some(HolderId::Group(self.id));
            }
        }
    }

    // ---- accessors ------------------------------------------------------------

    pub fn id(&self) -> LayerId {
        self.id
    }

    /// The owning holder, or `None` while the layer is detached.
    pub fn holder(&self) -> Option<HolderId> {
        self.holder
    }

    pub(crate) fn set_holder(&mut self, holder: Option<HolderId>) {
        self.holder = holder;
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            LayerKind::Image(_) => "image",
            LayerKind::Adjustment(_) => "adjustment",
            LayerKind::Mask(_) => "mask",
            LayerKind::Group(_) => "group",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self.kind, LayerKind::Image(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group(_))
    }

    pub fn is_mask(&self) -> bool {
        matches!(self.kind, LayerKind::Mask(_))
    }

    pub fn image(&self) -> Option<&ImageContent> {
        match &self.kind {
            LayerKind::Image(content) | LayerKind::Mask(content) => Some(content),
            _ => None,
        }
    }

    pub(crate) fn image_mut(&mut self) -> Option<&mut ImageContent> {
        match &mut self.kind {
            LayerKind::Image(content) | LayerKind::Mask(content) => Some(content),
            _ => None,
        }
    }

    pub fn adjustment(&self) -> Option<&AdjustmentSettings> {
        match &self.kind {
            LayerKind::Adjustment(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&LayerGroup> {
        match &self.kind {
            LayerKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub(crate) fn as_group_mut(&mut self) -> Option<&mut LayerGroup> {
        match &mut self.kind {
            LayerKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn mask(&self) -> Option<&Layer> {
        self.mask.as_deref()
    }

    pub(crate) fn mask_mut(&mut self) -> Option<&mut Layer> {
        self.mask.as_deref_mut()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// Mask that currently affects rendering (present and enabled).
    pub fn active_mask(&self) -> Option<&ImageContent> {
        self.mask.as_deref().filter(|m| m.visible).and_then(|m| m.image())
    }

    pub(crate) fn attach_mask(&mut self, mask: Box<Layer>) {
        self.mask = Some(mask);
    }

    pub(crate) fn detach_mask(&mut self) -> Option<Box<Layer>> {
        self.mask.take()
    }

    pub fn props(&self) -> LayerProps {
        LayerProps {
            name: self.name.clone(),
            visible: self.visible,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            mask_enabled: self.mask.as_ref().map(|m| m.visible),
        }
    }

    pub(crate) fn apply_props(&mut self, props: &LayerProps) {
        self.name.clone_from(&props.name);
        self.visible = props.visible;
        self.opacity = props.opacity;
        self.blend_mode = props.blend_mode;
        if let (Some(mask), Some(enabled)) = (self.mask.as_deref_mut(), props.mask_enabled) {
            mask.visible = enabled;
        }
    }

    /// Whether `id` names a layer nested anywhere below this one.
    pub fn contains_descendant(&self, id: LayerId) -> bool {
        self.as_group().is_some_and(|g| find_in(&g.layers, id).is_some())
    }

    /// Approximate pixel memory held by this layer and its subtree.
    pub fn memory_bytes(&self) -> usize {
        let own = match &self.kind {
            LayerKind::Image(c) | LayerKind::Mask(c) => c.pixels.memory_bytes(),
            LayerKind::Adjustment(_) => 0,
            LayerKind::Group(g) => g.layers.iter().map(Layer::memory_bytes).sum(),
        };
        own + self.mask.as_ref().map_or(0, |m| m.memory_bytes())
    }
}

// ============================================================================
// LAYER HOLDER CAPABILITY
// ============================================================================

/// A container of ordered child layers (bottom to top). Implemented by the
/// composition and by group layers.
pub trait LayerHolder {
    fn holder_id(&self) -> HolderId;

    fn children(&self) -> &[Layer];

    fn children_mut(&mut self) -> &mut Vec<Layer>;

    /// Whether the holder may be left with no children.
    fn can_be_empty(&self) -> bool;

    fn num_layers(&self) -> usize {
        self.children().len()
    }

    fn layer(&self, index: usize) -> Option<&Layer> {
        self.children().get(index)
    }

    fn index_of(&self, id: LayerId) -> Option<usize> {
        self.children().iter().position(|l| l.id() == id)
    }

    fn contains_layer(&self, id: LayerId) -> bool {
        self.index_of(id).is_some()
    }

    fn level_ids(&self) -> Vec<LayerId> {
        self.children().iter().map(Layer::id).collect()
    }

    /// Raw list insert: stamps the back-reference, no checks, no events.
    fn insert_child(&mut self, mut layer: Layer, index: usize) {
        layer.set_holder(Some(self.holder_id()));
        self.children_mut().insert(index, layer);
    }

    /// Raw list removal: clears the back-reference, no checks, no events.
    fn remove_child(&mut self, index: usize) -> Layer {
        let mut layer = self.children_mut().remove(index);
        layer.set_holder(None);
        layer
    }
}

impl LayerHolder for LayerGroup {
    fn holder_id(&self) -> HolderId {
        HolderId::Group(self.id)
    }

    fn children(&self) -> &[Layer] {
        &self.layers
    }

    fn children_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layers
    }

    fn can_be_empty(&self) -> bool {
        true
    }
}

// ============================================================================
// TREE HELPERS
// ============================================================================

/// Depth-first search through `layers` and nested groups (masks excluded).
pub(crate) fn find_in(layers: &[Layer], id: LayerId) -> Option<&Layer> {
    for layer in layers {
        if layer.id == id {
            return Some(layer);
        }
        if let LayerKind::Group(group) = &layer.kind
            && let Some(found) = find_in(&group.layers, id)
        {
            return Some(found);
        }
    }
    None
}

pub(crate) fn find_in_mut(layers: &mut [Layer], id: LayerId) -> Option<&mut Layer> {
    for layer in layers.iter_mut() {
        if layer.id == id {
            return Some(layer);
        }
        if let LayerKind::Group(group) = &mut layer.kind
            && let Some(found) = find_in_mut(&mut group.layers, id)
        {
            return Some(found);
        }
    }
    None
}

/// Visits every layer of the subtree in stack order, groups before their children.
pub(crate) fn walk(layers: &[Layer], visit: &mut dyn FnMut(&Layer)) {
    for layer in layers {
        visit(layer);
        if let LayerKind::Group(group) = &layer.kind {
            walk(&group.layers, visit);
        }
    }
}
