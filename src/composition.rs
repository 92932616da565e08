use std::collections::HashSet;
use std::path::PathBuf;

use image::Rgba;
use uuid::Uuid;

use crate::canvas::TiledImage;
use crate::error::{EditError, EditResult};
use crate::events::{EventBus, LayerEvent, ListenerFn, ListenerId};
use crate::history::{ContentTarget, Edit, History};
use crate::layer::{find_in, find_in_mut, walk, HolderId, ImageContent, Layer, LayerHolder, LayerId};
use crate::settings::EngineSettings;

/// Single open document: canvas geometry, the layer tree, the active-layer
/// selection and the undo history.
pub struct Composition {
    id: Uuid,
    pub name: String,
    /// `None` for unsaved documents.
    pub path: Option<PathBuf>,
    width: u32,
    height: u32,
    /// Top-level layers, bottom to top.
    layers: Vec<Layer>,
    active: Option<LayerId>,
    empty_capable: bool,
    pub(crate) history: History,
    events: EventBus,
    dirty: bool,
    layer_counter: usize,
    group_counter: usize,
    next_gesture: u64,
}

impl std::fmt::Debug for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composition")
            .field("name", &self.name)
            .field("size", &(self.width, self.height))
            .field("layers", &self.layers.len())
            .field("active", &self.active)
            .field("history", &self.history)
            .finish()
    }
}

impl LayerHolder for Composition {
    fn holder_id(&self) -> HolderId {
        HolderId::Root
    }

    fn children(&self) -> &[Layer] {
        &self.layers
    }

    fn children_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layers
    }

    fn can_be_empty(&self) -> bool {
        self.empty_capable
    }
}

impl Composition {
    /// New document with a single white "Background" layer.
    pub fn new(width: u32, height: u32, settings: &EngineSettings) -> Self {
        let mut comp = Self::empty(width, height, settings);
        let pixels = TiledImage::new_filled(comp.width, comp.height, Rgba([255, 255, 255, 255]));
        let background = Layer::from_pixels("Background", pixels);
        let id = background.id();
        comp.insert_child(background, 0);
        comp.active = Some(id);
        comp.empty_capable = false;
        comp.dirty = false;
        comp
    }

    /// Layerless, empty-capable document used for silent reconstruction.
    /// Callers clear the flag once the tree is populated.
    pub fn empty(width: u32, height: u32, settings: &EngineSettings) -> Self {
        let probe = TiledImage::new(width, height);
        Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            path: None,
            width: probe.width(),
            height: probe.height(),
            layers: Vec::new(),
            active: None,
            empty_capable: true,
            history: History::from_settings(settings),
            events: EventBus::default(),
            dirty: false,
            layer_counter: 1,
            group_counter: 0,
            next_gesture: 1,
        }
    }

    // ---- geometry and flags -------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn is_empty_capable(&self) -> bool {
        self.empty_capable
    }

    pub fn set_empty_capable(&mut self, empty_capable: bool) {
        self.empty_capable = empty_capable;
    }

    pub(crate) fn set_canvas_size_raw(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.dirty = true;
        self.emit(LayerEvent::CanvasResized { width, height });
    }

    // ---- lookup -------------------------------------------------------------

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn find_layer(&self, id: LayerId) -> Option<&Layer> {
        find_in(&self.layers, id)
    }

    pub(crate) fn find_layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        find_in_mut(&mut self.layers, id)
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> EditResult<&mut Layer> {
        self.find_layer_mut(id).ok_or(EditError::LayerNotFound(id))
    }

    /// Owning holder and index of a layer anywhere in the tree.
    pub fn locate(&self, id: LayerId) -> Option<(HolderId, usize)> {
        let holder_id = self.find_layer(id)?.holder()?;
        let index = self.holder(holder_id)?.index_of(id)?;
        Some((holder_id, index))
    }

    pub fn holder(&self, id: HolderId) -> Option<&dyn LayerHolder> {
        match id {
            HolderId::Root => Some(self as &dyn LayerHolder),
            HolderId::Group(gid) => self
                .find_layer(gid)?
                .as_group()
                .map(|g| g as &dyn LayerHolder),
        }
    }

    pub(crate) fn holder_mut(&mut self, id: HolderId) -> EditResult<&mut dyn LayerHolder> {
        match id {
            HolderId::Root => Ok(self as &mut dyn LayerHolder),
            HolderId::Group(gid) => match find_in_mut(&mut self.layers, gid) {
                Some(layer) => layer
                    .as_group_mut()
                    .map(|g| g as &mut dyn LayerHolder)
                    .ok_or_else(|| EditError::invalid(format!("layer {} is not a group", gid))),
                None => Err(EditError::LayerNotFound(gid)),
            },
        }
    }

    /// Pixel content addressed by an edit: a layer's own image or its mask.
    pub fn content(&self, target: ContentTarget) -> Option<&ImageContent> {
        let layer = self.find_layer(target.layer)?;
        if target.mask {
            layer.mask()?.image()
        } else if layer.is_image() {
            layer.image()
        } else {
            None
        }
    }

    pub(crate) fn content_mut(&mut self, target: ContentTarget) -> EditResult<&mut ImageContent> {
        let layer = self.layer_mut(target.layer)?;
        let content = if target.mask {
            layer.mask_mut().and_then(Layer::image_mut)
        } else if layer.is_image() {
            layer.image_mut()
        } else {
            None
        };
        content.ok_or_else(|| {
            let what = if target.mask { "a mask" } else { "image pixels" };
            EditError::invalid(format!("layer {} has no {}", target.layer, what))
        })
    }

    /// Every pixel buffer in the document: image layers and masks, nested
    /// groups included.
    pub fn content_targets(&self) -> Vec<ContentTarget> {
        let mut targets = Vec::new();
        walk(&self.layers, &mut |layer| {
            if layer.is_image() {
                targets.push(ContentTarget::image(layer.id()));
            }
            if layer.has_mask() {
                targets.push(ContentTarget::mask(layer.id()));
            }
        });
        targets
    }

    pub fn layer_count_recursive(&self) -> usize {
        let mut count = 0;
        walk(&self.layers, &mut |_| count += 1);
        count
    }

    // ---- active layer -------------------------------------------------------

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.find_layer(id))
    }

    pub(crate) fn set_active_raw(&mut self, layer: Option<LayerId>) {
        if self.active != layer {
            self.active = layer;
            self.emit(LayerEvent::ActiveLayerChanged { layer });
        }
    }

    /// Re-point the selection after the active layer left the tree. `hint`
    /// is where the removed layer used to live.
    pub(crate) fn repair_active(&mut self, hint: (HolderId, usize)) {
        if self.active.is_some_and(|id| self.find_layer(id).is_some()) {
            return;
        }
        let (holder_id, index) = hint;
        let fallback = match self.holder(holder_id) {
            Some(holder) if holder.num_layers() > 0 => {
                let pick = index.saturating_sub(1).min(holder.num_layers() - 1);
                holder.layer(pick).map(Layer::id)
            }
            Some(_) => match holder_id {
                HolderId::Group(gid) => Some(gid),
                HolderId::Root => None,
            },
            None => self.layers.last().map(Layer::id),
        };
        self.set_active_raw(fallback);
    }

    // ---- raw structural primitives -----------------------------------------
    // Check-then-act list mutations shared by operations and edit replay.
    // They fire events but never touch history.

    /// Fails unless `holder` exists and accepts a child at `index`. Run this
    /// before detaching a layer that is about to be inserted, so a rejected
    /// insert never loses the layer.
    pub(crate) fn check_insert(&self, holder: HolderId, index: usize) -> EditResult<()> {
        let target = match holder {
            HolderId::Root => self as &dyn LayerHolder,
            HolderId::Group(gid) => {
                let layer = self.find_layer(gid).ok_or(EditError::LayerNotFound(gid))?;
                layer
                    .as_group()
                    .map(|g| g as &dyn LayerHolder)
                    .ok_or_else(|| EditError::invalid(format!("layer {} is not a group", gid)))?
            }
        };
        if index > target.num_layers() {
            return Err(EditError::invalid(format!(
                "index {} out of range for {} with {} layers",
                index,
                holder,
                target.num_layers()
            )));
        }
        Ok(())
    }

    pub(crate) fn insert_raw(&mut self, holder: HolderId, layer: Layer, index: usize) -> EditResult<()> {
        self.check_insert(holder, index)?;
        let id = layer.id();
        let target = self.holder_mut(holder)?;
        target.insert_child(layer, index);
        self.dirty = true;
        self.emit(LayerEvent::LayerAdded { holder, layer: id, index });
        Ok(())
    }

    /// Removes a child without the emptiness check and without touching the
    /// selection. Callers repair the active layer afterwards.
    pub(crate) fn remove_raw(&mut self, holder: HolderId, index: usize) -> EditResult<Layer> {
        let source = self.holder_mut(holder)?;
        if index >= source.num_layers() {
            return Err(EditError::invalid(format!("no layer at index {} in {}", index, holder)));
        }
        let layer = source.remove_child(index);
        self.dirty = true;
        self.emit(LayerEvent::LayerRemoved { holder, layer: layer.id() });
        Ok(layer)
    }

    pub(crate) fn move_raw(&mut self, holder: HolderId, from: usize, to: usize) -> EditResult<()> {
        let target = self.holder_mut(holder)?;
        let len = target.num_layers();
        if from >= len || to >= len {
            return Err(EditError::invalid(format!("reorder {} -> {} out of range for {}", from, to, holder)));
        }
        let layer = target.children_mut().remove(from);
        target.children_mut().insert(to, layer);
        self.dirty = true;
        self.emit(LayerEvent::OrderChanged { holder });
        Ok(())
    }

    // ---- events -------------------------------------------------------------

    pub fn subscribe(&mut self, listener: ListenerFn) -> ListenerId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(crate) fn emit(&mut self, event: LayerEvent) {
        self.events.emit(event);
    }

    // ---- history ------------------------------------------------------------

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Memory-pressure hook, see [`History::reclaim_backups`].
    pub fn reclaim_backups(&mut self, bytes: usize) -> usize {
        self.history.reclaim_backups(bytes)
    }

    /// Start a new user gesture. Edits committed with the returned id on the
    /// same target merge into one history entry.
    pub fn begin_gesture(&mut self) -> u64 {
        let id = self.next_gesture;
        self.next_gesture += 1;
        id
    }

    /// Push an already applied edit onto the undo stack.
    pub fn add_edit(&mut self, edit: Box<dyn Edit>) {
        debug_assert!(self.check_consistency().is_ok(), "{:?}", self.check_consistency());
        self.dirty = true;
        self.history.commit(edit);
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Revert the most recent edit and return its description.
    ///
    /// When the edit cannot be replayed (its backup was reclaimed, or the
    /// tree no longer matches) the edit and everything older is discarded,
    /// since those edits assume a state that can no longer be reached.
    pub fn undo(&mut self) -> EditResult<String> {
        let Some(mut edit) = self.history.pop_undo() else {
            return Err(EditError::CannotUndo("nothing to undo".to_string()));
        };
        let description = edit.description();
        if edit.is_reclaimed(&self.history.backups) {
            crate::log_warn!("Undo of '{}' impossible, backup was reclaimed", description);
            self.history.discard_undo_chain(edit);
            return Err(EditError::CannotUndo(format!("backup for '{}' was reclaimed", description)));
        }
        match edit.undo(self) {
            Ok(()) => {
                self.history.push_redo(edit);
                self.dirty = true;
                Ok(description)
            }
            Err(err) => {
                crate::log_err!("Undo of '{}' failed: {}", description, err);
                self.history.discard_undo_chain(edit);
                Err(EditError::CannotUndo(format!("{}: {}", description, err)))
            }
        }
    }

    pub fn redo(&mut self) -> EditResult<String> {
        let Some(mut edit) = self.history.pop_redo() else {
            return Err(EditError::CannotRedo("nothing to redo".to_string()));
        };
        let description = edit.description();
        if edit.is_reclaimed(&self.history.backups) {
            crate::log_warn!("Redo of '{}' impossible, backup was reclaimed", description);
            self.history.discard_redo_chain(edit);
            return Err(EditError::CannotRedo(format!("backup for '{}' was reclaimed", description)));
        }
        match edit.redo(self) {
            Ok(()) => {
                self.history.push_undo(edit);
                self.dirty = true;
                Ok(description)
            }
            Err(err) => {
                crate::log_err!("Redo of '{}' failed: {}", description, err);
                self.history.discard_redo_chain(edit);
                Err(EditError::CannotRedo(format!("{}: {}", description, err)))
            }
        }
    }

    /// Undo `steps` edits (0 = nothing). Stops at the first failure.
    pub fn undo_to(&mut self, steps: usize) -> EditResult<usize> {
        for done in 0..steps {
            if self.history.undo_count() == 0 {
                return Ok(done);
            }
            self.undo()?;
        }
        Ok(steps)
    }

    // ---- naming -------------------------------------------------------------

    pub(crate) fn next_layer_name(&mut self) -> String {
        let name = format!("Layer {}", self.layer_counter);
        self.layer_counter += 1;
        name
    }

    pub(crate) fn next_group_name(&mut self) -> String {
        self.group_counter += 1;
        format!("Group {}", self.group_counter)
    }

    // ---- invariants ---------------------------------------------------------

    /// Verifies back-references, id uniqueness, active reachability and the
    /// root emptiness rule.
    pub fn check_consistency(&self) -> Result<(), String> {
        fn check_level(
            layers: &[Layer],
            holder: HolderId,
            seen: &mut HashSet<LayerId>,
        ) -> Result<(), String> {
            for layer in layers {
                if layer.holder() != Some(holder) {
                    return Err(format!(
                        "layer {} claims holder {:?} but lives in {}",
                        layer.id(),
                        layer.holder(),
                        holder
                    ));
                }
                if !seen.insert(layer.id()) {
                    return Err(format!("layer {} appears twice", layer.id()));
                }
                if let Some(mask) = layer.mask()
                    && !mask.is_mask()
                {
                    return Err(format!("mask of layer {} is not a mask layer", layer.id()));
                }
                if let Some(group) = layer.as_group() {
                    check_level(group.children(), HolderId::Group(layer.id()), seen)?;
                }
            }
            Ok(())
        }

        let mut seen = HashSet::new();
        check_level(&self.layers, HolderId::Root, &mut seen)?;
        if !self.empty_capable && self.layers.is_empty() {
            return Err("composition has no layers".to_string());
        }
        if let Some(active) = self.active
            && !seen.contains(&active)
        {
            return Err(format!("active layer {} is not in the tree", active));
        }
        Ok(())
    }
}
