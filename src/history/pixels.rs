use crate::canvas::{PixelRect, RasterBuffer};
use crate::composition::Composition;
use crate::error::{EditError, EditResult};
use crate::events::LayerEvent;
use crate::layer::{ImageContent, LayerId};

use super::{BackupCache, BackupId, Edit, EditKind, GestureKey};

/// Which pixel buffer of a layer an edit addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentTarget {
    pub layer: LayerId,
    /// `true` for the layer's mask, `false` for its own image.
    pub mask: bool,
}

impl ContentTarget {
    pub fn image(layer: LayerId) -> Self {
        Self { layer, mask: false }
    }

    pub fn mask(layer: LayerId) -> Self {
        Self { layer, mask: true }
    }
}

// ============================================================================
// PARTIAL IMAGE EDIT - bounding-rectangle backup for localized changes
// ============================================================================

/// Undo record for a localized pixel change. Only the affected rectangle is
/// kept, in the composition's [`BackupCache`]; undo and redo swap it with the
/// live pixels, so both directions reuse the same block.
pub struct PartialImageEdit {
    name: String,
    target: ContentTarget,
    /// Backed-up area in buffer coordinates.
    rect: PixelRect,
    backup: BackupId,
    bytes: usize,
    gesture: Option<GestureKey>,
}

impl PartialImageEdit {
    /// Back up `rect` of the target's current pixels before they change.
    ///
    /// `rect` is in canvas coordinates unless `image_relative` is set, in
    /// which case it is already in buffer coordinates. Returns `Ok(None)`
    /// when the rectangle misses the buffer entirely: there is nothing to
    /// undo and the caller should not record anything.
    pub fn create(
        comp: &mut Composition,
        name: impl Into<String>,
        target: ContentTarget,
        rect: PixelRect,
        image_relative: bool,
    ) -> EditResult<Option<Self>> {
        let block = {
            let content = comp.content(target).ok_or_else(|| {
                EditError::invalid(format!("layer {} has no editable pixels", target.layer))
            })?;
            let local = if image_relative { rect } else { content.canvas_to_local(rect) };
            let clipped = local.intersect(&content.pixels.bounds());
            if clipped.is_empty() {
                return Ok(None);
            }
            (clipped, content.pixels.read_region(clipped))
        };
        let (rect, pixels) = block;
        let bytes = pixels.as_raw().len();
        let backup = comp.history.backups.store(pixels);
        Ok(Some(Self {
            name: name.into(),
            target,
            rect,
            backup,
            bytes,
            gesture: None,
        }))
    }

    /// Mark the edit as part of a user gesture so that consecutive edits of
    /// the same gesture on the same layer coalesce.
    pub fn with_gesture(mut self, gesture: u64) -> Self {
        self.gesture = Some(GestureKey {
            kind: EditKind::Pixels,
            target: self.target.layer,
            gesture,
        });
        self
    }

    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    pub fn target(&self) -> ContentTarget {
        self.target
    }

    /// Exchange the stored block with the live pixels under it. Returns
    /// `Ok(false)` when the block was reclaimed.
    fn swap(&self, comp: &mut Composition) -> EditResult<bool> {
        let Some(stored) = comp.history.backups.take(self.backup) else {
            return Ok(false);
        };
        let content = match comp.content_mut(self.target) {
            Ok(content) => content,
            Err(err) => {
                comp.history.backups.put(self.backup, stored);
                return Err(err);
            }
        };
        let current = content.pixels.read_region(self.rect);
        content.pixels.write_region(self.rect.x, self.rect.y, &stored);
        comp.history.backups.put(self.backup, current);
        comp.emit(LayerEvent::LayerChanged { layer: self.target.layer });
        Ok(true)
    }
}

impl Edit for PartialImageEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.swap(comp)? {
            Ok(())
        } else {
            Err(EditError::CannotUndo(format!("backup for '{}' was reclaimed", self.name)))
        }
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.swap(comp)? {
            Ok(())
        } else {
            Err(EditError::CannotRedo(format!("backup for '{}' was reclaimed", self.name)))
        }
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.bytes
    }

    fn gesture(&self) -> Option<GestureKey> {
        self.gesture
    }

    fn is_reclaimed(&self, backups: &BackupCache) -> bool {
        !backups.contains(self.backup)
    }

    fn release(&mut self, backups: &mut BackupCache) {
        backups.release(self.backup);
    }
}

// ============================================================================
// IMAGE EDIT - whole-buffer swap for layer-wide changes
// ============================================================================

/// Undo record for a change to an entire buffer, including its size and
/// offset (filters, crop, canvas enlargement). The stored copy shares
/// untouched chunks with the live buffer.
pub struct ImageEdit {
    name: String,
    target: ContentTarget,
    stored: ImageContent,
}

impl ImageEdit {
    /// `before` is the content prior to the change; the live content is the
    /// state after it.
    pub fn new(name: impl Into<String>, target: ContentTarget, before: ImageContent) -> Self {
        Self {
            name: name.into(),
            target,
            stored: before,
        }
    }

    fn swap(&mut self, comp: &mut Composition) -> EditResult<()> {
        let content = comp.content_mut(self.target)?;
        std::mem::swap(content, &mut self.stored);
        comp.emit(LayerEvent::LayerChanged { layer: self.target.layer });
        Ok(())
    }
}

impl Edit for ImageEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        self.swap(comp)
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        self.swap(comp)
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.stored.pixels.memory_bytes()
    }
}

// ============================================================================
// CANVAS SIZE EDIT
// ============================================================================

pub struct CanvasSizeEdit {
    before: (u32, u32),
    after: (u32, u32),
}

impl CanvasSizeEdit {
    pub fn new(before: (u32, u32), after: (u32, u32)) -> Self {
        Self { before, after }
    }
}

impl Edit for CanvasSizeEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.set_canvas_size_raw(self.before.0, self.before.1);
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.set_canvas_size_raw(self.after.0, self.after.1);
        Ok(())
    }

    fn description(&self) -> String {
        "Canvas Size".to_string()
    }
}
