// ============================================================================
// CANVAS-LEVEL OPERATIONS - pixel changes, crop / enlarge / flatten
// ============================================================================

use crate::canvas::{PixelRect, TiledImage};
use crate::composition::Composition;
use crate::error::{EditError, EditResult};
use crate::events::LayerEvent;
use crate::history::{
    AddLayerEdit, CanvasSizeEdit, CompoundEdit, ContentTarget, DeleteLayerEdit, Edit, ImageEdit, PartialImageEdit,
};
use crate::layer::{HolderId, ImageContent, Layer, LayerHolder};
use crate::render::Compositor;

use super::layer_ops::delete_temporarily;

/// Localized pixel change with a bounding-rectangle backup.
///
/// `rect` must cover every pixel `change` touches; it is in canvas
/// coordinates unless `image_relative`. When the rectangle misses the buffer
/// nothing is run or recorded and `Ok(false)` is returned. Changes that pass
/// the same `gesture` on the same target become one history entry.
pub fn apply_partial_change(
    comp: &mut Composition,
    target: ContentTarget,
    rect: PixelRect,
    image_relative: bool,
    name: &str,
    gesture: Option<u64>,
    change: impl FnOnce(&mut TiledImage),
) -> EditResult<bool> {
    let Some(mut edit) = PartialImageEdit::create(comp, name, target, rect, image_relative)? else {
        return Ok(false);
    };
    if let Some(gesture) = gesture {
        edit = edit.with_gesture(gesture);
    }
    change(&mut comp.content_mut(target)?.pixels);
    comp.emit(LayerEvent::LayerChanged { layer: target.layer });
    comp.add_edit(Box::new(edit));
    Ok(true)
}

/// Whole-buffer change (filters, transforms) recorded as an [`ImageEdit`].
/// Entry point for external filter collaborators.
pub fn apply_image_change(
    comp: &mut Composition,
    target: ContentTarget,
    name: &str,
    change: impl FnOnce(&mut ImageContent),
) -> EditResult<()> {
    let content = comp.content_mut(target)?;
    let before = content.clone();
    change(content);
    comp.emit(LayerEvent::LayerChanged { layer: target.layer });
    comp.add_edit(Box::new(ImageEdit::new(name, target, before)));
    Ok(())
}

/// Replace every pixel buffer with `reshape(old)` and resize the canvas, as
/// one undo step. Stops and rolls back at the first failing layer.
fn reshape_all(
    comp: &mut Composition,
    name: &str,
    new_size: (u32, u32),
    reshape: impl Fn(&ImageContent) -> ImageContent,
) -> EditResult<()> {
    let old_size = (comp.width(), comp.height());
    let mut applied: Vec<Box<dyn Edit>> = Vec::new();

    for target in comp.content_targets() {
        let step = comp.content_mut(target).map(|content| {
            let reshaped = reshape(content);
            std::mem::replace(content, reshaped)
        });
        match step {
            Ok(before) => {
                comp.emit(LayerEvent::LayerChanged { layer: target.layer });
                applied.push(Box::new(ImageEdit::new(name, target, before)));
            }
            Err(err) => {
                let mut partial = CompoundEdit::new(name, applied);
                if let Err(e) = partial.undo(comp) {
                    crate::log_err!("Rollback of '{}' failed: {}", name, e);
                }
                return Err(err);
            }
        }
    }

    comp.set_canvas_size_raw(new_size.0, new_size.1);
    applied.push(Box::new(CanvasSizeEdit::new(old_size, new_size)));
    comp.add_edit(Box::new(CompoundEdit::new(name, applied)));
    Ok(())
}

/// Crop the canvas to `rect` (clipped to the canvas). Every image and mask
/// is cut to the new canvas and its offset reset.
pub fn crop(comp: &mut Composition, rect: PixelRect) -> EditResult<()> {
    let rect = rect.intersect(&PixelRect::new(0, 0, comp.width(), comp.height()));
    if rect.is_empty() {
        return Err(EditError::invalid("crop rectangle does not overlap the canvas"));
    }
    if rect == PixelRect::new(0, 0, comp.width(), comp.height()) {
        return Ok(());
    }
    reshape_all(comp, "Crop", (rect.width, rect.height), |content| {
        let pixels = content
            .pixels
            .with_canvas(rect.width, rect.height, content.tx - rect.x, content.ty - rect.y);
        ImageContent::new(pixels)
    })
}

/// Add transparent margins around the canvas.
pub fn enlarge_canvas(comp: &mut Composition, top: u32, right: u32, bottom: u32, left: u32) -> EditResult<()> {
    if top == 0 && right == 0 && bottom == 0 && left == 0 {
        return Ok(());
    }
    let width = comp.width() + left + right;
    let height = comp.height() + top + bottom;
    let resized = TiledImage::new(width, height);
    if (resized.width(), resized.height()) != (width, height) {
        return Err(EditError::invalid(format!("canvas of {}x{} is too large", width, height)));
    }
    reshape_all(comp, "Enlarge Canvas", (width, height), |content| {
        let pixels = content
            .pixels
            .with_canvas(width, height, content.tx + left as i32, content.ty + top as i32);
        ImageContent::new(pixels)
    })
}

/// Replace the whole tree with a single image layer holding the composite.
/// Recorded as one add followed by the deletions, top to bottom.
pub fn flatten(comp: &mut Composition, compositor: &Compositor) -> EditResult<()> {
    let flattened = Layer::from_pixels("Flattened", compositor.composite(comp));
    let flat_id = flattened.id();
    let prev_active = comp.active_layer_id();
    let top = comp.num_layers();
    comp.insert_raw(HolderId::Root, flattened, top)?;
    comp.set_active_raw(Some(flat_id));

    let mut edits: Vec<Box<dyn Edit>> = vec![Box::new(AddLayerEdit::new(
        "Flatten Image",
        HolderId::Root,
        top,
        flat_id,
        prev_active,
    ))];
    let doomed: Vec<_> = comp.level_ids().into_iter().filter(|&id| id != flat_id).rev().collect();
    for id in doomed {
        let (holder, index, removed, prev_active) = delete_temporarily(comp, id)?;
        edits.push(Box::new(DeleteLayerEdit::new(holder, index, removed, prev_active)));
    }
    comp.add_edit(Box::new(CompoundEdit::new("Flatten Image", edits)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::layer_ops::{add_layer, AddToHistory};
    use crate::ops::mask_ops::add_mask;
    use crate::layer::MaskInit;
    use crate::settings::EngineSettings;
    use image::Rgba;

    #[test]
    fn partial_change_outside_buffer_is_a_no_op() {
        let mut comp = Composition::new(16, 16, &EngineSettings::default());
        let target = ContentTarget::image(comp.active_layer_id().unwrap());
        let mut ran = false;
        let changed = apply_partial_change(&mut comp, target, PixelRect::new(40, 40, 4, 4), false, "Brush", None, |_| {
            ran = true;
        })
        .unwrap();
        assert!(!changed);
        assert!(!ran);
        assert!(!comp.can_undo());
    }

    #[test]
    fn brush_gesture_undoes_in_one_step() {
        let mut comp = Composition::new(16, 16, &EngineSettings::default());
        let target = ContentTarget::image(comp.active_layer_id().unwrap());
        let original = comp.content(target).unwrap().pixels.to_rgba_image();
        let gesture = comp.begin_gesture();
        for i in 0..4u32 {
            apply_partial_change(&mut comp, target, PixelRect::new(i as i32, 0, 1, 1), false, "Brush", Some(gesture), |px| {
                px.put_pixel(i, 0, Rgba([0, 0, 0, 255]));
            })
            .unwrap();
        }
        assert_eq!(comp.history().undo_count(), 1);
        comp.undo().unwrap();
        assert_eq!(comp.content(target).unwrap().pixels.to_rgba_image(), original);
    }

    #[test]
    fn crop_and_undo_restore_every_buffer_and_size() {
        let mut comp = Composition::new(20, 10, &EngineSettings::default());
        let bg = comp.active_layer_id().unwrap();
        add_mask(&mut comp, bg, MaskInit::RevealAll).unwrap();
        let mut offset = Layer::new_image("offset", 4, 4);
        offset.image_mut().unwrap().pixels.fill(Rgba([9, 9, 9, 255]));
        offset.image_mut().unwrap().tx = 6;
        offset.image_mut().unwrap().ty = 2;
        let oid = add_layer(&mut comp, offset, HolderId::Root, None, AddToHistory::Yes).unwrap();

        crop(&mut comp, PixelRect::new(5, 1, 10, 5)).unwrap();
        assert_eq!((comp.width(), comp.height()), (10, 5));
        let cropped = comp.content(ContentTarget::image(oid)).unwrap();
        assert_eq!((cropped.tx, cropped.ty), (0, 0));
        assert_eq!(cropped.pixels.get_pixel(1, 1), &Rgba([9, 9, 9, 255]));
        assert_eq!(cropped.pixels.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(comp.content(ContentTarget::mask(bg)).unwrap().pixels.width(), 10);

        comp.undo().unwrap();
        assert_eq!((comp.width(), comp.height()), (20, 10));
        let restored = comp.content(ContentTarget::image(oid)).unwrap();
        assert_eq!((restored.tx, restored.ty, restored.pixels.width()), (6, 2, 4));
        assert_eq!(comp.content(ContentTarget::mask(bg)).unwrap().pixels.width(), 20);
    }

    #[test]
    fn enlarge_shifts_content_by_left_and_top_margins() {
        let mut comp = Composition::new(4, 4, &EngineSettings::default());
        let target = ContentTarget::image(comp.active_layer_id().unwrap());
        enlarge_canvas(&mut comp, 1, 2, 3, 4).unwrap();
        assert_eq!((comp.width(), comp.height()), (10, 8));
        let pixels = &comp.content(target).unwrap().pixels;
        assert_eq!(pixels.get_pixel(4, 1), &Rgba([255, 255, 255, 255]));
        assert_eq!(pixels.get_pixel(3, 1), &Rgba([0, 0, 0, 0]));
        comp.undo().unwrap();
        assert_eq!((comp.width(), comp.height()), (4, 4));
    }

    #[test]
    fn flatten_is_one_undo_step() {
        let mut comp = Composition::new(4, 4, &EngineSettings::default());
        let mut top = Layer::new_image("red", 4, 4);
        top.image_mut().unwrap().pixels.fill(Rgba([255, 0, 0, 255]));
        add_layer(&mut comp, top, HolderId::Root, None, AddToHistory::Yes).unwrap();
        add_layer(&mut comp, Layer::new_group("G", Vec::new()), HolderId::Root, None, AddToHistory::Yes).unwrap();
        let names_before: Vec<_> = comp.layers().iter().map(|l| l.name.clone()).collect();
        let active_before = comp.active_layer_id();

        flatten(&mut comp, &Compositor::new()).unwrap();
        assert_eq!(comp.num_layers(), 1);
        let flat = &comp.layers()[0];
        assert_eq!(flat.image().unwrap().pixels.get_pixel(2, 2), &Rgba([255, 0, 0, 255]));

        comp.undo().unwrap();
        let names_after: Vec<_> = comp.layers().iter().map(|l| l.name.clone()).collect();
        assert_eq!(names_after, names_before);
        assert_eq!(comp.active_layer_id(), active_before);
        assert!(comp.check_consistency().is_ok());
    }
}
