use std::sync::{Arc, Mutex};

use image::Rgba;
use paintstack::canvas::{PixelRect, TiledImage};
use paintstack::history::{ContentTarget, PartialImageEdit};
use paintstack::layer::{HolderId, Layer, LayerHolder, LayerId, MaskInit};
use paintstack::ops::canvas_ops::{apply_partial_change, crop};
use paintstack::ops::layer_ops::*;
use paintstack::ops::mask_ops::add_mask;
use paintstack::render::Compositor;
use paintstack::{Composition, EditError, EngineSettings, LayerEvent};

// ============================================================================
// FIXTURES
// ============================================================================

fn solid(name: &str, color: [u8; 4]) -> Layer {
    Layer::from_pixels(name, TiledImage::new_filled(16, 16, Rgba(color)))
}

/// [A, B, C] bottom to top, B active, no history.
fn abc() -> (Composition, [LayerId; 3]) {
    let mut comp = Composition::empty(16, 16, &EngineSettings::default());
    let a = add_layer(&mut comp, solid("A", [255, 0, 0, 255]), HolderId::Root, None, AddToHistory::No).unwrap();
    let b = add_layer(&mut comp, solid("B", [0, 0, 255, 255]), HolderId::Root, None, AddToHistory::No).unwrap();
    let mut dot = TiledImage::new(16, 16);
    dot.put_pixel(3, 3, Rgba([0, 255, 0, 255]));
    let c = add_layer(&mut comp, Layer::from_pixels("C", dot), HolderId::Root, None, AddToHistory::No).unwrap();
    comp.set_empty_capable(false);
    set_active_layer(&mut comp, b).unwrap();
    (comp, [a, b, c])
}

fn names(comp: &Composition) -> Vec<String> {
    comp.layers().iter().map(|l| l.name.clone()).collect()
}

/// Everything undo must restore: tree shape, properties, pixels, selection
/// and canvas size.
#[derive(Debug, PartialEq)]
struct Snapshot {
    size: (u32, u32),
    active: Option<LayerId>,
    layers: Vec<String>,
}

fn snapshot(comp: &Composition) -> Snapshot {
    fn visit(layers: &[Layer], depth: usize, out: &mut Vec<String>) {
        for layer in layers {
            let pixels = layer.image().map(|c| (c.tx, c.ty, c.pixels.to_rgba_image().into_raw()));
            let mask = layer.mask().and_then(|m| m.image()).map(|c| c.pixels.to_rgba_image().into_raw());
            out.push(format!(
                "{}{}:{}:{}:{}:{:?}:{:?}:{:?}",
                depth,
                layer.id(),
                layer.name,
                layer.visible,
                layer.opacity,
                layer.blend_mode,
                pixels,
                mask
            ));
            if let Some(group) = layer.as_group() {
                visit(group.children(), depth + 1, out);
            }
        }
    }
    let mut layers = Vec::new();
    visit(comp.layers(), 0, &mut layers);
    Snapshot {
        size: (comp.width(), comp.height()),
        active: comp.active_layer_id(),
        layers,
    }
}

fn record_events(comp: &mut Composition) -> Arc<Mutex<Vec<LayerEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    comp.subscribe(Box::new(move |e| sink.lock().unwrap().push(e.clone())));
    events
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn moving_active_layer_up_and_undo() {
    let (mut comp, [_, b, _]) = abc();
    assert!(move_active_layer_up(&mut comp).unwrap());
    assert_eq!(names(&comp), ["A", "C", "B"]);

    comp.undo().unwrap();
    assert_eq!(names(&comp), ["A", "B", "C"]);
    assert_eq!(comp.active_layer_id(), Some(b));
}

#[test]
fn grouping_non_adjacent_layers_and_undo() {
    let (mut comp, [a, b, c]) = abc();
    let before = snapshot(&comp);

    let group = convert_to_group(&mut comp, HolderId::Root, &[0, 2]).unwrap();
    assert_eq!(comp.num_layers(), 2);
    assert_eq!(comp.locate(b), Some((HolderId::Root, 0)));
    assert_eq!(comp.locate(group), Some((HolderId::Root, 1)));
    assert_eq!(comp.locate(a), Some((HolderId::Group(group), 0)));
    assert_eq!(comp.locate(c), Some((HolderId::Group(group), 1)));

    comp.undo().unwrap();
    assert_eq!(names(&comp), ["A", "B", "C"]);
    assert!(comp.find_layer(group).is_none());
    assert_eq!(snapshot(&comp), before);
}

#[test]
fn merge_down_and_undo_restore_pixels_exactly() {
    let (mut comp, [_, b, c]) = abc();
    let original_b = comp.find_layer(b).unwrap().image().unwrap().pixels.to_rgba_image();

    merge_down(&mut comp, c, &Compositor::new()).unwrap();
    assert_eq!(names(&comp), ["A", "B"]);
    let merged = &comp.find_layer(b).unwrap().image().unwrap().pixels;
    assert_eq!(merged.get_pixel(3, 3), &Rgba([0, 255, 0, 255]));
    assert_eq!(merged.get_pixel(4, 4), &Rgba([0, 0, 255, 255]));

    comp.undo().unwrap();
    assert_eq!(names(&comp), ["A", "B", "C"]);
    let restored = comp.find_layer(b).unwrap().image().unwrap().pixels.to_rgba_image();
    assert_eq!(restored.as_raw(), original_b.as_raw());
    assert!(comp.find_layer(c).is_some());
}

/// [A, B, G{C}] with C selected inside the group.
fn abc_with_c_grouped() -> (Composition, [LayerId; 3], LayerId) {
    let (mut comp, [a, b, c]) = abc();
    let group = convert_to_group(&mut comp, HolderId::Root, &[2]).unwrap();
    set_active_layer(&mut comp, c).unwrap();
    (comp, [a, b, c], group)
}

#[test]
fn deleting_group_with_selected_child_and_undo_reselects_child() {
    let (mut comp, [_, b, c], group) = abc_with_c_grouped();
    delete_layer(&mut comp, group).unwrap();
    assert_eq!(comp.active_layer_id(), Some(b));

    comp.undo().unwrap();
    assert_eq!(comp.active_layer_id(), Some(c));
    assert!(comp.check_consistency().is_ok());
}

#[test]
fn merging_group_with_selected_child_and_undo_reselects_child() {
    let (mut comp, [_, b, c], group) = abc_with_c_grouped();
    let before = snapshot(&comp);
    merge_down(&mut comp, group, &Compositor::new()).unwrap();
    assert_eq!(comp.active_layer_id(), Some(b));

    comp.undo().unwrap();
    assert_eq!(comp.active_layer_id(), Some(c));
    assert_eq!(snapshot(&comp), before);

    comp.redo().unwrap();
    assert_eq!(comp.active_layer_id(), Some(b));
}

#[test]
fn merge_down_rejects_hidden_layers_without_changes() {
    let (mut comp, [_, b, c]) = abc();
    set_visible(&mut comp, b, false).unwrap();
    let before = snapshot(&comp);
    let undo_count = comp.history().undo_count();

    let err = merge_down(&mut comp, c, &Compositor::new()).unwrap_err();
    assert!(matches!(err, EditError::InvalidState(_)));
    assert_eq!(snapshot(&comp), before);
    assert_eq!(comp.history().undo_count(), undo_count);
}

#[test]
fn partial_edit_outside_buffer_creates_nothing() {
    let (mut comp, [a, ..]) = abc();
    let edit = PartialImageEdit::create(
        &mut comp,
        "Brush",
        ContentTarget::image(a),
        PixelRect::new(100, 100, 8, 8),
        false,
    );
    assert!(matches!(edit, Ok(None)));
}

#[test]
fn deleting_last_root_layer_is_a_constraint_violation() {
    let mut comp = Composition::new(8, 8, &EngineSettings::default());
    let only = comp.active_layer_id().unwrap();
    let before = snapshot(&comp);

    let err = delete_layer(&mut comp, only).unwrap_err();
    assert!(matches!(err, EditError::ConstraintViolation(_)));
    assert_eq!(snapshot(&comp), before);
    assert!(!comp.can_undo());
}

#[test]
fn reorder_to_same_index_is_silent() {
    let (mut comp, _) = abc();
    let events = record_events(&mut comp);

    assert!(!reorder(&mut comp, HolderId::Root, 1, 1).unwrap());
    assert!(!comp.can_undo());
    assert!(events.lock().unwrap().is_empty());

    assert!(reorder(&mut comp, HolderId::Root, 0, 1).unwrap());
    let seen = events.lock().unwrap();
    assert_eq!(seen.as_slice(), [LayerEvent::OrderChanged { holder: HolderId::Root }]);
}

#[test]
fn move_into_is_all_or_nothing() {
    let (mut comp, [a, _, c]) = abc();
    let group = convert_to_group(&mut comp, HolderId::Root, &[2]).unwrap();
    let before = snapshot(&comp);
    let undo_count = comp.history().undo_count();

    // Index past the end of the target.
    assert!(move_into(&mut comp, a, HolderId::Group(group), 5).is_err());
    // Target holder does not exist.
    assert!(move_into(&mut comp, a, HolderId::Group(LayerId::new()), 0).is_err());
    // A group cannot move into itself.
    assert!(move_into(&mut comp, group, HolderId::Group(group), 0).is_err());

    assert_eq!(snapshot(&comp), before);
    assert_eq!(comp.history().undo_count(), undo_count);
    assert!(comp.check_consistency().is_ok());

    move_into(&mut comp, a, HolderId::Group(group), 1).unwrap();
    assert_eq!(comp.locate(a), Some((HolderId::Group(group), 1)));
    assert_eq!(comp.locate(c), Some((HolderId::Group(group), 0)));
    comp.undo().unwrap();
    assert_eq!(snapshot(&comp), before);
}

#[test]
fn reclaimed_backup_makes_undo_fail() {
    let (mut comp, [a, ..]) = abc();
    let target = ContentTarget::image(a);
    apply_partial_change(&mut comp, target, PixelRect::new(0, 0, 4, 4), false, "Brush", None, |px| {
        px.put_pixel(0, 0, Rgba([1, 2, 3, 255]));
    })
    .unwrap();
    assert!(comp.can_undo());

    assert!(comp.reclaim_backups(usize::MAX) > 0);
    assert!(!comp.can_undo());
    let err = comp.undo().unwrap_err();
    assert!(matches!(err, EditError::CannotUndo(_)));
    // The live document is untouched.
    assert_eq!(comp.content(target).unwrap().pixels.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
    assert!(comp.check_consistency().is_ok());
}

#[test]
fn brush_dabs_in_one_gesture_coalesce() {
    let (mut comp, [a, ..]) = abc();
    let target = ContentTarget::image(a);
    let before = snapshot(&comp);

    let stroke = comp.begin_gesture();
    for x in 0..10u32 {
        apply_partial_change(&mut comp, target, PixelRect::new(x as i32, 2, 1, 1), false, "Brush", Some(stroke), |px| {
            px.put_pixel(x, 2, Rgba([9, 9, 9, 255]));
        })
        .unwrap();
    }
    let next = comp.begin_gesture();
    apply_partial_change(&mut comp, target, PixelRect::new(0, 5, 1, 1), false, "Brush", Some(next), |px| {
        px.put_pixel(0, 5, Rgba([9, 9, 9, 255]));
    })
    .unwrap();

    assert_eq!(comp.history().undo_count(), 2);
    comp.undo().unwrap();
    comp.undo().unwrap();
    assert_eq!(snapshot(&comp), before);
}

#[test]
fn n_commits_then_n_undos_restore_the_document() {
    let (mut comp, [a, b, c]) = abc();
    let before = snapshot(&comp);

    add_new_image_layer(&mut comp).unwrap();
    apply_partial_change(&mut comp, ContentTarget::image(b), PixelRect::new(2, 2, 3, 3), false, "Brush", None, |px| {
        for y in 2..5 {
            for x in 2..5 {
                px.put_pixel(x, y, Rgba([7, 7, 7, 255]));
            }
        }
    })
    .unwrap();
    set_opacity(&mut comp, a, 0.25, None).unwrap();
    reorder(&mut comp, HolderId::Root, 0, 3).unwrap();
    let group = convert_to_group(&mut comp, HolderId::Root, &[1, 2]).unwrap();
    add_mask(&mut comp, group, MaskInit::HideAll).unwrap();
    move_into(&mut comp, c, HolderId::Group(group), 0).unwrap();
    duplicate_layer(&mut comp, c).unwrap();
    crop(&mut comp, PixelRect::new(2, 2, 10, 10)).unwrap();
    let commits = comp.history().undo_count();
    assert_eq!(commits, 9);
    assert!(comp.check_consistency().is_ok());

    assert_eq!(comp.undo_to(commits).unwrap(), commits);
    assert_eq!(snapshot(&comp), before);
    assert!(comp.check_consistency().is_ok());
}

#[test]
fn undo_then_redo_is_a_no_op() {
    let (mut comp, [a, b, c]) = abc();
    let check = |comp: &mut Composition| {
        let after = snapshot(comp);
        comp.undo().unwrap();
        comp.redo().unwrap();
        assert_eq!(snapshot(comp), after);
        comp.undo().unwrap();
        comp.redo().unwrap();
        assert_eq!(snapshot(comp), after);
    };

    apply_partial_change(&mut comp, ContentTarget::image(a), PixelRect::new(0, 0, 2, 2), false, "Brush", None, |px| {
        px.put_pixel(1, 1, Rgba([5, 5, 5, 255]));
    })
    .unwrap();
    check(&mut comp);

    move_active_layer_up(&mut comp).unwrap();
    check(&mut comp);

    let group = convert_to_group(&mut comp, HolderId::Root, &[0, 1]).unwrap();
    check(&mut comp);

    ungroup(&mut comp, group).unwrap();
    check(&mut comp);

    set_active_layer(&mut comp, b).unwrap();
    merge_down(&mut comp, b, &Compositor::new()).unwrap();
    check(&mut comp);

    delete_layer(&mut comp, c).unwrap();
    check(&mut comp);

    assert!(comp.check_consistency().is_ok());
}

#[test]
fn events_fire_for_undo_and_redo_too() {
    let (mut comp, _) = abc();
    let events = record_events(&mut comp);
    let id = add_new_image_layer(&mut comp).unwrap();
    comp.undo().unwrap();
    comp.redo().unwrap();

    let seen = events.lock().unwrap();
    let added = seen.iter().filter(|e| matches!(e, LayerEvent::LayerAdded { layer, .. } if *layer == id)).count();
    let removed = seen.iter().filter(|e| matches!(e, LayerEvent::LayerRemoved { layer, .. } if *layer == id)).count();
    assert_eq!((added, removed), (2, 1));
}

#[test]
fn new_commit_clears_redo() {
    let (mut comp, [a, ..]) = abc();
    rename(&mut comp, a, "first").unwrap();
    comp.undo().unwrap();
    assert!(comp.can_redo());
    rename(&mut comp, a, "second").unwrap();
    assert!(!comp.can_redo());
    assert!(matches!(comp.redo(), Err(EditError::CannotRedo(_))));
}
