// ============================================================================
// LAYER HOLDER OPERATIONS - add / delete / reorder / group / merge / select
// ============================================================================

use crate::canvas::BlendMode;
use crate::composition::Composition;
use crate::error::{EditError, EditResult};
use crate::events::LayerEvent;
use crate::history::structure::transfer;
use crate::history::{
    AddLayerEdit, ChangeHolderEdit, DeleteLayerEdit, EditKind, GroupingEdit, LayerOrderChangeEdit,
    LayerPropertyEdit, MergeDownEdit,
};
use crate::layer::{walk, HolderId, Layer, LayerHolder, LayerId, LayerProps};
use crate::render::LayerRenderer;

/// Whether a structural operation records an edit. `No` is for programmatic
/// construction such as loading a saved document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddToHistory {
    Yes,
    No,
}

fn locate(comp: &Composition, id: LayerId) -> EditResult<(HolderId, usize)> {
    comp.locate(id).ok_or(EditError::LayerNotFound(id))
}

fn holder_len(comp: &Composition, holder: HolderId) -> EditResult<usize> {
    comp.holder(holder)
        .map(|h| h.num_layers())
        .ok_or_else(|| EditError::invalid(format!("{} does not exist", holder)))
}

/// Holder and index just above the active layer, or the top of the root.
fn slot_above_active(comp: &Composition) -> (HolderId, usize) {
    match comp.active_layer_id().and_then(|id| comp.locate(id)) {
        Some((holder, index)) => (holder, index + 1),
        None => (HolderId::Root, comp.num_layers()),
    }
}

// ---- add / delete -----------------------------------------------------------

/// Insert a detached layer into `holder` at `index` (top when `None`) and make
/// it active.
pub fn add_layer(
    comp: &mut Composition,
    layer: Layer,
    holder: HolderId,
    index: Option<usize>,
    history: AddToHistory,
) -> EditResult<LayerId> {
    add_layer_named(comp, layer, holder, index, history, "Add Layer")
}

fn add_layer_named(
    comp: &mut Composition,
    layer: Layer,
    holder: HolderId,
    index: Option<usize>,
    history: AddToHistory,
    name: &str,
) -> EditResult<LayerId> {
    let id = layer.id();
    if let Some(owner) = layer.holder() {
        return Err(EditError::invalid(format!("layer {} already belongs to {}", id, owner)));
    }
    let mut duplicate = None;
    walk(std::slice::from_ref(&layer), &mut |l| {
        if duplicate.is_none() && comp.find_layer(l.id()).is_some() {
            duplicate = Some(l.id());
        }
    });
    if let Some(dup) = duplicate {
        return Err(EditError::invalid(format!("layer {} is already in the document", dup)));
    }
    let index = match index {
        Some(index) => index,
        None => holder_len(comp, holder)?,
    };
    comp.check_insert(holder, index)?;

    let prev_active = comp.active_layer_id();
    comp.insert_raw(holder, layer, index)?;
    comp.set_active_raw(Some(id));
    if history == AddToHistory::Yes {
        comp.add_edit(Box::new(AddLayerEdit::new(name, holder, index, id, prev_active)));
    }
    Ok(id)
}

/// New transparent canvas-sized layer above the active one.
pub fn add_new_image_layer(comp: &mut Composition) -> EditResult<LayerId> {
    let name = comp.next_layer_name();
    let layer = Layer::new_image(name, comp.width(), comp.height());
    let (holder, index) = slot_above_active(comp);
    add_layer_named(comp, layer, holder, Some(index), AddToHistory::Yes, "New Layer")
}

/// New empty group above the active layer.
pub fn add_empty_group(comp: &mut Composition) -> EditResult<LayerId> {
    let name = comp.next_group_name();
    let (holder, index) = slot_above_active(comp);
    add_layer_named(comp, Layer::new_group(name, Vec::new()), holder, Some(index), AddToHistory::Yes, "New Group")
}

/// Copy of a layer (fresh ids throughout) placed right above it.
pub fn duplicate_layer(comp: &mut Composition, id: LayerId) -> EditResult<LayerId> {
    let (holder, index) = locate(comp, id)?;
    let copy = {
        let source = comp.find_layer(id).ok_or(EditError::LayerNotFound(id))?;
        source.duplicate(format!("{} copy", source.name))
    };
    add_layer_named(comp, copy, holder, Some(index + 1), AddToHistory::Yes, "Duplicate Layer")
}

/// Delete a layer with history. Refuses to empty a holder that must keep a
/// child.
pub fn delete_layer(comp: &mut Composition, id: LayerId) -> EditResult<()> {
    let (holder, index) = locate(comp, id)?;
    let keeps_child = comp.holder(holder).is_some_and(|h| h.num_layers() == 1 && !h.can_be_empty());
    if keeps_child {
        crate::log_warn!("Refusing to delete the last layer of {}", holder);
        return Err(EditError::ConstraintViolation(format!("cannot delete the last layer of {}", holder)));
    }
    let (holder, index, removed, prev_active) = detach(comp, id, holder, index)?;
    comp.add_edit(Box::new(DeleteLayerEdit::new(holder, index, removed, prev_active)));
    Ok(())
}

/// Detach a layer without the emptiness check and without history. Meant
/// for multi-step operations that restore the holder's invariant before
/// they finish. Returns where the layer was and the active layer from
/// before the removal.
pub fn delete_temporarily(
    comp: &mut Composition,
    id: LayerId,
) -> EditResult<(HolderId, usize, Layer, Option<LayerId>)> {
    let (holder, index) = locate(comp, id)?;
    detach(comp, id, holder, index)
}

fn detach(
    comp: &mut Composition,
    id: LayerId,
    holder: HolderId,
    index: usize,
) -> EditResult<(HolderId, usize, Layer, Option<LayerId>)> {
    let prev_active = comp.active_layer_id();
    let removed = comp.remove_raw(holder, index)?;
    comp.repair_active((holder, index));
    Ok((holder, index, removed, prev_active))
}

// ---- order ------------------------------------------------------------------

/// Move the child at `old_index` to `new_index`. Returns `Ok(false)`, with no
/// edit and no event, when the indices are equal or out of range.
pub fn reorder(comp: &mut Composition, holder: HolderId, old_index: usize, new_index: usize) -> EditResult<bool> {
    reorder_named(comp, holder, old_index, new_index, "Layer Order Change")
}

fn reorder_named(
    comp: &mut Composition,
    holder: HolderId,
    old_index: usize,
    new_index: usize,
    name: &str,
) -> EditResult<bool> {
    let len = holder_len(comp, holder)?;
    if old_index == new_index || old_index >= len || new_index >= len {
        return Ok(false);
    }
    comp.move_raw(holder, old_index, new_index)?;
    comp.add_edit(Box::new(LayerOrderChangeEdit::new(name, holder, old_index, new_index)));
    Ok(true)
}

/// Transfer a layer into another holder at `index`. Either the whole move
/// happens or nothing does. Within the same holder this is a reorder.
pub fn move_into(comp: &mut Composition, id: LayerId, target: HolderId, index: usize) -> EditResult<()> {
    move_into_named(comp, id, target, index, "Move Layer")
}

fn move_into_named(comp: &mut Composition, id: LayerId, target: HolderId, index: usize, name: &str) -> EditResult<()> {
    let from = locate(comp, id)?;
    if from.0 == target {
        let last = holder_len(comp, target)?.saturating_sub(1);
        reorder_named(comp, target, from.1, index.min(last), name)?;
        return Ok(());
    }
    if let Err(err) = transfer(comp, id, from, (target, index)) {
        crate::log_warn!("Move of layer {} into {} rejected: {}", id, target, err);
        return Err(err);
    }
    comp.add_edit(Box::new(ChangeHolderEdit::new(name, id, from, (target, index))));
    Ok(())
}

/// Move the active layer one step up. Crossing a group boundary enters the
/// group above (at its bottom) or leaves the current group to sit just above
/// it. Returns `Ok(false)` at the top of the root.
pub fn move_active_layer_up(comp: &mut Composition) -> EditResult<bool> {
    let Some(id) = comp.active_layer_id() else { return Ok(false) };
    let (holder, index) = locate(comp, id)?;
    let len = holder_len(comp, holder)?;

    if index + 1 == len {
        let HolderId::Group(gid) = holder else { return Ok(false) };
        let (parent, group_index) = locate(comp, gid)?;
        move_into_named(comp, id, parent, group_index + 1, "Move Layer Up")?;
        return Ok(true);
    }

    let neighbor = comp.holder(holder).and_then(|h| h.layer(index + 1)).filter(|l| l.is_group()).map(Layer::id);
    match neighbor {
        Some(gid) => move_into_named(comp, id, HolderId::Group(gid), 0, "Move Layer Up").map(|_| true),
        None => reorder_named(comp, holder, index, index + 1, "Move Layer Up"),
    }
}

/// Mirror image of [`move_active_layer_up`].
pub fn move_active_layer_down(comp: &mut Composition) -> EditResult<bool> {
    let Some(id) = comp.active_layer_id() else { return Ok(false) };
    let (holder, index) = locate(comp, id)?;

    if index == 0 {
        let HolderId::Group(gid) = holder else { return Ok(false) };
        let (parent, group_index) = locate(comp, gid)?;
        move_into_named(comp, id, parent, group_index, "Move Layer Down")?;
        return Ok(true);
    }

    let neighbor = comp
        .holder(holder)
        .and_then(|h| h.layer(index - 1))
        .and_then(|l| l.as_group().map(|g| (l.id(), g.num_layers())));
    match neighbor {
        Some((gid, len)) => move_into_named(comp, id, HolderId::Group(gid), len, "Move Layer Down").map(|_| true),
        None => reorder_named(comp, holder, index, index - 1, "Move Layer Down"),
    }
}

pub fn move_active_layer_to_top(comp: &mut Composition) -> EditResult<bool> {
    let Some(id) = comp.active_layer_id() else { return Ok(false) };
    let (holder, index) = locate(comp, id)?;
    let last = holder_len(comp, holder)? - 1;
    reorder_named(comp, holder, index, last, "Layer to Top")
}

pub fn move_active_layer_to_bottom(comp: &mut Composition) -> EditResult<bool> {
    let Some(id) = comp.active_layer_id() else { return Ok(false) };
    let (holder, index) = locate(comp, id)?;
    reorder_named(comp, holder, index, 0, "Layer to Bottom")
}

// ---- merge ------------------------------------------------------------------

/// Checks the merge preconditions: not the bottom child, both layers
/// visible, the layer below an image layer. Returns the layer's slot.
pub fn can_merge_down(comp: &Composition, id: LayerId) -> EditResult<(HolderId, usize)> {
    let (holder, index) = locate(comp, id)?;
    if index == 0 {
        return Err(EditError::invalid("the bottom layer cannot be merged down"));
    }
    let h = comp
        .holder(holder)
        .ok_or_else(|| EditError::invalid(format!("{} does not exist", holder)))?;
    let (Some(layer), Some(below)) = (h.layer(index), h.layer(index - 1)) else {
        return Err(EditError::LayerNotFound(id));
    };
    if !layer.visible || !below.visible {
        return Err(EditError::invalid("both layers must be visible to merge"));
    }
    if !below.is_image() {
        return Err(EditError::invalid("the layer below is not an image layer"));
    }
    Ok((holder, index))
}

/// Composite `id` onto the image layer below it, then remove it.
pub fn merge_down(comp: &mut Composition, id: LayerId, renderer: &dyn LayerRenderer) -> EditResult<()> {
    let (holder, index) = can_merge_down(comp, id)?;

    let (below, before) = {
        let children = comp.holder_mut(holder)?.children_mut();
        let (lower, upper) = children.split_at_mut(index);
        let top = &upper[0];
        let below = &mut lower[index - 1];
        let below_id = below.id();
        let content = below
            .image_mut()
            .ok_or_else(|| EditError::invalid("the layer below is not an image layer"))?;
        let before = content.clone();
        let origin = (content.tx, content.ty);
        if let Some(replacement) = renderer.render(top, &mut content.pixels, origin) {
            content.pixels = replacement;
        }
        (below_id, before)
    };
    comp.emit(LayerEvent::LayerChanged { layer: below });

    let prev_active = comp.active_layer_id();
    let removed = comp.remove_raw(holder, index)?;
    if prev_active.is_some_and(|a| a == id || removed.contains_descendant(a)) {
        comp.set_active_raw(Some(below));
    }
    comp.repair_active((holder, index));
    comp.add_edit(Box::new(MergeDownEdit::new(holder, index, removed, below, before, prev_active)));
    Ok(())
}

// ---- grouping ---------------------------------------------------------------

/// Wrap the children at `indices` of `holder` into a new group placed where
/// their span was. The group becomes active.
pub fn convert_to_group(comp: &mut Composition, holder: HolderId, indices: &[usize]) -> EditResult<LayerId> {
    let mut indices = indices.to_vec();
    indices.sort_unstable();
    indices.dedup();
    if indices.is_empty() {
        return Err(EditError::invalid("no layers to group"));
    }
    let group_index = GroupingEdit::group_index_for(&indices);
    let name = comp.next_group_name();
    let shell = Layer::new_group(name, Vec::new());
    let group_id = shell.id();

    let active_before = comp.active_layer_id();
    GroupingEdit::group(comp, holder, &indices, group_index, shell)?;
    comp.set_active_raw(Some(group_id));
    comp.add_edit(Box::new(GroupingEdit::new(
        holder,
        group_id,
        indices,
        group_index,
        true,
        (active_before, Some(group_id)),
    )));
    Ok(group_id)
}

/// Group every visible top-level layer.
pub fn convert_visible_to_group(comp: &mut Composition) -> EditResult<LayerId> {
    let indices: Vec<usize> = comp
        .layers()
        .iter()
        .enumerate()
        .filter(|(_, l)| l.visible)
        .map(|(i, _)| i)
        .collect();
    convert_to_group(comp, HolderId::Root, &indices)
}

/// Replace a group by its children, in place.
pub fn ungroup(comp: &mut Composition, group_id: LayerId) -> EditResult<()> {
    let (holder, group_index) = locate(comp, group_id)?;
    let (count, len, can_be_empty) = {
        let h = comp
            .holder(holder)
            .ok_or_else(|| EditError::invalid(format!("{} does not exist", holder)))?;
        let group = h
            .layer(group_index)
            .and_then(Layer::as_group)
            .ok_or_else(|| EditError::invalid(format!("layer {} is not a group", group_id)))?;
        (group.num_layers(), h.num_layers(), h.can_be_empty())
    };
    if count == 0 && len == 1 && !can_be_empty {
        return Err(EditError::ConstraintViolation(format!("cannot remove the last layer of {}", holder)));
    }

    let active_before = comp.active_layer_id();
    let top_child = comp
        .find_layer(group_id)
        .and_then(Layer::as_group)
        .and_then(|g| g.children().last())
        .map(Layer::id);
    let indices: Vec<usize> = (group_index..group_index + count).collect();
    let shell = GroupingEdit::ungroup(comp, holder, group_id, group_index, &indices)?;
    if active_before == Some(group_id) {
        comp.set_active_raw(top_child);
    }
    comp.repair_active((holder, group_index));
    let active_after = comp.active_layer_id();
    comp.add_edit(Box::new(
        GroupingEdit::new(holder, group_id, indices, group_index, false, (active_before, active_after))
            .with_shell(shell),
    ));
    Ok(())
}

// ---- selection --------------------------------------------------------------

pub fn set_active_layer(comp: &mut Composition, id: LayerId) -> EditResult<()> {
    if comp.find_layer(id).is_none() {
        return Err(EditError::LayerNotFound(id));
    }
    comp.set_active_raw(Some(id));
    Ok(())
}

/// Select the layer above the active one. Past the top of a group the
/// selection climbs to the group itself; at the top of the root nothing
/// happens. Returns whether the selection changed.
pub fn raise_layer_selection(comp: &mut Composition) -> bool {
    let Some((holder, index)) = comp.active_layer_id().and_then(|id| comp.locate(id)) else {
        return false;
    };
    let next = match comp.holder(holder).and_then(|h| h.layer(index + 1)) {
        Some(layer) => Some(layer.id()),
        None => match holder {
            HolderId::Group(gid) => Some(gid),
            HolderId::Root => None,
        },
    };
    match next {
        Some(id) => {
            comp.set_active_raw(Some(id));
            true
        }
        None => false,
    }
}

/// Select the layer below the active one. An active non-empty group
/// descends to its top child. At the bottom of a holder nothing happens.
pub fn lower_layer_selection(comp: &mut Composition) -> bool {
    let Some(active) = comp.active_layer() else { return false };
    if let Some(top_child) = active.as_group().and_then(|g| g.children().last()) {
        let id = top_child.id();
        comp.set_active_raw(Some(id));
        return true;
    }
    let Some((holder, index)) = comp.locate(active.id()) else { return false };
    if index == 0 {
        return false;
    }
    let below = comp.holder(holder).and_then(|h| h.layer(index - 1)).map(Layer::id);
    comp.set_active_raw(below);
    below.is_some()
}

// ---- properties -------------------------------------------------------------

/// Apply a property change and record it. No edit when nothing changed.
pub(crate) fn change_props(
    comp: &mut Composition,
    id: LayerId,
    name: &str,
    gesture: Option<(EditKind, u64)>,
    change: impl FnOnce(&mut LayerProps),
) -> EditResult<bool> {
    let layer = comp.layer_mut(id)?;
    let before = layer.props();
    let mut after = before.clone();
    change(&mut after);
    if after == before {
        return Ok(false);
    }
    layer.apply_props(&after);
    comp.emit(LayerEvent::LayerChanged { layer: id });

    let mut edit = LayerPropertyEdit::new(name, id, before, after);
    if let Some((kind, gesture)) = gesture {
        edit = edit.with_gesture(kind, gesture);
    }
    comp.add_edit(Box::new(edit));
    Ok(true)
}

pub fn set_visible(comp: &mut Composition, id: LayerId, visible: bool) -> EditResult<bool> {
    let name = if visible { "Show Layer" } else { "Hide Layer" };
    change_props(comp, id, name, None, |p| p.visible = visible)
}

/// Edits sharing a `gesture` (from [`Composition::begin_gesture`]) merge into
/// one history entry, so an opacity slider drag undoes in one step.
pub fn set_opacity(comp: &mut Composition, id: LayerId, opacity: f32, gesture: Option<u64>) -> EditResult<bool> {
    let opacity = opacity.clamp(0.0, 1.0);
    let gesture = gesture.map(|g| (EditKind::Opacity, g));
    change_props(comp, id, "Layer Opacity Change", gesture, |p| p.opacity = opacity)
}

pub fn set_blend_mode(comp: &mut Composition, id: LayerId, mode: BlendMode) -> EditResult<bool> {
    change_props(comp, id, "Blending Mode Change", None, |p| p.blend_mode = mode)
}

pub fn rename(comp: &mut Composition, id: LayerId, name: impl Into<String>) -> EditResult<bool> {
    let name = name.into();
    change_props(comp, id, "Rename Layer", None, |p| p.name = name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;

    fn abc() -> (Composition, [LayerId; 3]) {
        let mut comp = Composition::empty(8, 8, &EngineSettings::default());
        let mut ids = [LayerId::new(); 3];
        for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
            ids[i] = add_layer(&mut comp, Layer::new_image(name, 8, 8), HolderId::Root, None, AddToHistory::No).unwrap();
        }
        comp.set_empty_capable(false);
        (comp, ids)
    }

    fn names(layers: &[Layer]) -> Vec<String> {
        layers.iter().map(|l| l.name.clone()).collect()
    }

    #[test]
    fn adding_an_owned_layer_is_rejected() {
        let (mut comp, [a, ..]) = abc();
        let owned = comp.find_layer(a).unwrap().clone();
        let err = add_layer(&mut comp, owned, HolderId::Root, None, AddToHistory::Yes).unwrap_err();
        assert!(matches!(err, EditError::InvalidState(_)));
        assert_eq!(comp.num_layers(), 3);
        assert!(!comp.can_undo());
    }

    #[test]
    fn add_then_undo_restores_previous_selection() {
        let (mut comp, [_, b, _]) = abc();
        set_active_layer(&mut comp, b).unwrap();
        let new = add_new_image_layer(&mut comp).unwrap();
        assert_eq!(comp.locate(new), Some((HolderId::Root, 2)));
        assert_eq!(comp.active_layer_id(), Some(new));

        comp.undo().unwrap();
        assert_eq!(names(comp.layers()), ["A", "B", "C"]);
        assert_eq!(comp.active_layer_id(), Some(b));
        comp.redo().unwrap();
        assert_eq!(comp.find_layer(new).map(|l| l.holder()), Some(Some(HolderId::Root)));
    }

    #[test]
    fn delete_and_undo_restores_position_and_selection() {
        let (mut comp, [a, b, _]) = abc();
        set_active_layer(&mut comp, b).unwrap();
        delete_layer(&mut comp, b).unwrap();
        assert_eq!(names(comp.layers()), ["A", "C"]);
        assert_eq!(comp.active_layer_id(), Some(a));

        comp.undo().unwrap();
        assert_eq!(names(comp.layers()), ["A", "B", "C"]);
        assert_eq!(comp.active_layer_id(), Some(b));
    }

    #[test]
    fn reorder_moves_and_undoes() {
        let (mut comp, _) = abc();
        assert!(reorder(&mut comp, HolderId::Root, 0, 2).unwrap());
        assert_eq!(names(comp.layers()), ["B", "C", "A"]);
        assert!(!reorder(&mut comp, HolderId::Root, 5, 0).unwrap());
        comp.undo().unwrap();
        assert_eq!(names(comp.layers()), ["A", "B", "C"]);
    }

    #[test]
    fn moving_up_enters_group_above_and_exits_at_top() {
        let (mut comp, [a, b, c]) = abc();
        let group = convert_to_group(&mut comp, HolderId::Root, &[2]).unwrap();
        assert_eq!(names(comp.layers()), ["A", "B", "Group 1"]);

        set_active_layer(&mut comp, b).unwrap();
        assert!(move_active_layer_up(&mut comp).unwrap());
        assert_eq!(comp.locate(b), Some((HolderId::Group(group), 0)));
        assert_eq!(comp.locate(c), Some((HolderId::Group(group), 1)));

        assert!(move_active_layer_up(&mut comp).unwrap());
        assert_eq!(comp.locate(b), Some((HolderId::Group(group), 1)));
        assert!(move_active_layer_up(&mut comp).unwrap());
        assert_eq!(comp.locate(b), Some((HolderId::Root, 2)));
        assert!(!move_active_layer_up(&mut comp).unwrap());

        comp.undo().unwrap();
        comp.undo().unwrap();
        comp.undo().unwrap();
        assert_eq!(comp.locate(b), Some((HolderId::Root, 1)));
        assert_eq!(comp.locate(a), Some((HolderId::Root, 0)));
        assert!(comp.check_consistency().is_ok());
    }

    #[test]
    fn moving_down_leaves_group_below_it() {
        let (mut comp, [_, b, c]) = abc();
        let group = convert_to_group(&mut comp, HolderId::Root, &[1, 2]).unwrap();
        set_active_layer(&mut comp, b).unwrap();
        assert!(move_active_layer_down(&mut comp).unwrap());
        assert_eq!(comp.locate(b), Some((HolderId::Root, 1)));
        assert_eq!(comp.locate(group), Some((HolderId::Root, 2)));

        set_active_layer(&mut comp, c).unwrap();
        move_active_layer_to_bottom(&mut comp).unwrap();
        assert_eq!(comp.locate(c), Some((HolderId::Group(group), 0)));
    }

    #[test]
    fn move_into_own_descendant_is_rejected_atomically() {
        let (mut comp, [a, ..]) = abc();
        let outer = convert_to_group(&mut comp, HolderId::Root, &[1, 2]).unwrap();
        let inner = add_empty_group(&mut comp).unwrap();
        move_into(&mut comp, inner, HolderId::Group(outer), 0).unwrap();
        let undo_count = comp.history().undo_count();

        let err = move_into(&mut comp, outer, HolderId::Group(inner), 0).unwrap_err();
        assert!(matches!(err, EditError::InvalidState(_)));
        assert_eq!(comp.locate(outer), Some((HolderId::Root, 1)));
        assert_eq!(comp.history().undo_count(), undo_count);

        let err = move_into(&mut comp, a, HolderId::Group(inner), 7).unwrap_err();
        assert!(matches!(err, EditError::InvalidState(_)));
        assert_eq!(comp.locate(a), Some((HolderId::Root, 0)));
        assert!(comp.check_consistency().is_ok());
    }

    #[test]
    fn ungroup_restores_children_in_place_and_undoes() {
        let (mut comp, [a, b, c]) = abc();
        let group = convert_to_group(&mut comp, HolderId::Root, &[0, 1]).unwrap();
        ungroup(&mut comp, group).unwrap();
        assert_eq!(names(comp.layers()), ["A", "B", "C"]);
        assert_eq!(comp.active_layer_id(), Some(b));

        comp.undo().unwrap();
        assert_eq!(comp.locate(a), Some((HolderId::Group(group), 0)));
        assert_eq!(comp.locate(c), Some((HolderId::Root, 1)));
        assert_eq!(comp.active_layer_id(), Some(group));
    }

    #[test]
    fn selection_climbs_out_of_groups_and_descends_into_them() {
        let (mut comp, [a, b, c]) = abc();
        let group = convert_to_group(&mut comp, HolderId::Root, &[1, 2]).unwrap();

        set_active_layer(&mut comp, c).unwrap();
        assert!(raise_layer_selection(&mut comp));
        assert_eq!(comp.active_layer_id(), Some(group));
        assert!(!raise_layer_selection(&mut comp));

        assert!(lower_layer_selection(&mut comp));
        assert_eq!(comp.active_layer_id(), Some(c));
        assert!(lower_layer_selection(&mut comp));
        assert_eq!(comp.active_layer_id(), Some(b));
        assert!(!lower_layer_selection(&mut comp));

        set_active_layer(&mut comp, a).unwrap();
        assert!(!lower_layer_selection(&mut comp));
        assert_eq!(comp.history().undo_description().as_deref(), Some("Group Layers"));
    }

    #[test]
    fn opacity_drag_coalesces_into_one_undo_step() {
        let (mut comp, [a, ..]) = abc();
        let gesture = comp.begin_gesture();
        for step in 1..=5 {
            set_opacity(&mut comp, a, 1.0 - step as f32 * 0.1, Some(gesture)).unwrap();
        }
        assert_eq!(comp.history().undo_count(), 1);
        assert!((comp.find_layer(a).unwrap().opacity - 0.5).abs() < 1e-6);

        comp.undo().unwrap();
        assert_eq!(comp.find_layer(a).unwrap().opacity, 1.0);
        assert!(!comp.can_undo());
    }

    #[test]
    fn unchanged_property_records_nothing() {
        let (mut comp, [a, ..]) = abc();
        assert!(!set_visible(&mut comp, a, true).unwrap());
        assert!(rename(&mut comp, a, "Base").unwrap());
        assert!(set_blend_mode(&mut comp, a, BlendMode::Multiply).unwrap());
        assert_eq!(comp.history().undo_count(), 2);
        comp.undo().unwrap();
        comp.undo().unwrap();
        assert_eq!(comp.find_layer(a).unwrap().name, "A");
    }
}
