use crate::composition::Composition;
use crate::error::{EditError, EditResult};
use crate::events::LayerEvent;
use crate::layer::{HolderId, ImageContent, Layer, LayerHolder, LayerId, LayerProps};

use super::{Edit, EditKind, GestureKey};

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Remove the child at `index`, insisting that it is the expected layer.
fn remove_expected(comp: &mut Composition, holder: HolderId, index: usize, id: LayerId) -> EditResult<Layer> {
    let found = comp.holder(holder).and_then(|h| h.layer(index)).map(Layer::id);
    if found != Some(id) {
        return Err(EditError::invalid(format!(
            "expected layer {} at index {} of {}",
            id, index, holder
        )));
    }
    comp.remove_raw(holder, index)
}

fn take_stash<T>(stash: &mut Option<T>, what: &str) -> EditResult<T> {
    stash
        .take()
        .ok_or_else(|| EditError::invalid(format!("{} is not detached", what)))
}

/// Select `id` if it is still in the tree, otherwise leave the selection be.
fn restore_active(comp: &mut Composition, id: Option<LayerId>) {
    match id {
        Some(id) if comp.find_layer(id).is_some() => comp.set_active_raw(Some(id)),
        None => comp.set_active_raw(None),
        Some(_) => {}
    }
}

fn stash_bytes(stash: &Option<Layer>) -> usize {
    stash.as_ref().map_or(0, Layer::memory_bytes)
}

// ============================================================================
// ADD / DELETE
// ============================================================================

/// Records a layer insertion. On undo the layer is detached and kept here
/// until redo puts it back.
pub struct AddLayerEdit {
    name: String,
    holder: HolderId,
    index: usize,
    layer: LayerId,
    prev_active: Option<LayerId>,
    stash: Option<Layer>,
}

impl AddLayerEdit {
    pub fn new(
        name: impl Into<String>,
        holder: HolderId,
        index: usize,
        layer: LayerId,
        prev_active: Option<LayerId>,
    ) -> Self {
        Self {
            name: name.into(),
            holder,
            index,
            layer,
            prev_active,
            stash: None,
        }
    }
}

impl Edit for AddLayerEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if !comp.holder(self.holder).is_some_and(|h| h.num_layers() > 1 || h.can_be_empty()) {
            return Err(EditError::ConstraintViolation(format!(
                "cannot remove the last layer of {}",
                self.holder
            )));
        }
        let layer = remove_expected(comp, self.holder, self.index, self.layer)?;
        self.stash = Some(layer);
        restore_active(comp, self.prev_active);
        comp.repair_active((self.holder, self.index));
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.check_insert(self.holder, self.index)?;
        let layer = take_stash(&mut self.stash, "added layer")?;
        comp.insert_raw(self.holder, layer, self.index)?;
        comp.set_active_raw(Some(self.layer));
        Ok(())
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + stash_bytes(&self.stash)
    }
}

/// Records a layer removal. Holds the removed layer (with its subtree and
/// mask) while the deletion is in effect.
pub struct DeleteLayerEdit {
    holder: HolderId,
    index: usize,
    layer: LayerId,
    /// Selection before the deletion; may be a layer nested in the removed one.
    prev_active: Option<LayerId>,
    stash: Option<Layer>,
}

impl DeleteLayerEdit {
    pub fn new(holder: HolderId, index: usize, removed: Layer, prev_active: Option<LayerId>) -> Self {
        Self {
            holder,
            index,
            layer: removed.id(),
            prev_active,
            stash: Some(removed),
        }
    }
}

impl Edit for DeleteLayerEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.check_insert(self.holder, self.index)?;
        let layer = take_stash(&mut self.stash, "deleted layer")?;
        comp.insert_raw(self.holder, layer, self.index)?;
        restore_active(comp, self.prev_active);
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        let layer = remove_expected(comp, self.holder, self.index, self.layer)?;
        self.stash = Some(layer);
        comp.repair_active((self.holder, self.index));
        Ok(())
    }

    fn description(&self) -> String {
        "Delete Layer".to_string()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + stash_bytes(&self.stash)
    }
}

// ============================================================================
// ORDER / HOLDER CHANGES
// ============================================================================

pub struct LayerOrderChangeEdit {
    name: String,
    holder: HolderId,
    old_index: usize,
    new_index: usize,
}

impl LayerOrderChangeEdit {
    pub fn new(name: impl Into<String>, holder: HolderId, old_index: usize, new_index: usize) -> Self {
        Self {
            name: name.into(),
            holder,
            old_index,
            new_index,
        }
    }
}

impl Edit for LayerOrderChangeEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.move_raw(self.holder, self.new_index, self.old_index)
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        comp.move_raw(self.holder, self.old_index, self.new_index)
    }

    fn description(&self) -> String {
        self.name.clone()
    }
}

/// Moves a layer from one holder slot to another in a single step:
/// detached from the source and re-added to the target, with the
/// emptiness rule suspended between the two halves.
pub(crate) fn transfer(
    comp: &mut Composition,
    layer: LayerId,
    from: (HolderId, usize),
    to: (HolderId, usize),
) -> EditResult<()> {
    let found = comp.holder(from.0).and_then(|h| h.layer(from.1)).map(Layer::id);
    if found != Some(layer) {
        return Err(EditError::invalid(format!(
            "expected layer {} at index {} of {}",
            layer, from.1, from.0
        )));
    }
    if let HolderId::Group(gid) = to.0
        && (gid == layer || comp.find_layer(layer).is_some_and(|l| l.contains_descendant(gid)))
    {
        return Err(EditError::invalid(format!("cannot move layer {} into itself", layer)));
    }
    comp.check_insert(to.0, to.1)?;

    let detached = comp.remove_raw(from.0, from.1)?;
    comp.insert_raw(to.0, detached, to.1)
}

/// Records a move between holders. One undo reverses both halves.
pub struct ChangeHolderEdit {
    name: String,
    layer: LayerId,
    from: (HolderId, usize),
    to: (HolderId, usize),
}

impl ChangeHolderEdit {
    pub fn new(name: impl Into<String>, layer: LayerId, from: (HolderId, usize), to: (HolderId, usize)) -> Self {
        Self {
            name: name.into(),
            layer,
            from,
            to,
        }
    }
}

impl Edit for ChangeHolderEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        transfer(comp, self.layer, self.to, self.from)
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        transfer(comp, self.layer, self.from, self.to)
    }

    fn description(&self) -> String {
        self.name.clone()
    }
}

// ============================================================================
// MERGE DOWN
// ============================================================================

/// Records a merge: the lower image layer's pre-merge content and the merged
/// layer itself. Undo swaps the content back and re-inserts the layer.
pub struct MergeDownEdit {
    holder: HolderId,
    /// Index the merged layer occupied; the target sat at `index - 1`.
    index: usize,
    merged: LayerId,
    below: LayerId,
    /// Content of `below` on the other side of the swap.
    stored: ImageContent,
    stash: Option<Layer>,
    /// Selection before the merge; may be a layer nested in the merged one.
    prev_active: Option<LayerId>,
}

impl MergeDownEdit {
    pub fn new(
        holder: HolderId,
        index: usize,
        removed: Layer,
        below: LayerId,
        before: ImageContent,
        prev_active: Option<LayerId>,
    ) -> Self {
        Self {
            holder,
            index,
            merged: removed.id(),
            below,
            stored: before,
            stash: Some(removed),
            prev_active,
        }
    }

    fn swap_below(&mut self, comp: &mut Composition) -> EditResult<()> {
        let target = comp.layer_mut(self.below)?;
        let content = target
            .image_mut()
            .ok_or_else(|| EditError::invalid(format!("layer {} is not an image layer", self.below)))?;
        std::mem::swap(content, &mut self.stored);
        comp.emit(LayerEvent::LayerChanged { layer: self.below });
        Ok(())
    }
}

impl Edit for MergeDownEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        let below_at = comp.holder(self.holder).and_then(|h| h.index_of(self.below));
        if below_at != Some(self.index - 1) {
            return Err(EditError::invalid(format!("merge target {} moved", self.below)));
        }
        comp.check_insert(self.holder, self.index)?;
        let layer = take_stash(&mut self.stash, "merged layer")?;
        self.swap_below(comp)?;
        comp.insert_raw(self.holder, layer, self.index)?;
        restore_active(comp, self.prev_active);
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        let below_at = comp.holder(self.holder).and_then(|h| h.index_of(self.below));
        if below_at != Some(self.index - 1) {
            return Err(EditError::invalid(format!("merge target {} moved", self.below)));
        }
        let layer = remove_expected(comp, self.holder, self.index, self.merged)?;
        let selected_inside = self.prev_active.is_some_and(|a| a == self.merged || layer.contains_descendant(a));
        self.stash = Some(layer);
        self.swap_below(comp)?;
        if selected_inside {
            comp.set_active_raw(Some(self.below));
        }
        comp.repair_active((self.holder, self.index));
        Ok(())
    }

    fn description(&self) -> String {
        "Merge Down".to_string()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.stored.pixels.memory_bytes() + stash_bytes(&self.stash)
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// Converts between "layers at `indices` of `holder`" and "one group at
/// `group_index` of `holder` owning those layers". Used for both directions:
/// grouping replays `group` on redo, ungrouping replays `ungroup`.
pub struct GroupingEdit {
    holder: HolderId,
    group: LayerId,
    /// Ascending child positions while ungrouped.
    indices: Vec<usize>,
    group_index: usize,
    /// The group layer while it is out of the tree, emptied of children.
    shell: Option<Layer>,
    grouping: bool,
    active_before: Option<LayerId>,
    active_after: Option<LayerId>,
}

impl GroupingEdit {
    pub(crate) fn new(
        holder: HolderId,
        group: LayerId,
        indices: Vec<usize>,
        group_index: usize,
        grouping: bool,
        active: (Option<LayerId>, Option<LayerId>),
    ) -> Self {
        Self {
            holder,
            group,
            indices,
            group_index,
            shell: None,
            grouping,
            active_before: active.0,
            active_after: active.1,
        }
    }

    /// Ungrouping edits start out holding the emptied group.
    pub(crate) fn with_shell(mut self, shell: Layer) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Index where a group replacing `indices` lands: the span the layers
    /// occupied, counted after they are removed.
    pub fn group_index_for(indices: &[usize]) -> usize {
        match indices.last() {
            Some(&last) => last + 1 - indices.len(),
            None => 0,
        }
    }

    /// Pull the layers at `indices` out of `holder` and wrap them in `shell`,
    /// which is inserted at `group_index`.
    pub(crate) fn group(
        comp: &mut Composition,
        holder: HolderId,
        indices: &[usize],
        group_index: usize,
        mut shell: Layer,
    ) -> EditResult<()> {
        let len = comp
            .holder(holder)
            .map(|h| h.num_layers())
            .ok_or_else(|| EditError::invalid(format!("{} does not exist", holder)))?;
        if indices.is_empty() || indices.windows(2).any(|w| w[0] >= w[1]) || indices[indices.len() - 1] >= len {
            return Err(EditError::invalid(format!("bad grouping indices {:?}", indices)));
        }
        if group_index > len - indices.len() {
            return Err(EditError::invalid(format!("group index {} out of range", group_index)));
        }
        let group = shell
            .as_group_mut()
            .ok_or_else(|| EditError::invalid("grouping shell is not a group"))?;
        if group.num_layers() != 0 {
            return Err(EditError::invalid("grouping shell is not empty"));
        }

        let mut members = Vec::with_capacity(indices.len());
        for &index in indices.iter().rev() {
            members.push(comp.remove_raw(holder, index)?);
        }
        for member in members.into_iter().rev() {
            let at = group.num_layers();
            group.insert_child(member, at);
        }
        comp.insert_raw(holder, shell, group_index)
    }

    /// Inverse of [`group`](Self::group): returns the emptied shell.
    pub(crate) fn ungroup(
        comp: &mut Composition,
        holder: HolderId,
        group_id: LayerId,
        group_index: usize,
        indices: &[usize],
    ) -> EditResult<Layer> {
        let (len, count) = {
            let h = comp
                .holder(holder)
                .ok_or_else(|| EditError::invalid(format!("{} does not exist", holder)))?;
            let count = h
                .layer(group_index)
                .filter(|l| l.id() == group_id)
                .and_then(Layer::as_group)
                .map(|g| g.num_layers())
                .ok_or_else(|| {
                    EditError::invalid(format!("expected group {} at index {} of {}", group_id, group_index, holder))
                })?;
            (h.num_layers(), count)
        };
        let restored_len = len - 1 + count;
        if indices.len() != count || indices.windows(2).any(|w| w[0] >= w[1]) || indices.last().is_some_and(|&i| i >= restored_len) {
            return Err(EditError::invalid(format!("bad ungroup indices {:?}", indices)));
        }

        let mut shell = comp.remove_raw(holder, group_index)?;
        let mut members = Vec::with_capacity(count);
        if let Some(group) = shell.as_group_mut() {
            while group.num_layers() > 0 {
                members.push(group.remove_child(0));
            }
        }
        for (member, &index) in members.into_iter().zip(indices) {
            comp.insert_raw(holder, member, index)?;
        }
        Ok(shell)
    }

    fn apply_grouped(&mut self, comp: &mut Composition) -> EditResult<()> {
        let shell = take_stash(&mut self.shell, "group")?;
        Self::group(comp, self.holder, &self.indices, self.group_index, shell)
    }

    fn apply_ungrouped(&mut self, comp: &mut Composition) -> EditResult<()> {
        let shell = Self::ungroup(comp, self.holder, self.group, self.group_index, &self.indices)?;
        self.shell = Some(shell);
        Ok(())
    }
}

impl Edit for GroupingEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.grouping {
            self.apply_ungrouped(comp)?;
        } else {
            self.apply_grouped(comp)?;
        }
        restore_active(comp, self.active_before);
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.grouping {
            self.apply_grouped(comp)?;
        } else {
            self.apply_ungrouped(comp)?;
        }
        restore_active(comp, self.active_after);
        Ok(())
    }

    fn description(&self) -> String {
        let name = if self.grouping { "Group Layers" } else { "Ungroup" };
        name.to_string()
    }
}

// ============================================================================
// PROPERTIES / MASKS
// ============================================================================

/// Swap of a layer's user-editable properties.
pub struct LayerPropertyEdit {
    name: String,
    layer: LayerId,
    before: LayerProps,
    after: LayerProps,
    gesture: Option<GestureKey>,
}

impl LayerPropertyEdit {
    pub fn new(name: impl Into<String>, layer: LayerId, before: LayerProps, after: LayerProps) -> Self {
        Self {
            name: name.into(),
            layer,
            before,
            after,
            gesture: None,
        }
    }

    pub fn with_gesture(mut self, kind: EditKind, gesture: u64) -> Self {
        self.gesture = Some(GestureKey { kind, target: self.layer, gesture });
        self
    }

    fn apply(&self, comp: &mut Composition, props: &LayerProps) -> EditResult<()> {
        comp.layer_mut(self.layer)?.apply_props(props);
        comp.emit(LayerEvent::LayerChanged { layer: self.layer });
        Ok(())
    }
}

impl Edit for LayerPropertyEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        self.apply(comp, &self.before)
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        self.apply(comp, &self.after)
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn gesture(&self) -> Option<GestureKey> {
        self.gesture
    }
}

pub(crate) fn attach_mask(comp: &mut Composition, layer: LayerId, mask: Box<Layer>) -> EditResult<()> {
    let host = comp.layer_mut(layer)?;
    if host.has_mask() {
        return Err(EditError::invalid(format!("layer {} already has a mask", layer)));
    }
    host.attach_mask(mask);
    comp.emit(LayerEvent::MaskAdded { layer });
    Ok(())
}

pub(crate) fn detach_mask(comp: &mut Composition, layer: LayerId) -> EditResult<Box<Layer>> {
    let mask = comp
        .layer_mut(layer)?
        .detach_mask()
        .ok_or_else(|| EditError::invalid(format!("layer {} has no mask", layer)))?;
    comp.emit(LayerEvent::MaskRemoved { layer });
    Ok(mask)
}

/// Records a mask being attached (`added`) or removed.
pub struct MaskEdit {
    layer: LayerId,
    added: bool,
    stash: Option<Box<Layer>>,
}

impl MaskEdit {
    pub fn added(layer: LayerId) -> Self {
        Self { layer, added: true, stash: None }
    }

    pub fn removed(layer: LayerId, mask: Box<Layer>) -> Self {
        Self { layer, added: false, stash: Some(mask) }
    }

    fn attach(&mut self, comp: &mut Composition) -> EditResult<()> {
        match comp.find_layer(self.layer) {
            None => return Err(EditError::LayerNotFound(self.layer)),
            Some(host) if host.has_mask() => {
                return Err(EditError::invalid(format!("layer {} already has a mask", self.layer)));
            }
            Some(_) => {}
        }
        let mask = take_stash(&mut self.stash, "mask")?;
        attach_mask(comp, self.layer, mask)
    }

    fn detach(&mut self, comp: &mut Composition) -> EditResult<()> {
        self.stash = Some(detach_mask(comp, self.layer)?);
        Ok(())
    }
}

impl Edit for MaskEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.added { self.detach(comp) } else { self.attach(comp) }
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        if self.added { self.attach(comp) } else { self.detach(comp) }
    }

    fn description(&self) -> String {
        let name = if self.added { "Add Layer Mask" } else { "Delete Layer Mask" };
        name.to_string()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.stash.as_ref().map_or(0, |m| m.memory_bytes())
    }
}
