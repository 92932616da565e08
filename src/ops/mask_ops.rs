// ============================================================================
// MASK OPERATIONS
// ============================================================================

use crate::composition::Composition;
use crate::error::{EditError, EditResult};
use crate::history::structure::{attach_mask, detach_mask};
use crate::history::MaskEdit;
use crate::layer::{Layer, LayerId, MaskInit};

use super::layer_ops::change_props;

/// Attach a canvas-sized mask to a layer. A layer holds at most one mask.
pub fn add_mask(comp: &mut Composition, id: LayerId, init: MaskInit) -> EditResult<()> {
    let host = comp.find_layer(id).ok_or(EditError::LayerNotFound(id))?;
    if host.has_mask() {
        return Err(EditError::invalid(format!("layer {} already has a mask", id)));
    }
    let mask = Layer::new_mask(comp.width(), comp.height(), init);
    attach_mask(comp, id, Box::new(mask))?;
    comp.add_edit(Box::new(MaskEdit::added(id)));
    Ok(())
}

pub fn delete_mask(comp: &mut Composition, id: LayerId) -> EditResult<()> {
    let mask = detach_mask(comp, id)?;
    comp.add_edit(Box::new(MaskEdit::removed(id, mask)));
    Ok(())
}

/// Toggle whether the mask affects rendering, without removing it.
pub fn set_mask_enabled(comp: &mut Composition, id: LayerId, enabled: bool) -> EditResult<bool> {
    let has_mask = comp.find_layer(id).ok_or(EditError::LayerNotFound(id))?.has_mask();
    if !has_mask {
        return Err(EditError::invalid(format!("layer {} has no mask", id)));
    }
    let name = if enabled { "Enable Layer Mask" } else { "Disable Layer Mask" };
    change_props(comp, id, name, None, |p| p.mask_enabled = Some(enabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LayerEvent;
    use crate::settings::EngineSettings;
    use std::sync::{Arc, Mutex};

    #[test]
    fn add_and_delete_mask_round_trip_through_history() {
        let mut comp = Composition::new(4, 4, &EngineSettings::default());
        let id = comp.active_layer_id().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        comp.subscribe(Box::new(move |e| sink.lock().unwrap().push(e.clone())));

        add_mask(&mut comp, id, MaskInit::HideAll).unwrap();
        assert!(add_mask(&mut comp, id, MaskInit::RevealAll).is_err());
        let mask_id = comp.find_layer(id).unwrap().mask().unwrap().id();

        delete_mask(&mut comp, id).unwrap();
        assert!(!comp.find_layer(id).unwrap().has_mask());
        comp.undo().unwrap();
        assert_eq!(comp.find_layer(id).unwrap().mask().map(Layer::id), Some(mask_id));
        comp.undo().unwrap();
        assert!(!comp.find_layer(id).unwrap().has_mask());

        let seen = events.lock().unwrap();
        assert_eq!(seen.iter().filter(|e| matches!(e, LayerEvent::MaskAdded { .. })).count(), 2);
        assert_eq!(seen.iter().filter(|e| matches!(e, LayerEvent::MaskRemoved { .. })).count(), 2);
    }

    #[test]
    fn disabling_a_mask_is_undoable() {
        let mut comp = Composition::new(4, 4, &EngineSettings::default());
        let id = comp.active_layer_id().unwrap();
        assert!(set_mask_enabled(&mut comp, id, false).is_err());

        add_mask(&mut comp, id, MaskInit::RevealAll).unwrap();
        assert!(set_mask_enabled(&mut comp, id, false).unwrap());
        assert!(comp.find_layer(id).unwrap().active_mask().is_none());
        comp.undo().unwrap();
        assert!(comp.find_layer(id).unwrap().active_mask().is_some());
    }
}
