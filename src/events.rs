use std::fmt;

use crate::layer::{HolderId, LayerId};

/// Change notifications fired synchronously after each in-memory mutation,
/// including mutations replayed by undo and redo.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerEvent {
    LayerAdded { holder: HolderId, layer: LayerId, index: usize },
    LayerRemoved { holder: HolderId, layer: LayerId },
    OrderChanged { holder: HolderId },
    ActiveLayerChanged { layer: Option<LayerId> },
    MaskAdded { layer: LayerId },
    MaskRemoved { layer: LayerId },
    /// Pixels or properties of a layer changed without a structural change.
    LayerChanged { layer: LayerId },
    CanvasResized { width: u32, height: u32 },
}

pub type ListenerFn = Box<dyn FnMut(&LayerEvent) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observer list owned by a composition. Listeners are registered when a
/// document is opened and dropped with it.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(ListenerId, ListenerFn)>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("listeners", &self.listeners.len()).finish()
    }
}

impl EventBus {
    pub fn subscribe(&mut self, listener: ListenerFn) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: LayerEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
