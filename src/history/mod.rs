//! Undo/redo history for a composition.
//!
//! Every user-visible mutation is recorded as an [`Edit`] and pushed through
//! [`History::commit`]. Edits address layers by [`LayerId`](crate::layer::LayerId)
//! and re-resolve them on replay, so they stay valid while the tree changes
//! underneath them.

pub mod backup;
pub mod compound;
pub mod pixels;
pub mod structure;

use std::collections::VecDeque;

use crate::composition::Composition;
use crate::error::EditResult;
use crate::layer::LayerId;
use crate::settings::EngineSettings;

pub use backup::{BackupCache, BackupId};
pub use compound::CompoundEdit;
pub use pixels::{CanvasSizeEdit, ContentTarget, ImageEdit, PartialImageEdit};
pub use structure::{
    AddLayerEdit, ChangeHolderEdit, DeleteLayerEdit, GroupingEdit,
    LayerOrderChangeEdit, LayerPropertyEdit, MaskEdit, MergeDownEdit,
};

// ============================================================================
// EDIT TRAIT
// ============================================================================

/// Category of a coalescable edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EditKind {
    Pixels,
    Opacity,
    Properties,
}

/// Identifies one continuous user gesture (a brush stroke, an opacity drag)
/// on one target. Consecutive commits with equal keys merge into a single
/// history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GestureKey {
    pub kind: EditKind,
    pub target: LayerId,
    pub gesture: u64,
}

/// An undoable, redoable mutation of a composition.
pub trait Edit: Send + Sync {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()>;
    fn redo(&mut self, comp: &mut Composition) -> EditResult<()>;
    fn description(&self) -> String;

    /// Approximate bytes kept alive by this edit.
    fn memory_size(&self) -> usize {
        std::mem::size_of_val(self)
    }

    fn gesture(&self) -> Option<GestureKey> {
        None
    }

    /// Whether backing data in the cache was reclaimed, making the edit
    /// impossible to replay.
    fn is_reclaimed(&self, _backups: &BackupCache) -> bool {
        false
    }

    /// Called once when the edit leaves history for good.
    fn release(&mut self, _backups: &mut BackupCache) {}

    /// Merge a following edit of the same gesture into this one. Hands the
    /// edit back when this kind of edit cannot absorb it.
    fn absorb(&mut self, next: Box<dyn Edit>) -> Result<(), Box<dyn Edit>> {
        Err(next)
    }
}

// ============================================================================
// HISTORY - undo/redo stacks with count and memory limits
// ============================================================================

pub struct History {
    undo_stack: VecDeque<Box<dyn Edit>>,
    redo_stack: Vec<Box<dyn Edit>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Memory total across both stacks, recounted after each change.
    total_memory: usize,
    pub(crate) backups: BackupCache,
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .field("total_memory", &self.total_memory)
            .field("backups", &self.backups)
            .finish()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

impl History {
    pub fn new(max_history_size: usize, max_memory_bytes: Option<usize>, backup_budget: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes,
            total_memory: 0,
            backups: BackupCache::new(backup_budget),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            settings.max_undo_steps,
            settings.max_history_memory_bytes(),
            settings.backup_cache_bytes(),
        )
    }

    /// Record a freshly performed edit. Clears the redo stack, merges with the
    /// previous entry when both belong to the same gesture, then prunes.
    pub(crate) fn commit(&mut self, edit: Box<dyn Edit>) {
        for mut stale in self.redo_stack.drain(..) {
            stale.release(&mut self.backups);
        }

        let key = edit.gesture();
        let edit = match (key, self.undo_stack.back_mut()) {
            (Some(key), Some(top)) if top.gesture() == Some(key) => match top.absorb(edit) {
                Ok(()) => None,
                Err(edit) => Some(edit),
            },
            _ => Some(edit),
        };

        if let Some(edit) = edit {
            let mergeable = key.is_some()
                && self.undo_stack.back().and_then(|top| top.gesture()) == key;
            if mergeable && let Some(top) = self.undo_stack.pop_back() {
                self.undo_stack.push_back(Box::new(CompoundEdit::coalesce(top, edit)));
            } else {
                self.undo_stack.push_back(edit);
            }
        }

        self.prune();
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Box<dyn Edit>> {
        let edit = self.undo_stack.pop_back();
        self.recount();
        edit
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Box<dyn Edit>> {
        let edit = self.redo_stack.pop();
        self.recount();
        edit
    }

    /// Return an undone edit to the redo stack.
    pub(crate) fn push_redo(&mut self, edit: Box<dyn Edit>) {
        self.redo_stack.push(edit);
        self.recount();
    }

    /// Return a redone edit to the undo stack without touching redo.
    pub(crate) fn push_undo(&mut self, edit: Box<dyn Edit>) {
        self.undo_stack.push_back(edit);
        self.prune();
    }

    /// Drop a failed edit together with everything below it on the undo stack.
    pub(crate) fn discard_undo_chain(&mut self, mut failed: Box<dyn Edit>) {
        failed.release(&mut self.backups);
        for mut edit in self.undo_stack.drain(..) {
            edit.release(&mut self.backups);
        }
        self.recount();
    }

    /// Drop a failed edit together with everything below it on the redo stack.
    pub(crate) fn discard_redo_chain(&mut self, mut failed: Box<dyn Edit>) {
        failed.release(&mut self.backups);
        for mut edit in self.redo_stack.drain(..) {
            edit.release(&mut self.backups);
        }
        self.recount();
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.back().is_some_and(|e| !e.is_reclaimed(&self.backups))
    }

    pub fn can_redo(&self) -> bool {
        self.redo_stack.last().is_some_and(|e| !e.is_reclaimed(&self.backups))
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|e| e.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|e| e.description())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|e| e.description()).collect()
    }

    /// All redo descriptions, next redo first.
    pub fn redo_history(&self) -> Vec<String> {
        self.redo_stack.iter().rev().map(|e| e.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    pub fn backups(&self) -> &BackupCache {
        &self.backups
    }

    /// Memory-pressure hook for the host. Reclaimed blocks make their edits
    /// unrecoverable; those edits are dropped the next time they are reached.
    pub fn reclaim_backups(&mut self, bytes: usize) -> usize {
        self.backups.reclaim(bytes)
    }

    pub fn clear(&mut self) {
        for mut edit in self.undo_stack.drain(..) {
            edit.release(&mut self.backups);
        }
        for mut edit in self.redo_stack.drain(..) {
            edit.release(&mut self.backups);
        }
        self.total_memory = 0;
    }

    fn recount(&mut self) {
        self.total_memory = self
            .undo_stack
            .iter()
            .map(|e| e.memory_size())
            .chain(self.redo_stack.iter().map(|e| e.memory_size()))
            .sum();
    }

    /// Prune old edits to stay within limits. The newest edit always survives.
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(mut removed) = self.undo_stack.pop_front() {
                removed.release(&mut self.backups);
            }
        }
        self.recount();

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(mut removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                    removed.release(&mut self.backups);
                }
            }
        }
    }
}
