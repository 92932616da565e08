use crate::composition::Composition;
use crate::error::EditResult;

use super::{BackupCache, Edit, GestureKey};

/// A sequence of edits that undo and redo as one step.
///
/// Undo runs the children last to first, redo first to last. When a child
/// fails part-way, the children already replayed are rolled back so the
/// composition is left as it was before the call.
pub struct CompoundEdit {
    name: String,
    edits: Vec<Box<dyn Edit>>,
}

impl CompoundEdit {
    pub fn new(name: impl Into<String>, edits: Vec<Box<dyn Edit>>) -> Self {
        Self { name: name.into(), edits }
    }

    /// Joins two optional edits. Returns whichever one exists, or a compound
    /// when both do.
    pub fn combine(
        name: impl Into<String>,
        first: Option<Box<dyn Edit>>,
        second: Option<Box<dyn Edit>>,
    ) -> Option<Box<dyn Edit>> {
        match (first, second) {
            (None, None) => None,
            (Some(edit), None) | (None, Some(edit)) => Some(edit),
            (Some(a), Some(b)) => Some(Box::new(CompoundEdit::new(name, vec![a, b]))),
        }
    }

    /// Starts a gesture group from its first two edits. Takes the description
    /// of the first.
    pub(crate) fn coalesce(first: Box<dyn Edit>, next: Box<dyn Edit>) -> Self {
        Self::new(first.description(), vec![first, next])
    }

    pub fn push(&mut self, edit: Box<dyn Edit>) {
        self.edits.push(edit);
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

impl Edit for CompoundEdit {
    fn undo(&mut self, comp: &mut Composition) -> EditResult<()> {
        for i in (0..self.edits.len()).rev() {
            if let Err(err) = self.edits[i].undo(comp) {
                for edit in &mut self.edits[i + 1..] {
                    if let Err(e) = edit.redo(comp) {
                        crate::log_err!("Rollback of '{}' failed: {}", edit.description(), e);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn redo(&mut self, comp: &mut Composition) -> EditResult<()> {
        for i in 0..self.edits.len() {
            if let Err(err) = self.edits[i].redo(comp) {
                for edit in self.edits[..i].iter_mut().rev() {
                    if let Err(e) = edit.undo(comp) {
                        crate::log_err!("Rollback of '{}' failed: {}", edit.description(), e);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        self.edits.iter().map(|e| e.memory_size()).sum()
    }

    fn gesture(&self) -> Option<GestureKey> {
        self.edits.first().and_then(|e| e.gesture())
    }

    fn is_reclaimed(&self, backups: &BackupCache) -> bool {
        self.edits.iter().any(|e| e.is_reclaimed(backups))
    }

    fn release(&mut self, backups: &mut BackupCache) {
        for edit in &mut self.edits {
            edit.release(backups);
        }
    }

    fn absorb(&mut self, next: Box<dyn Edit>) -> Result<(), Box<dyn Edit>> {
        match self.gesture() {
            Some(key) if next.gesture() == Some(key) => {
                self.edits.push(next);
                Ok(())
            }
            _ => Err(next),
        }
    }
}
