use thiserror::Error;

use crate::layer::LayerId;

/// Failures of composition mutations and history replay.
///
/// Structural errors are raised before any state is touched, so a caller
/// that receives one can assume the document is unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    /// A structural precondition does not hold (layer already owned,
    /// merge preconditions unmet, index out of range, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The holder would be left empty although it must keep a child.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    /// Nothing to undo, or the edit's backing data was reclaimed.
    #[error("cannot undo: {0}")]
    CannotUndo(String),

    /// Nothing to redo, or the edit's backing data was reclaimed.
    #[error("cannot redo: {0}")]
    CannotRedo(String),
}

pub type EditResult<T> = Result<T, EditError>;

impl EditError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EditError::InvalidState(msg.into())
    }
}
