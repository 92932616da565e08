//! Layer-composition and undo-history engine for a raster image editor.
//!
//! A [`Composition`] owns a tree of layers (images, adjustments, groups, each
//! optionally masked) and an undo [`History`](history::History). Every
//! mutation in [`ops`] goes through the composition so it is validated,
//! announced to listeners, and recorded as an undoable edit.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod cli;
pub mod composition;
pub mod error;
pub mod events;
pub mod history;
pub mod io;
pub mod layer;
pub mod ops;
pub mod render;
pub mod settings;
pub mod thumbnail;

pub use canvas::{BlendMode, PixelRect, RasterBuffer, TiledImage};
pub use composition::Composition;
pub use error::{EditError, EditResult};
pub use events::LayerEvent;
pub use history::{ContentTarget, Edit, History};
pub use layer::{HolderId, Layer, LayerHolder, LayerId, LayerKind, MaskInit};
pub use render::{AdjustmentFilter, Compositor, LayerRenderer};
pub use settings::EngineSettings;
pub use thumbnail::ThumbInfo;
