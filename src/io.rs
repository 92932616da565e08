use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::canvas::{BlendMode, TiledImage, CHUNK_SIZE};
use crate::composition::Composition;
use crate::layer::{AdjustmentSettings, HolderId, ImageContent, Layer, LayerHolder, LayerId, LayerKind};
use crate::ops::layer_ops::{add_layer, AddToHistory};
use crate::settings::EngineSettings;

// ============================================================================
// PST DOCUMENT FILE FORMAT
// ============================================================================

/// Magic header of the tiled document format.
const PST_MAGIC: &str = "PST1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted document files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a document, nested layers and masks included.
const MAX_LAYERS: usize = 256;

/// Serializable document: the holder tree plus the canvas geometry.
#[derive(Serialize, Deserialize)]
pub struct DocumentFile {
    magic: String,
    width: u32,
    height: u32,
    active: Option<Uuid>,
    layers: Vec<LayerData>,
}

#[derive(Serialize, Deserialize)]
struct LayerData {
    id: Uuid,
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: u8,
    mask: Option<Box<LayerData>>,
    kind: LayerDataKind,
}

#[derive(Serialize, Deserialize)]
enum LayerDataKind {
    Image(ImageData),
    Adjustment { filter: String, params: BTreeMap<String, f32> },
    Mask(ImageData),
    Group { layers: Vec<LayerData> },
}

/// Sparse pixel buffer and its canvas offset.
#[derive(Serialize, Deserialize)]
struct ImageData {
    width: u32,
    height: u32,
    tx: i32,
    ty: i32,
    chunks: Vec<ChunkData>,
}

/// A single serialisable chunk (64×64 × 4 bytes = 16 384 bytes of pixel data)
#[derive(Serialize, Deserialize)]
struct ChunkData {
    cx: u32,
    cy: u32,
    pixels: Vec<u8>,
}

/// Error type for document file operations
#[derive(Debug, Error)]
pub enum DocError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<Box<bincode::ErrorKind>> for DocError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        DocError::Serialize(e.to_string())
    }
}

// ============================================================================
// SAVE
// ============================================================================

/// Build the serializable document from a composition. Copies chunk data
/// only, so the result can be moved to another thread for writing.
pub fn build_document(comp: &Composition) -> DocumentFile {
    DocumentFile {
        magic: PST_MAGIC.to_string(),
        width: comp.width(),
        height: comp.height(),
        active: comp.active_layer_id().map(|id| id.as_uuid()),
        layers: comp.layers().iter().map(layer_data).collect(),
    }
}

fn layer_data(layer: &Layer) -> LayerData {
    let kind = match layer.kind() {
        LayerKind::Image(content) => LayerDataKind::Image(image_data(&content.pixels, content.tx, content.ty)),
        LayerKind::Mask(content) => LayerDataKind::Mask(image_data(&content.pixels, content.tx, content.ty)),
        LayerKind::Adjustment(settings) => LayerDataKind::Adjustment {
            filter: settings.filter.clone(),
            params: settings.params.clone(),
        },
        LayerKind::Group(group) => LayerDataKind::Group {
            layers: group.children().iter().map(layer_data).collect(),
        },
    };
    LayerData {
        id: layer.id().as_uuid(),
        name: layer.name.clone(),
        visible: layer.visible,
        opacity: layer.opacity,
        blend_mode: layer.blend_mode.to_u8(),
        mask: layer.mask().map(|m| Box::new(layer_data(m))),
        kind,
    }
}

fn image_data(pixels: &TiledImage, tx: i32, ty: i32) -> ImageData {
    let chunks = pixels
        .chunk_keys()
        .filter_map(|(cx, cy)| {
            pixels.get_chunk(cx, cy).map(|chunk| ChunkData {
                cx,
                cy,
                pixels: chunk.as_raw().clone(),
            })
        })
        .collect();
    ImageData {
        width: pixels.width(),
        height: pixels.height(),
        tx,
        ty,
        chunks,
    }
}

pub fn encode_document(doc: &DocumentFile) -> Result<Vec<u8>, DocError> {
    Ok(bincode::serialize(doc)?)
}

/// Serialize + write a pre-built document to disk.
/// Safe to call on a background thread.
pub fn write_document(doc: &DocumentFile, path: &Path) -> Result<(), DocError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, doc)?;
    Ok(())
}

/// Save a composition as a .pst document and mark it clean.
pub fn save_document(comp: &mut Composition, path: &Path) -> Result<(), DocError> {
    let doc = build_document(comp);
    if let Err(e) = write_document(&doc, path) {
        crate::log_err!("Saving {} failed: {}", path.display(), e);
        return Err(e);
    }
    comp.path = Some(path.to_path_buf());
    comp.mark_clean();
    crate::log_info!("Saved {} ({} layers)", path.display(), comp.layer_count_recursive());
    Ok(())
}

// ============================================================================
// LOAD
// ============================================================================

/// Load a .pst document from disk.
pub fn load_document(path: &Path, settings: &EngineSettings) -> Result<Composition, DocError> {
    let raw = std::fs::read(path)?;
    let mut comp = match decode_document(&raw, settings) {
        Ok(comp) => comp,
        Err(e) => {
            crate::log_err!("Loading {} failed: {}", path.display(), e);
            return Err(e);
        }
    };
    comp.name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string());
    comp.path = Some(path.to_path_buf());
    crate::log_info!(
        "Loaded {} ({}x{}, {} layers)",
        path.display(),
        comp.width(),
        comp.height(),
        comp.layer_count_recursive()
    );
    Ok(comp)
}

/// Decode and validate document bytes, then rebuild the tree without
/// recording history.
pub fn decode_document(raw: &[u8], settings: &EngineSettings) -> Result<Composition, DocError> {
    if raw.len() < 12 {
        return Err(DocError::InvalidFormat("File too small".into()));
    }
    // bincode encodes a String as: 8-byte length prefix + UTF-8 data.
    // The magic is 4 chars, so bytes 8..12 hold it.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PST_MAGIC {
        return Err(DocError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let doc: DocumentFile = bincode::deserialize(raw)?;
    validate(&doc)?;

    let mut comp = Composition::empty(doc.width, doc.height, settings);
    let mut seen = HashSet::new();
    for data in doc.layers {
        let layer = rebuild_layer(data, &mut seen)?;
        add_layer(&mut comp, layer, HolderId::Root, None, AddToHistory::No)
            .map_err(|e| DocError::InvalidFormat(e.to_string()))?;
    }
    comp.set_empty_capable(false);

    let active = doc
        .active
        .map(LayerId::from_uuid)
        .filter(|id| comp.find_layer(*id).is_some())
        .or_else(|| comp.layers().last().map(Layer::id));
    comp.set_active_raw(active);
    comp.mark_clean();
    Ok(comp)
}

fn validate(doc: &DocumentFile) -> Result<(), DocError> {
    if doc.width == 0 || doc.height == 0 {
        return Err(DocError::InvalidFormat("Canvas dimensions cannot be zero".into()));
    }
    if doc.width > MAX_CANVAS_DIM || doc.height > MAX_CANVAS_DIM {
        return Err(DocError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            doc.width, doc.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if doc.layers.is_empty() {
        return Err(DocError::InvalidFormat("Document contains no layers".into()));
    }
    let count = count_layers(&doc.layers);
    if count > MAX_LAYERS {
        return Err(DocError::InvalidFormat(format!(
            "Document contains {} layers, which exceeds the maximum of {}",
            count, MAX_LAYERS
        )));
    }
    Ok(())
}

fn count_layers(layers: &[LayerData]) -> usize {
    layers
        .iter()
        .map(|l| {
            let nested = match &l.kind {
                LayerDataKind::Group { layers } => count_layers(layers),
                _ => 0,
            };
            1 + usize::from(l.mask.is_some()) + nested
        })
        .sum()
}

fn rebuild_layer(data: LayerData, seen: &mut HashSet<Uuid>) -> Result<Layer, DocError> {
    if !seen.insert(data.id) {
        return Err(DocError::InvalidFormat(format!("Duplicate layer id {}", data.id)));
    }
    let id = LayerId::from_uuid(data.id);
    let mut layer = match data.kind {
        LayerDataKind::Image(img) => {
            let content = rebuild_content(img, &data.name)?;
            Layer::with_kind(id, data.name, LayerKind::Image(content))
        }
        LayerDataKind::Mask(img) => {
            let content = rebuild_content(img, &data.name)?;
            Layer::with_kind(id, data.name, LayerKind::Mask(content))
        }
        LayerDataKind::Adjustment { filter, params } => {
            Layer::with_kind(id, data.name, LayerKind::Adjustment(AdjustmentSettings { filter, params }))
        }
        LayerDataKind::Group { layers } => {
            let children = layers
                .into_iter()
                .map(|child| rebuild_layer(child, seen))
                .collect::<Result<Vec<_>, _>>()?;
            Layer::new_group(data.name, children).with_id(id)
        }
    };
    layer.visible = data.visible;
    layer.opacity = data.opacity.clamp(0.0, 1.0);
    layer.blend_mode = BlendMode::from_u8(data.blend_mode);
    if let Some(mask) = data.mask {
        let mask = rebuild_layer(*mask, seen)?;
        if !mask.is_mask() {
            return Err(DocError::InvalidFormat(format!("Mask of layer '{}' is not a mask layer", layer.name)));
        }
        layer.attach_mask(Box::new(mask));
    }
    Ok(layer)
}

fn rebuild_content(img: ImageData, layer_name: &str) -> Result<ImageContent, DocError> {
    if img.width == 0 || img.height == 0 || img.width > MAX_CANVAS_DIM || img.height > MAX_CANVAS_DIM {
        return Err(DocError::InvalidFormat(format!(
            "Layer '{}' has invalid size {}x{}",
            layer_name, img.width, img.height
        )));
    }
    let expected_chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
    let mut tiled = TiledImage::new(img.width, img.height);
    if (tiled.width(), tiled.height()) != (img.width, img.height) {
        return Err(DocError::InvalidFormat(format!(
            "Layer '{}' exceeds the pixel limit",
            layer_name
        )));
    }
    for cd in img.chunks {
        if cd.pixels.len() != expected_chunk_bytes {
            return Err(DocError::InvalidFormat(format!(
                "Chunk ({},{}) in layer '{}' has {} bytes, expected {}",
                cd.cx,
                cd.cy,
                layer_name,
                cd.pixels.len(),
                expected_chunk_bytes,
            )));
        }
        if cd.cx >= img.width.div_ceil(CHUNK_SIZE) || cd.cy >= img.height.div_ceil(CHUNK_SIZE) {
            return Err(DocError::InvalidFormat(format!(
                "Chunk ({},{}) lies outside layer '{}'",
                cd.cx, cd.cy, layer_name
            )));
        }
        let chunk_img = RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, cd.pixels).ok_or_else(|| {
            DocError::InvalidFormat(format!(
                "Failed to reconstruct chunk ({},{}) for layer '{}'",
                cd.cx, cd.cy, layer_name
            ))
        })?;
        tiled.set_chunk(cd.cx, cd.cy, chunk_img);
    }
    let mut content = ImageContent::new(tiled);
    content.tx = img.tx;
    content.ty = img.ty;
    Ok(content)
}
