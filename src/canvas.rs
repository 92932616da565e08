use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Edge length of one square tile in a [`TiledImage`].
pub const CHUNK_SIZE: u32 = 64;

/// Largest pixel count a single buffer may hold (~256 megapixels).
const MAX_PIXELS: u64 = 256_000_000;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// PIXEL RECTANGLES
// ============================================================================

/// Integer rectangle in pixel space. `x`/`y` may be negative when the
/// rectangle is expressed in canvas coordinates of a translated layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds a rectangle from two corners; the max corner is exclusive.
    pub fn from_min_max(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        if max_x <= min_x || max_y <= min_y {
            return Self::new(min_x, min_y, 0, 0);
        }
        Self::new(
            min_x,
            min_y,
            (max_x as i64 - min_x as i64) as u32,
            (max_y as i64 - min_y as i64) as u32,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge, clamped to `i32::MAX`.
    pub fn right(&self) -> i32 {
        clamp_i32(self.x as i64 + self.width as i64)
    }

    pub fn bottom(&self) -> i32 {
        clamp_i32(self.y as i64 + self.height as i64)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy), self.width, self.height)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Overlap of two rectangles (empty if they do not touch).
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        Self::from_min_max(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        )
    }

    /// Smallest rectangle covering both. Empty inputs are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_min_max(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }
}

// ============================================================================
// RASTER BUFFER CONTRACT
// ============================================================================

/// Opaque 2D pixel store with sub-rectangle read/write.
///
/// Reads outside the buffer yield transparent pixels; writes outside the
/// buffer are dropped, so callers never have to pre-clip.
pub trait RasterBuffer {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn read_region(&self, rect: PixelRect) -> RgbaImage;
    fn write_region(&mut self, x: i32, y: i32, block: &RgbaImage);

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }
}

// ============================================================================
// TILED IMAGE
// ============================================================================

/// Sparse tiled image backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
/// Chunk coordinates are mapped to a flat index via `cy * chunks_per_row + cx`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and mutations go through `Arc::make_mut` so only
/// the touched chunk is copied. History snapshots of whole layers rely on this.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = if (width as u64) * (height as u64) > MAX_PIXELS {
            crate::log_warn!("TiledImage::new: {}x{} exceeds the pixel limit, clamped to 1x1", width, height);
            (1, 1)
        } else {
            (width.max(1), height.max(1))
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Image with every pixel set to `color`. A transparent fill costs nothing.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut img = Self::new(width, height);
        if color[3] > 0 {
            img.fill(color);
        }
        img
    }

    /// Import from a flat `RgbaImage`. Only chunks with visible content are
    /// stored; conversion runs in parallel.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let mut img = Self::new(src.width(), src.height());
        if img.width != src.width() || img.height != src.height() {
            return img;
        }
        let (width, height) = (img.width, img.height);
        let cpr = img.chunks_per_row;
        let raw = src.as_raw();

        let converted: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..img.chunks.len())
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat as u32 % cpr) * CHUNK_SIZE;
                let base_y = (flat as u32 / cpr) * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x) as usize;
                let ch = CHUNK_SIZE.min(height - base_y);
                let stride = CHUNK_SIZE as usize * 4;
                let mut data = vec![0u8; stride * CHUNK_SIZE as usize];
                let mut visible = false;

                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let dst_start = ly as usize * stride;
                    let row = &raw[src_start..src_start + cw * 4];
                    visible |= row.chunks_exact(4).any(|px| px[3] != 0);
                    data[dst_start..dst_start + cw * 4].copy_from_slice(row);
                }

                let chunk = if visible {
                    RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, data).map(Arc::new)
                } else {
                    None
                };
                (flat, chunk)
            })
            .collect();

        for (flat, chunk) in converted {
            img.chunks[flat] = chunk;
        }
        img
    }

    /// Flatten into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        self.read_region(PixelRect::new(0, 0, self.width, self.height))
    }

    /// Copy of this image placed at `(dx, dy)` inside a new `width × height`
    /// buffer. Pixels falling outside the new bounds are dropped.
    pub fn with_canvas(&self, width: u32, height: u32, dx: i32, dy: i32) -> Self {
        let mut out = Self::new(width, height);
        for (cx, cy) in self.chunk_keys() {
            if let Some(chunk) = self.get_chunk(cx, cy) {
                out.write_region(
                    (cx * CHUNK_SIZE) as i32 + dx,
                    (cy * CHUNK_SIZE) as i32 + dy,
                    &self.clip_chunk(cx, cy, chunk),
                );
            }
        }
        out
    }

    /// Chunk contents trimmed to the image bounds (edge chunks are padded).
    fn clip_chunk(&self, cx: u32, cy: u32, chunk: &RgbaImage) -> RgbaImage {
        let w = CHUNK_SIZE.min(self.width - cx * CHUNK_SIZE);
        let h = CHUNK_SIZE.min(self.height - cy * CHUNK_SIZE);
        if w == CHUNK_SIZE && h == CHUNK_SIZE {
            return chunk.clone();
        }
        image::imageops::crop_imm(chunk, 0, 0, w, h).to_image()
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    #[inline(always)]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) {
        (x / CHUNK_SIZE, y / CHUNK_SIZE)
    }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` outside the image or for missing chunks).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        self.chunks[self.flat_index(cx, cy)]
            .as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Signed variant of [`get_pixel`](Self::get_pixel) for layer-relative lookups.
    #[inline]
    pub fn get_pixel_signed(&self, x: i32, y: i32) -> Rgba<u8> {
        if x < 0 || y < 0 {
            return TRANSPARENT_PIXEL;
        }
        *self.get_pixel(x as u32, y as u32)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        let arc = self.chunks[idx].get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        if cx >= self.chunks_per_row {
            return None;
        }
        self.chunks.get(self.flat_index(cx, cy)).and_then(|c| c.as_deref())
    }

    /// Place a fully-built chunk at the given chunk coordinate.
    pub fn set_chunk(&mut self, cx: u32, cy: u32, chunk: RgbaImage) {
        if cx >= self.chunks_per_row {
            return;
        }
        let idx = self.flat_index(cx, cy);
        if let Some(slot) = self.chunks.get_mut(idx) {
            *slot = Some(Arc::new(chunk));
        }
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(move |(i, _)| ((i as u32) % cpr, (i as u32) / cpr))
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    // ---- region access -------------------------------------------------------

    /// Copy a sub-rectangle out as a tightly packed block. Only chunks that
    /// overlap the rectangle are visited; the parts outside the image stay
    /// transparent.
    pub fn read_region(&self, rect: PixelRect) -> RgbaImage {
        let mut out = RgbaImage::new(rect.width, rect.height);
        let clipped = rect.intersect(&PixelRect::new(0, 0, self.width, self.height));
        if clipped.is_empty() {
            return out;
        }

        let (x0, y0) = (clipped.x as u32, clipped.y as u32);
        let (x1, y1) = (x0 + clipped.width, y0 + clipped.height);
        let out_stride = rect.width as usize * 4;
        let dst: &mut [u8] = &mut out;

        for cy in y0 / CHUNK_SIZE..y1.div_ceil(CHUNK_SIZE) {
            for cx in x0 / CHUNK_SIZE..x1.div_ceil(CHUNK_SIZE) {
                let Some(chunk) = self.get_chunk(cx, cy) else { continue };
                let (bx, by) = (cx * CHUNK_SIZE, cy * CHUNK_SIZE);
                let (ox0, ox1) = (x0.max(bx), x1.min(bx + CHUNK_SIZE));
                let run = (ox1 - ox0) as usize * 4;
                let raw = chunk.as_raw();

                for gy in y0.max(by)..y1.min(by + CHUNK_SIZE) {
                    let src = (((gy - by) * CHUNK_SIZE + (ox0 - bx)) as usize) * 4;
                    let dx = (ox0 as i64 - rect.x as i64) as usize;
                    let dy = (gy as i64 - rect.y as i64) as usize;
                    let d = dy * out_stride + dx * 4;
                    dst[d..d + run].copy_from_slice(&raw[src..src + run]);
                }
            }
        }
        out
    }

    /// Write a block with its top-left corner at `(x, y)`. Unlike a blit,
    /// transparent pixels overwrite existing content, which is what a
    /// restore from backup needs. Fully transparent runs into missing chunks
    /// are skipped.
    pub fn write_region(&mut self, x: i32, y: i32, block: &RgbaImage) {
        let target = PixelRect::new(x, y, block.width(), block.height())
            .intersect(&PixelRect::new(0, 0, self.width, self.height));
        if target.is_empty() {
            return;
        }
        let src_raw = block.as_raw();
        let src_stride = block.width() as usize * 4;

        for gy in target.y as u32..target.bottom() as u32 {
            let sy = (gy as i64 - y as i64) as usize;
            let mut gx = target.x as u32;
            let end_x = target.right() as u32;
            while gx < end_x {
                let (cx, cy) = Self::chunk_coord(gx, gy);
                let (lx, ly) = Self::local(gx, gy);
                let run = (CHUNK_SIZE - lx).min(end_x - gx);
                let sx = (gx as i64 - x as i64) as usize;
                let src_off = sy * src_stride + sx * 4;
                let bytes = &src_raw[src_off..src_off + run as usize * 4];

                let idx = self.flat_index(cx, cy);
                let has_content = bytes.chunks_exact(4).any(|px| px[3] != 0);
                if self.chunks[idx].is_some() || has_content {
                    let arc = self.chunks[idx]
                        .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
                    let chunk: &mut [u8] = &mut **Arc::make_mut(arc);
                    let dst_off = (ly * CHUNK_SIZE + lx) as usize * 4;
                    chunk[dst_off..dst_off + bytes.len()].copy_from_slice(bytes);
                }
                gx += run;
            }
        }
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`.
    pub fn fill(&mut self, color: Rgba<u8>) {
        for slot in &mut self.chunks {
            let arc = slot.get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
            for pixel in Arc::make_mut(arc).pixels_mut() {
                *pixel = color;
            }
        }
    }

    /// Drop all chunks (make the image fully transparent).
    pub fn clear(&mut self) {
        self.chunks.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Approximate memory usage in bytes.
    /// Chunks shared with another image (e.g. an undo snapshot) are counted
    /// at pointer cost, since the pixel data is paid for elsewhere.
    pub fn memory_bytes(&self) -> usize {
        let chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks
            .iter()
            .flatten()
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    chunk_bytes
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }

    /// Whether both images hold the same pixels (missing chunks compare as transparent).
    pub fn same_pixels(&self, other: &TiledImage) -> bool {
        self.width == other.width && self.height == other.height && self.to_rgba_image() == other.to_rgba_image()
    }
}

impl RasterBuffer for TiledImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_region(&self, rect: PixelRect) -> RgbaImage {
        TiledImage::read_region(self, rect)
    }

    fn write_region(&mut self, x: i32, y: i32, block: &RgbaImage) {
        TiledImage::write_region(self, x, y, block)
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Overlay,
    Lighten,
    Darken,
    Difference,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::Difference,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Additive => "Additive",
            BlendMode::Overlay => "Overlay",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::Difference => "Difference",
        }
    }

    /// Stable u8 for binary serialization.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Additive => 3,
            BlendMode::Overlay => 4,
            BlendMode::Lighten => 5,
            BlendMode::Darken => 6,
            BlendMode::Difference => 7,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Additive,
            4 => BlendMode::Overlay,
            5 => BlendMode::Lighten,
            6 => BlendMode::Darken,
            7 => BlendMode::Difference,
            _ => BlendMode::Normal,
        }
    }

    fn mix(&self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Additive => (base + top).min(1.0),
            BlendMode::Overlay => {
                if base < 0.5 {
                    2.0 * base * top
                } else {
                    1.0 - 2.0 * (1.0 - base) * (1.0 - top)
                }
            }
            BlendMode::Lighten => base.max(top),
            BlendMode::Darken => base.min(top),
            BlendMode::Difference => (base - top).abs(),
        }
    }
}

/// Source-over composite of `top` onto `base` using `mode` for the colour
/// term. `opacity` scales the top pixel's alpha.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    let top_a = (top[3] as f32 / 255.0) * opacity.clamp(0.0, 1.0);
    if top_a <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && top_a >= 1.0 {
        return top;
    }

    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        let mixed = (1.0 - base_a) * t + base_a * mode.mix(b, t);
        let v = (top_a * mixed + base_a * (1.0 - top_a) * b) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 3) as u8, (y * 5) as u8, 7, 255]))
    }

    #[test]
    fn rect_intersection_clips_and_detects_empty() {
        let a = PixelRect::new(-10, -10, 30, 30);
        let b = PixelRect::new(0, 0, 15, 40);
        assert_eq!(a.intersect(&b), PixelRect::new(0, 0, 15, 20));

        let outside = PixelRect::new(100, 100, 5, 5);
        assert!(outside.intersect(&b).is_empty());
        assert_eq!(a.union(&PixelRect::default()), a);
    }

    #[test]
    fn huge_rects_clamp_instead_of_wrapping() {
        let wide = PixelRect::new(0, 0, u32::MAX, 4);
        assert!(!wide.is_empty());
        assert_eq!(wide.right(), i32::MAX);
        assert!(wide.contains(1_000_000, 2));
        assert_eq!(wide.intersect(&PixelRect::new(5, 0, 10, 10)), PixelRect::new(5, 0, 10, 4));

        let moved = PixelRect::new(i32::MAX - 1, i32::MIN + 1, 2, 2).translate(10, -10);
        assert_eq!((moved.x, moved.y), (i32::MAX, i32::MIN));

        let span = PixelRect::from_min_max(i32::MIN, 0, i32::MAX, 1);
        assert_eq!(span.width, u32::MAX);
    }

    #[test]
    fn region_read_spans_chunk_boundaries() {
        let src = checker(150, 90);
        let tiled = TiledImage::from_rgba_image(&src);

        let block = tiled.read_region(PixelRect::new(60, 60, 10, 10));
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(block.get_pixel(x, y), src.get_pixel(60 + x, 60 + y));
            }
        }
        assert_eq!(tiled.to_rgba_image(), src);
    }

    #[test]
    fn region_read_outside_bounds_is_transparent() {
        let tiled = TiledImage::new_filled(10, 10, Rgba([1, 2, 3, 255]));
        let block = tiled.read_region(PixelRect::new(-2, 8, 4, 4));
        assert_eq!(*block.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*block.get_pixel(2, 0), Rgba([1, 2, 3, 255]));
        assert_eq!(*block.get_pixel(2, 3), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn write_region_overwrites_with_transparency() {
        let mut tiled = TiledImage::new_filled(80, 80, Rgba([9, 9, 9, 255]));
        let hole = RgbaImage::new(20, 20);
        tiled.write_region(55, 55, &hole);

        assert_eq!(*tiled.get_pixel(54, 54), Rgba([9, 9, 9, 255]));
        assert_eq!(*tiled.get_pixel(55, 55), Rgba([0, 0, 0, 0]));
        assert_eq!(*tiled.get_pixel(74, 74), Rgba([0, 0, 0, 0]));
        assert_eq!(*tiled.get_pixel(75, 75), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn clone_shares_chunks_until_written() {
        let mut a = TiledImage::new_filled(128, 64, Rgba([5, 5, 5, 255]));
        let snapshot = a.clone();
        assert!(a.memory_bytes() < (CHUNK_SIZE * CHUNK_SIZE * 4) as usize);

        a.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        assert_eq!(*snapshot.get_pixel(0, 0), Rgba([5, 5, 5, 255]));
        assert_eq!(*a.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn with_canvas_offsets_content() {
        let mut img = TiledImage::new(10, 10);
        img.put_pixel(0, 0, Rgba([1, 1, 1, 255]));
        let grown = img.with_canvas(20, 20, 5, 3);
        assert_eq!(*grown.get_pixel(5, 3), Rgba([1, 1, 1, 255]));
        assert_eq!(*grown.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn normal_blend_at_half_opacity_mixes() {
        let out = blend_pixel(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]), BlendMode::Normal, 0.5);
        assert!((126..=129).contains(&out[0]));
        assert_eq!(out[3], 255);
    }
}
