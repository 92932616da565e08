use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{blend_pixel, BlendMode, TiledImage};
use crate::composition::Composition;
use crate::layer::{ImageContent, Layer, LayerHolder, LayerKind};

// ============================================================================
// RENDER CONTRACTS
// ============================================================================

/// Pixel filter behind an adjustment layer. Filter math lives outside the
/// engine; the compositor only knows filters by name.
pub trait AdjustmentFilter: Send + Sync {
    fn apply(&self, src: &RgbaImage, params: &BTreeMap<String, f32>) -> RgbaImage;
}

/// Composites one layer's effect onto a destination buffer whose pixel
/// `(0, 0)` sits at canvas position `origin`.
///
/// Returns `Some(buffer)` when the layer produces a replacement for the
/// destination (adjustments), or `None` when it was blended in place or has
/// nothing to contribute.
pub trait LayerRenderer {
    fn render(&self, layer: &Layer, dst: &mut TiledImage, origin: (i32, i32)) -> Option<TiledImage>;
}

// ============================================================================
// COMPOSITOR
// ============================================================================

/// CPU compositor: image layers with mask, opacity and blend mode; groups
/// rendered into an isolated buffer first; adjustments through registered
/// filters.
#[derive(Default, Clone)]
pub struct Compositor {
    filters: HashMap<String, Arc<dyn AdjustmentFilter>>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("Compositor").field("filters", &names).finish()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: Arc<dyn AdjustmentFilter>) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Render the whole document onto a transparent canvas-sized buffer.
    pub fn composite(&self, comp: &Composition) -> TiledImage {
        let mut dst = TiledImage::new(comp.width(), comp.height());
        self.render_stack(comp.layers(), &mut dst, (0, 0));
        dst
    }

    fn render_stack(&self, layers: &[Layer], dst: &mut TiledImage, origin: (i32, i32)) {
        for layer in layers {
            if let Some(replacement) = self.render(layer, dst, origin) {
                *dst = replacement;
            }
        }
    }
}

impl LayerRenderer for Compositor {
    fn render(&self, layer: &Layer, dst: &mut TiledImage, origin: (i32, i32)) -> Option<TiledImage> {
        if !layer.visible || layer.opacity <= 0.0 {
            return None;
        }
        let mask = layer.active_mask();
        match layer.kind() {
            LayerKind::Image(content) => {
                let src = Source { pixels: &content.pixels, origin: (content.tx, content.ty) };
                blend_onto(dst, origin, src, mask, layer.blend_mode, layer.opacity);
                None
            }
            LayerKind::Group(group) => {
                let mut isolated = TiledImage::new(dst.width(), dst.height());
                self.render_stack(group.children(), &mut isolated, origin);
                let src = Source { pixels: &isolated, origin };
                blend_onto(dst, origin, src, mask, layer.blend_mode, layer.opacity);
                None
            }
            LayerKind::Adjustment(settings) => {
                let Some(filter) = self.filters.get(&settings.filter) else {
                    crate::log_warn!("No filter registered for adjustment '{}'", settings.filter);
                    return None;
                };
                let filtered = TiledImage::from_rgba_image(&filter.apply(&dst.to_rgba_image(), &settings.params));
                let mut out = dst.clone();
                let src = Source { pixels: &filtered, origin };
                blend_onto(&mut out, origin, src, mask, BlendMode::Normal, layer.opacity);
                Some(out)
            }
            LayerKind::Mask(_) => None,
        }
    }
}

struct Source<'a> {
    pixels: &'a TiledImage,
    origin: (i32, i32),
}

/// Reveal factor of a mask pixel: grey level weighted by its alpha.
fn mask_value(px: Rgba<u8>) -> u32 {
    px[0] as u32 * px[3] as u32 / 255
}

fn blend_onto(
    dst: &mut TiledImage,
    origin: (i32, i32),
    src: Source<'_>,
    mask: Option<&ImageContent>,
    mode: BlendMode,
    opacity: f32,
) {
    let mut base = dst.to_rgba_image();
    let stride = base.width() as usize * 4;
    if stride == 0 {
        return;
    }
    base.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let cy = origin.1 + y as i32;
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let cx = origin.0 + x as i32;
            let mut top = src.pixels.get_pixel_signed(cx - src.origin.0, cy - src.origin.1);
            if top[3] == 0 {
                continue;
            }
            if let Some(mask) = mask {
                let m = mask_value(mask.pixels.get_pixel_signed(cx - mask.tx, cy - mask.ty));
                top[3] = (top[3] as u32 * m / 255) as u8;
            }
            let out = blend_pixel(Rgba([px[0], px[1], px[2], px[3]]), top, mode, opacity);
            px.copy_from_slice(&out.0);
        }
    });
    *dst = TiledImage::from_rgba_image(&base);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{AdjustmentSettings, HolderId, MaskInit};
    use crate::ops::layer_ops::{add_layer, AddToHistory};
    use crate::settings::EngineSettings;

    struct Invert;

    impl AdjustmentFilter for Invert {
        fn apply(&self, src: &RgbaImage, _params: &BTreeMap<String, f32>) -> RgbaImage {
            let mut out = src.clone();
            for px in out.pixels_mut() {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
            out
        }
    }

    fn red_layer(w: u32, h: u32) -> Layer {
        let mut layer = Layer::new_image("red", w, h);
        layer.image_mut().unwrap().pixels.fill(Rgba([255, 0, 0, 255]));
        layer
    }

    #[test]
    fn hidden_mask_blocks_layer() {
        let mut comp = Composition::new(4, 4, &EngineSettings::default());
        let mut red = red_layer(4, 4);
        red.attach_mask(Box::new(Layer::new_mask(4, 4, MaskInit::HideAll)));
        add_layer(&mut comp, red, HolderId::Root, None, AddToHistory::No).unwrap();

        let out = Compositor::new().composite(&comp);
        assert_eq!(out.get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn offset_layer_lands_at_its_translation() {
        let mut comp = Composition::new(8, 8, &EngineSettings::default());
        let mut red = red_layer(2, 2);
        red.image_mut().unwrap().tx = 5;
        red.image_mut().unwrap().ty = 6;
        add_layer(&mut comp, red, HolderId::Root, None, AddToHistory::No).unwrap();

        let out = Compositor::new().composite(&comp);
        assert_eq!(out.get_pixel(5, 6), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(4, 6), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn adjustment_replaces_destination_and_unknown_filter_is_skipped() {
        let mut comp = Composition::new(2, 2, &EngineSettings::default());
        let adj = Layer::new_adjustment("invert", AdjustmentSettings::new("invert"));
        add_layer(&mut comp, adj, HolderId::Root, None, AddToHistory::No).unwrap();

        let plain = Compositor::new().composite(&comp);
        assert_eq!(plain.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));

        let with_filter = Compositor::new().with_filter("invert", Arc::new(Invert));
        let out = with_filter.composite(&comp);
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn group_opacity_applies_to_isolated_result() {
        let mut comp = Composition::new(2, 2, &EngineSettings::default());
        let mut group = Layer::new_group("G", vec![red_layer(2, 2)]);
        group.opacity = 0.0;
        add_layer(&mut comp, group, HolderId::Root, None, AddToHistory::No).unwrap();
        let out = Compositor::new().composite(&comp);
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }
}
