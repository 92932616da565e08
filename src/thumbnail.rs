use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::canvas::TiledImage;
use crate::composition::Composition;
use crate::io::load_document;
use crate::render::Compositor;
use crate::settings::EngineSettings;

/// Downscaled preview of a document, or the reason it could not be made.
#[derive(Clone, Debug)]
pub struct ThumbInfo {
    pub image: Option<RgbaImage>,
    /// Canvas size of the source document (0×0 when it could not be read).
    pub orig_width: u32,
    pub orig_height: u32,
    pub err_msg: Option<String>,
}

impl ThumbInfo {
    pub fn is_success(&self) -> bool {
        self.err_msg.is_none()
    }

    fn failed(msg: String) -> Self {
        Self {
            image: None,
            orig_width: 0,
            orig_height: 0,
            err_msg: Some(msg),
        }
    }

    /// Thumbnail of an open composition, longest edge at most `edge` pixels.
    pub fn for_composition(comp: &Composition, compositor: &Compositor, edge: u32) -> Self {
        let composite = compositor.composite(comp);
        Self {
            image: Some(downscale(&composite, edge)),
            orig_width: comp.width(),
            orig_height: comp.height(),
            err_msg: None,
        }
    }

    /// Thumbnail of a document on disk. Load failures end up in `err_msg`.
    pub fn for_file(path: &Path, compositor: &Compositor, settings: &EngineSettings) -> Self {
        match load_document(path, settings) {
            Ok(comp) => Self::for_composition(&comp, compositor, settings.thumbnail_edge),
            Err(e) => {
                crate::log_warn!("No thumbnail for {}: {}", path.display(), e);
                Self::failed(e.to_string())
            }
        }
    }
}

/// Fit the image into an `edge`×`edge` box keeping the aspect ratio.
/// Images already small enough are returned at full size.
fn downscale(source: &TiledImage, edge: u32) -> RgbaImage {
    let flat = source.to_rgba_image();
    let (w, h) = (source.width(), source.height());
    let edge = edge.max(1);
    if w <= edge && h <= edge {
        return flat;
    }
    let scale = edge as f32 / w.max(h) as f32;
    let fit_w = ((w as f32 * scale).round() as u32).max(1);
    let fit_h = ((h as f32 * scale).round() as u32).max(1);
    imageops::resize(&flat, fit_w, fit_h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_aspect_ratio_within_edge() {
        let comp = Composition::new(400, 100, &EngineSettings::default());
        let thumb = ThumbInfo::for_composition(&comp, &Compositor::new(), 128);
        assert!(thumb.is_success());
        let image = thumb.image.unwrap();
        assert_eq!(image.dimensions(), (128, 32));
        assert_eq!((thumb.orig_width, thumb.orig_height), (400, 100));
        assert_eq!(image.get_pixel(10, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn small_documents_are_not_upscaled() {
        let comp = Composition::new(20, 30, &EngineSettings::default());
        let thumb = ThumbInfo::for_composition(&comp, &Compositor::new(), 128);
        assert_eq!(thumb.image.unwrap().dimensions(), (20, 30));
    }

    #[test]
    fn unreadable_file_is_reported_not_successful() {
        let path = std::env::temp_dir().join("paintstack_missing_thumbnail_source.pst");
        let thumb = ThumbInfo::for_file(&path, &Compositor::new(), &EngineSettings::default());
        assert!(!thumb.is_success());
        assert!(thumb.image.is_none());
        assert!(thumb.err_msg.is_some());
    }
}
