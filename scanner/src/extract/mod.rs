pub mod ocr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vodscan_common::record::{EventMeta, EventRow};
use vodscan_common::region::{FractionalBox, RegionLayout};

use crate::source::Frame;

pub use ocr::{TesseractRecognizer, TextRecognizer};

const SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Reads the configured text regions out of one matched frame.
///
/// Every configured label is present in the returned row; a region whose
/// recognition fails carries an empty string.
pub struct RegionExtractor<R> {
    layout: RegionLayout,
    recognizer: R,
    upscale: f32,
    debug_dir: Option<PathBuf>,
}

impl<R: TextRecognizer> RegionExtractor<R> {
    pub fn new(layout: RegionLayout, recognizer: R, upscale: f32) -> Self {
        Self {
            layout,
            recognizer,
            upscale,
            debug_dir: None,
        }
    }

    /// Save the matched frame and every preprocessed crop under `dir`.
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    pub async fn extract(&mut self, frame: &Frame, meta: EventMeta) -> EventRow {
        let artifacts = self
            .debug_dir
            .as_deref()
            .and_then(|root| artifact_dir(root, &meta));
        if let Some(dir) = &artifacts {
            save_png(&frame.image, &dir.join("frame.png"));
        }

        let mut texts = BTreeMap::new();
        for region in self.layout.regions() {
            let crop = preprocess(&frame.image, region.bounds, self.upscale);
            if let Some(dir) = &artifacts {
                save_png(&DynamicImage::ImageLuma8(crop.clone()), &dir.join(format!("{}.png", region.label)));
            }

            let text = match self.recognizer.read_lines(&crop).await {
                Ok(lines) => first_line(&lines),
                Err(e) => {
                    warn!(region = region.label, error = %e, "text recognition failed");
                    String::new()
                }
            };
            debug!(region = region.label, text, "region read");
            texts.insert(region.label.clone(), text);
        }

        EventRow::new(meta, texts)
    }
}

/// Crop, grayscale, cubic upscale and sharpen one region for recognition.
pub fn preprocess(image: &DynamicImage, bounds: FractionalBox, upscale: f32) -> GrayImage {
    let rect = bounds.to_pixels(image.width(), image.height());
    let gray = image
        .crop_imm(rect.x, rect.y, rect.width, rect.height)
        .to_luma8();

    let width = ((rect.width as f32 * upscale).round() as u32).max(1);
    let height = ((rect.height as f32 * upscale).round() as u32).max(1);
    let scaled = imageops::resize(&gray, width, height, FilterType::CatmullRom);
    sharpen(&scaled)
}

fn sharpen(image: &GrayImage) -> GrayImage {
    let mut out = imageops::filter3x3(image, &SHARPEN);
    // filter3x3 leaves the one-pixel border black
    let (w, h) = image.dimensions();
    for (x, y, p) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
            *p = *image.get_pixel(x, y);
        }
    }
    out
}

fn first_line(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn artifact_dir(root: &Path, meta: &EventMeta) -> Option<PathBuf> {
    let owner = meta.identifier.replace(['/', '\\'], "_");
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let dir = root
        .join(owner)
        .join(format!("{stamp}_{:.1}", meta.event_offset_secs));
    match std::fs::create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to create debug directory");
            None
        }
    }
}

fn save_png(image: &DynamicImage, path: &Path) {
    if let Err(e) = image.save(path) {
        warn!(path = %path.display(), error = %e, "failed to write debug image");
    }
}
