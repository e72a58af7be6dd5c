use serde::Deserialize;
use std::collections::HashSet;

use crate::record::METADATA_KEYS;

/// A rectangle expressed as fractions of the frame size, so the same box
/// applies to any decoded resolution.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FractionalBox {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

/// Pixel rectangle inside a concrete frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FractionalBox {
    pub fn validate(&self, what: &str) -> Result<(), RegionError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.left) && in_unit(self.right) && in_unit(self.top) && in_unit(self.bottom)) {
            return Err(RegionError::OutOfBounds(what.to_string()));
        }
        if self.left >= self.right || self.top >= self.bottom {
            return Err(RegionError::Inverted(what.to_string()));
        }
        Ok(())
    }

    /// Resolve against a `width` x `height` frame. Edges are truncated the same
    /// way for every caller; the result is clamped inside the frame and is
    /// never empty.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let (x, w) = span(self.left, self.right, width);
        let (y, h) = span(self.top, self.bottom, height);
        PixelRect {
            x,
            y,
            width: w,
            height: h,
        }
    }
}

// Products like 0.7 * 1080 land a hair under the integer; snap before truncating.
const SNAP: f64 = 1e-9;

fn span(start: f64, end: f64, extent: u32) -> (u32, u32) {
    let extent = extent.max(1);
    let lo = ((start * extent as f64 + SNAP) as u32).min(extent - 1);
    let hi = ((end * extent as f64 + SNAP) as u32).min(extent);
    (lo, hi.saturating_sub(lo).max(1))
}

/// One region as written in the config file, in reference-resolution pixels.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionSpec {
    pub label: String,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub label: String,
    pub bounds: FractionalBox,
}

/// The validated, ordered set of text regions read from every matched frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLayout {
    regions: Vec<Region>,
}

impl RegionLayout {
    pub fn from_specs(
        specs: &[RegionSpec],
        reference_width: u32,
        reference_height: u32,
    ) -> Result<Self, RegionError> {
        if reference_width == 0 || reference_height == 0 {
            return Err(RegionError::ZeroReference);
        }

        let mut seen = HashSet::new();
        let mut regions = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.label.trim().is_empty() {
                return Err(RegionError::EmptyLabel);
            }
            if METADATA_KEYS.contains(&spec.label.as_str()) {
                return Err(RegionError::ReservedLabel(spec.label.clone()));
            }
            if !seen.insert(spec.label.as_str()) {
                return Err(RegionError::DuplicateLabel(spec.label.clone()));
            }
            if spec.x2 > reference_width || spec.y2 > reference_height {
                return Err(RegionError::OutOfBounds(spec.label.clone()));
            }
            if spec.x1 >= spec.x2 || spec.y1 >= spec.y2 {
                return Err(RegionError::Inverted(spec.label.clone()));
            }

            let bounds = FractionalBox {
                left: spec.x1 as f64 / reference_width as f64,
                right: spec.x2 as f64 / reference_width as f64,
                top: spec.y1 as f64 / reference_height as f64,
                bottom: spec.y2 as f64 / reference_height as f64,
            };
            regions.push(Region {
                label: spec.label.clone(),
                bounds,
            });
        }

        Ok(Self { regions })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.label.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegionError {
    #[error("reference resolution must be non-zero")]
    ZeroReference,
    #[error("region label must not be empty")]
    EmptyLabel,
    #[error("region label '{0}' collides with a metadata field")]
    ReservedLabel(String),
    #[error("duplicate region label '{0}'")]
    DuplicateLabel(String),
    #[error("{0} lies outside the frame")]
    OutOfBounds(String),
    #[error("{0} has zero or negative size")]
    Inverted(String),
}
