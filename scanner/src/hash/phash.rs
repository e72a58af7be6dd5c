use image::imageops::FilterType;
use image::DynamicImage;
use rustdct::{DctPlanner, TransformType2And3};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use vodscan_common::region::FractionalBox;

use super::traits::FrameHasher;

/// Side of the downsampled square fed to the DCT.
const DCT_SIZE: usize = 32;
/// Side of the low-frequency block kept from the DCT output.
const LOW_FREQ: usize = 8;

/// 64-bit perceptual fingerprint. Distance is the Hamming distance, so it is
/// symmetric, zero for identical hashes and never above [`FrameHash::BITS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHash(u64);

impl FrameHash {
    #[allow(dead_code)]
    pub const BITS: u32 = u64::BITS;

    #[allow(dead_code)]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn distance(self, other: FrameHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for FrameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// DCT-based perceptual hash over a fixed fractional crop.
///
/// Algorithm:
/// 1. Crop the configured box, convert to grayscale, resize to 32x32
/// 2. Run a 2-D DCT-II (rows, then columns)
/// 3. Keep the top-left 8x8 low-frequency coefficients
/// 4. Bit i is set when coefficient i is above the block's median
///
/// Unlike an average hash this tolerates re-encoding noise and small
/// brightness shifts, which long streamed videos are full of.
pub struct PerceptualHasher {
    crop: FractionalBox,
    dct: Arc<dyn TransformType2And3<f32>>,
}

impl PerceptualHasher {
    pub fn new(crop: FractionalBox) -> Self {
        let mut planner = DctPlanner::new();
        Self {
            crop,
            dct: planner.plan_dct2(DCT_SIZE),
        }
    }

    /// Hash a whole image, without cropping.
    pub fn hash_full(&self, image: &DynamicImage) -> FrameHash {
        let small = image
            .grayscale()
            .resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Lanczos3)
            .to_luma8();

        let mut coeffs: Vec<f32> = small.pixels().map(|p| p.0[0] as f32).collect();
        self.dct_2d(&mut coeffs);

        let mut low = [0f32; LOW_FREQ * LOW_FREQ];
        for y in 0..LOW_FREQ {
            low[y * LOW_FREQ..(y + 1) * LOW_FREQ]
                .copy_from_slice(&coeffs[y * DCT_SIZE..y * DCT_SIZE + LOW_FREQ]);
        }

        let median = median(&low);
        let mut bits = 0u64;
        for (i, &c) in low.iter().enumerate() {
            if c > median {
                bits |= 1u64 << i;
            }
        }
        FrameHash(bits)
    }

    fn dct_2d(&self, buf: &mut [f32]) {
        for row in buf.chunks_exact_mut(DCT_SIZE) {
            self.dct.process_dct2(row);
        }
        transpose(buf, DCT_SIZE);
        for col in buf.chunks_exact_mut(DCT_SIZE) {
            self.dct.process_dct2(col);
        }
        transpose(buf, DCT_SIZE);
    }
}

impl FrameHasher for PerceptualHasher {
    fn hash(&self, image: &DynamicImage) -> FrameHash {
        let rect = self.crop.to_pixels(image.width(), image.height());
        let region = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        let hash = self.hash_full(&region);
        debug!(%hash, x = rect.x, y = rect.y, w = rect.width, h = rect.height, "phash computed");
        hash
    }

    fn name(&self) -> &str {
        "phash"
    }
}

fn transpose(buf: &mut [f32], n: usize) {
    for y in 0..n {
        for x in (y + 1)..n {
            buf.swap(y * n + x, x * n + y);
        }
    }
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    /// Deterministic textured image (LCG noise), values kept inside 8..=247
    /// so small brightness shifts never clip.
    pub(crate) fn noise_image(width: u32, height: u32, seed: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        GrayImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            Luma([8 + ((state >> 24) as u8 % 240)])
        })
    }

    fn full_crop() -> FractionalBox {
        FractionalBox {
            left: 0.0,
            right: 1.0,
            top: 0.0,
            bottom: 1.0,
        }
    }

    #[test]
    fn distance_properties() {
        let samples = [0u64, 1, 0xFFFF_FFFF_FFFF_FFFF, 0xDEAD_BEEF_0000_1234, 0x8000_0000_0000_0001];
        for &a in &samples {
            let ha = FrameHash::from_bits(a);
            assert_eq!(ha.distance(ha), 0);
            for &b in &samples {
                let hb = FrameHash::from_bits(b);
                assert_eq!(ha.distance(hb), hb.distance(ha));
                assert!(ha.distance(hb) <= FrameHash::BITS);
            }
        }
        assert_eq!(
            FrameHash::from_bits(0).distance(FrameHash::from_bits(u64::MAX)),
            64
        );
    }

    #[test]
    fn identical_images_hash_identically() {
        let hasher = PerceptualHasher::new(full_crop());
        let a = DynamicImage::ImageLuma8(noise_image(160, 90, 7));
        let b = DynamicImage::ImageLuma8(noise_image(160, 90, 7));
        assert_eq!(hasher.hash(&a), hasher.hash(&b));
    }

    #[test]
    fn brightness_shift_is_tolerated() {
        let hasher = PerceptualHasher::new(full_crop());
        let base = noise_image(160, 90, 11);
        let mut brighter = base.clone();
        for p in brighter.pixels_mut() {
            p.0[0] += 4;
        }
        let d = hasher
            .hash(&DynamicImage::ImageLuma8(base))
            .distance(hasher.hash(&DynamicImage::ImageLuma8(brighter)));
        assert!(d <= 6, "distance {d} too large for a brightness shift");
    }

    #[test]
    fn inverted_image_is_far_away() {
        let hasher = PerceptualHasher::new(full_crop());
        let base = noise_image(160, 90, 3);
        let mut inverted = base.clone();
        for p in inverted.pixels_mut() {
            p.0[0] = 255 - p.0[0];
        }
        let d = hasher
            .hash(&DynamicImage::ImageLuma8(base))
            .distance(hasher.hash(&DynamicImage::ImageLuma8(inverted)));
        assert!(d >= 48, "distance {d} too small for an inverted image");
    }

    #[test]
    fn pixels_outside_crop_are_ignored() {
        let crop = FractionalBox {
            left: 0.3,
            right: 0.7,
            top: 0.14,
            bottom: 0.25,
        };
        let hasher = PerceptualHasher::new(crop);
        let base = noise_image(200, 200, 5);
        let mut marked = base.clone();
        // bottom half lies entirely outside the crop
        for y in 100..200 {
            for x in 0..200 {
                marked.put_pixel(x, y, Luma([255]));
            }
        }
        assert_eq!(
            hasher.hash(&DynamicImage::ImageLuma8(base)),
            hasher.hash(&DynamicImage::ImageLuma8(marked))
        );
    }

    #[test]
    fn rgb_and_gray_views_agree() {
        let hasher = PerceptualHasher::new(full_crop());
        let gray = noise_image(64, 64, 9);
        let rgb = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        let d = hasher
            .hash(&DynamicImage::ImageLuma8(gray))
            .distance(hasher.hash(&DynamicImage::ImageRgb8(rgb)));
        assert!(d <= 2);
    }
}
