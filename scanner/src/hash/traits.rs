use image::DynamicImage;

use super::phash::FrameHash;

/// Fingerprint interface shared by template loading and frame scanning.
///
/// Implementations decide which part of the image identifies the on-screen
/// event; templates and sampled frames must go through the same hasher so
/// their hashes are comparable.
pub trait FrameHasher {
    fn hash(&self, image: &DynamicImage) -> FrameHash;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
