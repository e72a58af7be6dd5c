use std::path::Path;
use tracing::{debug, info, warn};

use super::phash::FrameHash;
use super::traits::FrameHasher;

/// One calibration image, reduced to its hash. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEntry {
    /// File name of the source image.
    pub identifier: String,
    pub hash: FrameHash,
}

/// Closest template to a probed hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest<'a> {
    pub identifier: &'a str,
    pub distance: u32,
}

/// Reference set of known-good hashes for one visual state of the event.
///
/// Two banks are used by the locator: a coarse bank that recognises the
/// event's neighbourhood and a fine bank for the fully drawn state.
#[derive(Debug, Clone)]
pub struct TemplateBank {
    name: String,
    entries: Vec<TemplateEntry>,
}

impl TemplateBank {
    /// Hash every image in `dir` with `hasher`.
    ///
    /// Files that cannot be decoded are skipped with a warning; only a
    /// directory that cannot be listed is an error.
    pub fn load<H: FrameHasher>(name: &str, dir: &Path, hasher: &H) -> Result<Self, BankError> {
        let read_dir = std::fs::read_dir(dir)
            .map_err(|e| BankError::ReadDir(dir.display().to_string(), e))?;

        let mut paths: Vec<_> = read_dir
            .filter_map(|entry| match entry {
                Ok(e) => Some(e.path()),
                Err(e) => {
                    warn!(bank = name, error = %e, "failed to read directory entry, skipping");
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let identifier = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            match image::open(&path) {
                Ok(img) => {
                    let hash = hasher.hash(&img);
                    debug!(bank = name, template = identifier, %hash, "template hashed");
                    entries.push(TemplateEntry { identifier, hash });
                }
                Err(e) => {
                    warn!(bank = name, template = identifier, error = %e, "failed to load template, skipping");
                }
            }
        }

        if entries.is_empty() {
            warn!(bank = name, dir = dir.display().to_string(), "template bank is empty");
        } else {
            info!(
                bank = name,
                templates = entries.len(),
                hasher = hasher.name(),
                "template bank loaded"
            );
        }

        Ok(Self::from_entries(name, entries))
    }

    pub fn from_entries(name: &str, entries: Vec<TemplateEntry>) -> Self {
        Self {
            name: name.to_string(),
            entries,
        }
    }

    /// Minimum distance from `hash` to any template, or `None` for an empty bank.
    pub fn nearest(&self, hash: FrameHash) -> Option<Nearest<'_>> {
        self.entries
            .iter()
            .map(|e| Nearest {
                identifier: e.identifier.as_str(),
                distance: e.hash.distance(hash),
            })
            .min_by_key(|n| n.distance)
    }

    /// The nearest template, only if it lies within `threshold` (inclusive).
    pub fn within(&self, hash: FrameHash, threshold: u32) -> Option<Nearest<'_>> {
        self.nearest(hash).filter(|n| n.distance <= threshold)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[allow(dead_code)]
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("failed to list template directory {0}: {1}")]
    ReadDir(String, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::phash::tests::noise_image;
    use crate::hash::phash::PerceptualHasher;
    use vodscan_common::region::FractionalBox;

    fn hasher() -> PerceptualHasher {
        PerceptualHasher::new(FractionalBox {
            left: 0.0,
            right: 1.0,
            top: 0.0,
            bottom: 1.0,
        })
    }

    fn entry(id: &str, bits: u64) -> TemplateEntry {
        TemplateEntry {
            identifier: id.into(),
            hash: FrameHash::from_bits(bits),
        }
    }

    #[test]
    fn nearest_picks_minimum_distance() {
        let bank = TemplateBank::from_entries(
            "coarse",
            vec![entry("far", u64::MAX), entry("near", 0b111), entry("mid", 0xFF)],
        );
        let n = bank.nearest(FrameHash::from_bits(0)).unwrap();
        assert_eq!(n.identifier, "near");
        assert_eq!(n.distance, 3);
    }

    #[test]
    fn within_is_inclusive() {
        let bank = TemplateBank::from_entries("fine", vec![entry("a", 0b1111)]);
        assert_eq!(bank.within(FrameHash::from_bits(0), 4).map(|n| n.distance), Some(4));
        assert!(bank.within(FrameHash::from_bits(0), 3).is_none());
    }

    #[test]
    fn empty_bank_never_matches() {
        let bank = TemplateBank::from_entries("empty", vec![]);
        assert!(bank.nearest(FrameHash::from_bits(0)).is_none());
        assert!(bank.within(FrameHash::from_bits(0), 64).is_none());
        assert!(bank.is_empty());
    }

    #[test]
    fn load_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        noise_image(64, 64, 1).save(dir.path().join("b_vote.png")).unwrap();
        noise_image(64, 64, 2).save(dir.path().join("a_vote.png")).unwrap();
        std::fs::write(dir.path().join("notes.png"), b"definitely not a png").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let hasher = hasher();
        let bank = TemplateBank::load("coarse", dir.path(), &hasher).unwrap();

        let ids: Vec<_> = bank.entries().iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a_vote.png", "b_vote.png"]);

        let probe = hasher.hash(&image::DynamicImage::ImageLuma8(noise_image(64, 64, 2)));
        let n = bank.nearest(probe).unwrap();
        assert_eq!(n.identifier, "a_vote.png");
        assert_eq!(n.distance, 0);
    }

    #[test]
    fn load_missing_directory_is_error() {
        let err = TemplateBank::load("fine", Path::new("/nonexistent/templates"), &hasher());
        assert!(matches!(err, Err(BankError::ReadDir(..))));
    }
}
