use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys every emitted row carries besides the region texts. Region labels
/// may not reuse them.
pub const METADATA_KEYS: &[&str] = &[
    "identifier",
    "source_url",
    "source_timestamp",
    "event_offset_secs",
    "match_distance",
];

/// One video to scan, as listed in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VideoJob {
    /// Opaque owner identifier (e.g. the channel name).
    pub identifier: String,
    /// Content reference handed to the media resolver.
    pub url: String,
    /// Publication timestamp, copied into every row untouched.
    #[serde(default)]
    pub created_at: String,
}

/// Caller-supplied metadata merged into each row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub identifier: String,
    pub source_url: String,
    pub source_timestamp: String,
    /// Media time of the chosen frame.
    pub event_offset_secs: f64,
    pub match_distance: u32,
}

impl EventMeta {
    pub fn for_job(job: &VideoJob, event_offset_secs: f64, match_distance: u32) -> Self {
        Self {
            identifier: job.identifier.clone(),
            source_url: job.url.clone(),
            source_timestamp: job.created_at.clone(),
            event_offset_secs,
            match_distance,
        }
    }
}

/// A detected event: metadata plus one text field per configured region.
///
/// Serialized flat, so region labels appear as top-level keys:
/// `{"identifier": .., "source_url": .., "map1": "Lijiang Tower", ..}`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventRow {
    pub identifier: String,
    pub source_url: String,
    pub source_timestamp: String,
    pub event_offset_secs: f64,
    pub match_distance: u32,
    #[serde(flatten)]
    pub regions: BTreeMap<String, String>,
}

impl EventRow {
    pub fn new(meta: EventMeta, regions: BTreeMap<String, String>) -> Self {
        Self {
            identifier: meta.identifier,
            source_url: meta.source_url,
            source_timestamp: meta.source_timestamp,
            event_offset_secs: meta.event_offset_secs,
            match_distance: meta.match_distance,
            regions,
        }
    }

    pub fn region(&self, label: &str) -> Option<&str> {
        self.regions.get(label).map(String::as_str)
    }
}
