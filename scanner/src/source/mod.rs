pub mod ffmpeg;
pub mod probe;

use image::DynamicImage;

pub use ffmpeg::FfmpegSource;

/// One decoded raster and the media time it was sampled at.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp_secs: f64,
    pub image: DynamicImage,
}

/// Lazily decoded, fixed-cadence frames from one video.
///
/// A source runs one decode segment at a time. `start` tears down any running
/// segment before launching the next, so restarting is the expensive
/// operation callers should minimise.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// Begin a segment at `offset_secs`, yielding one frame per `interval_secs`.
    async fn start(&mut self, offset_secs: f64, interval_secs: f64) -> Result<(), SourceError>;

    /// Next frame of the current segment. `Ok(None)` means the segment is
    /// exhausted (absent or short read), which is not an error.
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Terminate and reap the current segment, if any.
    async fn stop(&mut self);

    /// Total media duration in seconds, if it can be determined.
    async fn probe_duration(&mut self) -> Option<f64>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to spawn decoder: {0}")]
    Spawn(String),
    #[error("failed to read decoder output: {0}")]
    Read(String),
    #[error("decoder exited with error: {0}")]
    Exited(String),
    #[error("decoded raster does not fit {width}x{height}")]
    Raster { width: u32, height: u32 },
}
