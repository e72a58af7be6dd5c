use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::record::VideoJob;
use crate::region::{FractionalBox, RegionError, RegionLayout, RegionSpec};

/// Bit length of the perceptual hash; thresholds above it are meaningless.
pub const HASH_BITS: u32 = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default = "default_max_videos")]
    pub max_videos: usize,
    #[serde(default)]
    pub videos: Vec<VideoJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Gray => "gray",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecodeConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
}

impl DecodeConfig {
    /// Size in bytes of one decoded raster.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_streamlink")]
    pub program: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    pub coarse_dir: PathBuf,
    pub fine_dir: PathBuf,
    /// Area of the frame that is hashed, for templates and frames alike.
    #[serde(default = "default_crop")]
    pub crop: FractionalBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Equal distances resolve to the later window index.
    Latest,
    /// Equal distances resolve to the earlier window index.
    Earliest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorConfig {
    #[serde(default = "default_coarse_interval")]
    pub coarse_interval_secs: f64,
    #[serde(default = "default_fine_interval")]
    pub fine_interval_secs: f64,
    #[serde(default = "default_window")]
    pub window_secs: f64,
    #[serde(default = "default_coarse_threshold")]
    pub coarse_threshold: u32,
    #[serde(default = "default_fine_threshold")]
    pub fine_threshold: u32,
    /// Cooldown after an event; must exceed the event's recurrence period.
    #[serde(default = "default_skip")]
    pub skip_secs: f64,
    #[serde(default = "default_no_signal_timeout")]
    pub no_signal_timeout_secs: f64,
    #[serde(default = "default_hard_cap")]
    pub hard_cap_secs: f64,
    #[serde(default = "default_tie_break")]
    pub tie_break: TieBreak,
    #[serde(default = "default_progress_every")]
    pub progress_every_secs: f64,
}

impl LocatorConfig {
    /// Number of fine samples taken per window.
    pub fn window_frames(&self) -> u32 {
        ((self.window_secs / self.fine_interval_secs).round() as u32).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_reference_width")]
    pub reference_width: u32,
    #[serde(default = "default_reference_height")]
    pub reference_height: u32,
    #[serde(default = "default_upscale")]
    pub upscale: f32,
    #[serde(default = "default_tesseract")]
    pub ocr_program: String,
    #[serde(default = "default_ocr_args")]
    pub ocr_args: Vec<String>,
    pub regions: Vec<RegionSpec>,
}

impl ExtractConfig {
    pub fn layout(&self) -> Result<RegionLayout, RegionError> {
        RegionLayout::from_specs(&self.regions, self.reference_width, self.reference_height)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_rows_path")]
    pub rows_path: PathBuf,
    /// When set, matched frames and preprocessed region crops are saved here.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            width: default_width(),
            height: default_height(),
            pixel_format: default_pixel_format(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_streamlink(),
            quality: default_quality(),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            coarse_interval_secs: default_coarse_interval(),
            fine_interval_secs: default_fine_interval(),
            window_secs: default_window(),
            coarse_threshold: default_coarse_threshold(),
            fine_threshold: default_fine_threshold(),
            skip_secs: default_skip(),
            no_signal_timeout_secs: default_no_signal_timeout(),
            hard_cap_secs: default_hard_cap(),
            tie_break: default_tie_break(),
            progress_every_secs: default_progress_every(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            rows_path: default_rows_path(),
            debug_dir: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.locator.validate()?;

        if self.decode.width == 0 || self.decode.height == 0 {
            return Err(ConfigError::Invalid("decode resolution must be non-zero".into()));
        }
        if !(self.extract.upscale >= 1.0) {
            return Err(ConfigError::Invalid("extract.upscale must be >= 1".into()));
        }
        self.templates.crop.validate("templates.crop")?;

        let layout = self.extract.layout()?;
        if layout.is_empty() {
            tracing::warn!("no extract regions configured; rows will carry metadata only");
        }
        Ok(())
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("locator.coarse_interval_secs", self.coarse_interval_secs),
            ("locator.fine_interval_secs", self.fine_interval_secs),
            ("locator.window_secs", self.window_secs),
            ("locator.progress_every_secs", self.progress_every_secs),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("locator.skip_secs", self.skip_secs),
            ("locator.no_signal_timeout_secs", self.no_signal_timeout_secs),
            ("locator.hard_cap_secs", self.hard_cap_secs),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{name} must be non-negative")));
            }
        }
        if self.fine_interval_secs >= self.coarse_interval_secs {
            return Err(ConfigError::Invalid(
                "locator.fine_interval_secs must be smaller than coarse_interval_secs".into(),
            ));
        }
        if self.coarse_threshold > HASH_BITS || self.fine_threshold > HASH_BITS {
            return Err(ConfigError::Invalid(format!(
                "hash thresholds cannot exceed {HASH_BITS}"
            )));
        }
        if self.skip_secs < self.window_secs {
            tracing::warn!(
                skip_secs = self.skip_secs,
                window_secs = self.window_secs,
                "skip_secs is shorter than the fine window; one event may be counted twice"
            );
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid region: {0}")]
    Region(#[from] RegionError),
}

// Default value functions
fn default_log_level() -> String {
    "info".into()
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_ffprobe() -> String {
    "ffprobe".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Gray
}
fn default_true() -> bool {
    true
}
fn default_streamlink() -> String {
    "streamlink".into()
}
fn default_quality() -> String {
    "best".into()
}
fn default_crop() -> FractionalBox {
    FractionalBox {
        left: 0.30,
        right: 0.70,
        top: 0.14,
        bottom: 0.25,
    }
}
fn default_coarse_interval() -> f64 {
    13.0
}
fn default_fine_interval() -> f64 {
    0.1
}
fn default_window() -> f64 {
    25.0
}
fn default_coarse_threshold() -> u32 {
    15
}
fn default_fine_threshold() -> u32 {
    10
}
fn default_skip() -> f64 {
    13.0 * 60.0
}
fn default_no_signal_timeout() -> f64 {
    90.0 * 60.0
}
fn default_hard_cap() -> f64 {
    12.0 * 3600.0
}
fn default_tie_break() -> TieBreak {
    TieBreak::Latest
}
fn default_progress_every() -> f64 {
    300.0
}
fn default_reference_width() -> u32 {
    1920
}
fn default_reference_height() -> u32 {
    1080
}
fn default_upscale() -> f32 {
    2.0
}
fn default_tesseract() -> String {
    "tesseract".into()
}
fn default_ocr_args() -> Vec<String> {
    vec!["--psm".into(), "7".into()]
}
fn default_rows_path() -> PathBuf {
    PathBuf::from("rows.jsonl")
}
fn default_max_videos() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [templates]
        coarse_dir = "templates_coarse"
        fine_dir = "templates_fine"

        [extract]
        regions = [
            { label = "map1", x1 = 395, y1 = 600, x2 = 685, y2 = 640 },
            { label = "votes1", x1 = 476, y1 = 756, x2 = 578, y2 = 787 },
        ]
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.decode.frame_bytes(), 1280 * 720);
        assert_eq!(config.locator.coarse_interval_secs, 13.0);
        assert_eq!(config.locator.window_frames(), 250);
        assert_eq!(config.locator.tie_break, TieBreak::Latest);
        assert_eq!(config.extract.ocr_args, vec!["--psm", "7"]);
        assert_eq!(config.max_videos, 100);
        assert!(config.videos.is_empty());
        assert!(config.resolver.enabled);
    }

    #[test]
    fn example_config_parses() {
        let config = Config::parse(include_str!("../../config.example.toml")).unwrap();
        assert_eq!(config.extract.layout().unwrap().regions().len(), 6);
        assert_eq!(config.templates.crop.left, 0.30);
        assert_eq!(config.videos[0].identifier, "example_channel");
        assert!(config.output.debug_dir.is_none());
    }

    #[test]
    fn videos_and_overrides_parse() {
        let toml = format!(
            r#"
            max_videos = 3

            [decode]
            pixel_format = "rgb24"
            width = 640
            height = 360

            [locator]
            fine_interval_secs = 0.5
            window_secs = 35
            tie_break = "earliest"

            [[videos]]
            identifier = "chan"
            url = "https://example.com/videos/1"
            created_at = "2025-07-01T12:00:00Z"
            {MINIMAL}
            "#
        );
        let config = Config::parse(&toml).unwrap();
        assert_eq!(config.decode.pixel_format, PixelFormat::Rgb24);
        assert_eq!(config.decode.frame_bytes(), 640 * 360 * 3);
        assert_eq!(config.locator.window_frames(), 70);
        assert_eq!(config.locator.tie_break, TieBreak::Earliest);
        assert_eq!(config.videos.len(), 1);
        assert_eq!(config.videos[0].created_at, "2025-07-01T12:00:00Z");
    }

    #[test]
    fn rejects_fine_interval_not_below_coarse() {
        let toml = format!("[locator]\ncoarse_interval_secs = 1.0\nfine_interval_secs = 1.0\n{MINIMAL}");
        assert!(matches!(Config::parse(&toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_non_positive_intervals() {
        let cases = [
            ("coarse_interval_secs", "0.0"),
            ("coarse_interval_secs", "nan"),
            ("fine_interval_secs", "0.0"),
            ("fine_interval_secs", "-0.1"),
            ("window_secs", "0.0"),
            ("progress_every_secs", "-1.0"),
            ("skip_secs", "-1.0"),
            ("no_signal_timeout_secs", "-5.0"),
            ("hard_cap_secs", "-1.0"),
        ];
        for (key, value) in cases {
            let toml = format!("[locator]\n{key} = {value}\n{MINIMAL}");
            match Config::parse(&toml) {
                Err(ConfigError::Invalid(msg)) => {
                    assert!(msg.contains(key), "{key} = {value}: {msg}")
                }
                other => panic!("{key} = {value} accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_threshold_above_hash_bits() {
        let toml = format!("[locator]\ncoarse_threshold = 65\n{MINIMAL}");
        assert!(matches!(Config::parse(&toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_region_outside_reference_frame() {
        let toml = r#"
            [templates]
            coarse_dir = "c"
            fine_dir = "f"

            [extract]
            regions = [{ label = "wide", x1 = 0, y1 = 0, x2 = 4000, y2 = 10 }]
        "#;
        assert!(matches!(
            Config::parse(toml),
            Err(ConfigError::Region(RegionError::OutOfBounds(_)))
        ));
    }

    #[test]
    fn rejects_bad_crop() {
        let toml = r#"
            [templates]
            coarse_dir = "c"
            fine_dir = "f"
            crop = { left = 0.8, right = 0.2, top = 0.1, bottom = 0.2 }

            [extract]
            regions = []
        "#;
        assert!(matches!(
            Config::parse(toml),
            Err(ConfigError::Region(RegionError::Inverted(_)))
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/vodscan.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
