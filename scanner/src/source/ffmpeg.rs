use image::{DynamicImage, GrayImage, RgbImage};
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, warn};
use vodscan_common::config::{DecodeConfig, PixelFormat};

use super::probe::probe_duration;
use super::{Frame, FrameSource, SourceError};

/// Frame source backed by an `ffmpeg` subprocess writing raw rasters to stdout.
///
/// Each segment is one ffmpeg invocation:
///   ffmpeg -ss <offset> -i <url> -vf fps=1/<interval>,scale=<w>:<h>
///          -f rawvideo -pix_fmt <gray|rgb24> pipe:1
/// Frames are read in chunks of exactly one raster; a short read ends the
/// segment.
pub struct FfmpegSource {
    media_url: String,
    config: DecodeConfig,
    process: Option<DecodeProcess>,
    segment: Segment,
}

#[derive(Debug, Clone, Copy, Default)]
struct Segment {
    offset_secs: f64,
    interval_secs: f64,
    frames: u64,
}

/// A running decoder. Killed when dropped; `shutdown` and `finish` also reap it.
struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl DecodeProcess {
    fn spawn(program: &str, args: &[String]) -> Result<Self, SourceError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Spawn("could not get stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SourceError::Spawn("could not get stderr handle".into()))?;

        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    /// Fill `buf` with one raster. Returns `false` on a short or absent read.
    async fn read_raster(&mut self, buf: &mut [u8]) -> Result<bool, SourceError> {
        match self.stdout.read_exact(buf).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(SourceError::Read(e.to_string())),
        }
    }

    /// Reap a decoder whose output has ended. A non-zero exit is an error
    /// carrying whatever ffmpeg wrote to stderr.
    async fn finish(mut self) -> Result<(), SourceError> {
        drop(self.stdout);

        let mut stderr = String::new();
        if let Err(e) = self.stderr.read_to_string(&mut stderr).await {
            debug!(error = %e, "could not read decoder stderr");
        }

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| SourceError::Read(e.to_string()))?;

        if !status.success() {
            let stderr = stderr.trim();
            error!(%status, stderr, "ffmpeg exited with error");
            return Err(SourceError::Exited(format!("{status}: {stderr}")));
        }
        debug!(%status, "decoder finished");
        Ok(())
    }

    async fn shutdown(mut self) {
        drop(self.stdout);
        drop(self.stderr);
        if let Err(e) = self.child.start_kill() {
            // already exited on its own
            debug!(error = %e, "decoder kill skipped");
        }
        match self.child.wait().await {
            Ok(status) => debug!(%status, "decoder reaped"),
            Err(e) => warn!(error = %e, "failed to reap decoder"),
        }
    }
}

impl FfmpegSource {
    pub fn new(media_url: impl Into<String>, config: DecodeConfig) -> Self {
        Self {
            media_url: media_url.into(),
            config,
            process: None,
            segment: Segment::default(),
        }
    }

    fn raster_to_image(&self, buf: Vec<u8>) -> Result<DynamicImage, SourceError> {
        let (width, height) = (self.config.width, self.config.height);
        let image = match self.config.pixel_format {
            PixelFormat::Gray => GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8),
            PixelFormat::Rgb24 => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
        };
        image.ok_or(SourceError::Raster { width, height })
    }
}

impl FrameSource for FfmpegSource {
    async fn start(&mut self, offset_secs: f64, interval_secs: f64) -> Result<(), SourceError> {
        self.stop().await;

        let args = decode_args(&self.media_url, offset_secs, interval_secs, &self.config);
        let process = DecodeProcess::spawn(&self.config.ffmpeg, &args)?;
        debug!(offset_secs, interval_secs, "decoder started");

        self.process = Some(process);
        self.segment = Segment {
            offset_secs,
            interval_secs,
            frames: 0,
        };
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(process) = self.process.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.config.frame_bytes()];
        if !process.read_raster(&mut buf).await? {
            debug!(
                offset_secs = self.segment.offset_secs,
                frames = self.segment.frames,
                "decoder output ended"
            );
            if let Some(process) = self.process.take() {
                process.finish().await?;
            }
            return Ok(None);
        }

        let image = self.raster_to_image(buf)?;
        let timestamp_secs =
            self.segment.offset_secs + self.segment.frames as f64 * self.segment.interval_secs;
        self.segment.frames += 1;

        Ok(Some(Frame {
            timestamp_secs,
            image,
        }))
    }

    async fn stop(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
    }

    async fn probe_duration(&mut self) -> Option<f64> {
        match probe_duration(&self.config.ffprobe, &self.media_url).await {
            Ok(secs) => {
                debug!(duration_secs = secs, "media duration probed");
                Some(secs)
            }
            Err(e) => {
                warn!(error = %e, "could not probe media duration; duration bound disabled");
                None
            }
        }
    }
}

/// Command line for one decode segment.
pub fn decode_args(
    media_url: &str,
    offset_secs: f64,
    interval_secs: f64,
    config: &DecodeConfig,
) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-ss".into(),
        format!("{offset_secs:.3}"),
        "-i".into(),
        media_url.into(),
        "-vf".into(),
        format!(
            "fps=1/{interval_secs},scale={}:{}",
            config.width, config.height
        ),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        config.pixel_format.ffmpeg_name().into(),
        "-loglevel".into(),
        "error".into(),
        "pipe:1".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config(program: &str) -> DecodeConfig {
        DecodeConfig {
            ffmpeg: program.into(),
            ffprobe: "ffprobe".into(),
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Gray,
        }
    }

    #[test]
    fn args_carry_offset_interval_and_format() {
        let config = DecodeConfig {
            pixel_format: PixelFormat::Rgb24,
            ..tiny_config("ffmpeg")
        };
        let args = decode_args("https://cdn.example/v.m3u8", 50.0, 0.5, &config);
        let joined = args.join(" ");
        assert!(joined.contains("-ss 50.000 -i https://cdn.example/v.m3u8"));
        assert!(joined.contains("-vf fps=1/0.5,scale=2:2"));
        assert!(joined.contains("-pix_fmt rgb24"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let mut source = FfmpegSource::new("x", tiny_config("/nonexistent/ffmpeg"));
        assert!(matches!(source.start(0.0, 1.0).await, Err(SourceError::Spawn(_))));
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn short_read_ends_segment() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffmpeg");
        // two full 2x2 gray rasters followed by a 2-byte tail
        std::fs::write(&script, "#!/bin/sh\nprintf 'abcdefghij'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut source = FfmpegSource::new("ignored", tiny_config(script.to_str().unwrap()));
        source.start(5.0, 0.5).await.unwrap();

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.timestamp_secs, 5.0);
        assert_eq!(first.image.to_luma8().into_raw(), b"abcd".to_vec());

        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.timestamp_secs, 5.5);

        assert!(source.next_frame().await.unwrap().is_none());
        assert!(source.next_frame().await.unwrap().is_none());

        // restart resets the segment clock
        source.start(100.0, 13.0).await.unwrap();
        let restarted = source.next_frame().await.unwrap().unwrap();
        assert_eq!(restarted.timestamp_secs, 100.0);
        source.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_decoder_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("crashing-ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf 'abcd'\necho 'Connection reset by peer' >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut source = FfmpegSource::new("ignored", tiny_config(script.to_str().unwrap()));
        source.start(0.0, 1.0).await.unwrap();

        assert!(source.next_frame().await.unwrap().is_some());
        match source.next_frame().await {
            Err(SourceError::Exited(msg)) => assert!(msg.contains("Connection reset by peer")),
            other => panic!("expected exit error, got {other:?}"),
        }
        // the failed segment is gone
        assert!(source.next_frame().await.unwrap().is_none());
    }
}
