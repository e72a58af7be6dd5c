mod extract;
mod hash;
mod locator;
mod resolve;
mod sink;
mod source;

use extract::{RegionExtractor, TesseractRecognizer, TextRecognizer};
use hash::{FrameHasher, PerceptualHasher, TemplateBank};
use locator::{EventLocator, StopReason};
use resolve::{MediaResolver, ResolveError};
use sink::{JsonlSink, SinkError};
use source::FfmpegSource;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use vodscan_common::config::{Config, DecodeConfig};
use vodscan_common::record::VideoJob;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        videos = config.videos.len(),
        max_videos = config.max_videos,
        coarse_interval_secs = config.locator.coarse_interval_secs,
        fine_interval_secs = config.locator.fine_interval_secs,
        window_secs = config.locator.window_secs,
        coarse_threshold = config.locator.coarse_threshold,
        fine_threshold = config.locator.fine_threshold,
        rows_path = %config.output.rows_path.display(),
        "starting vodscan"
    );

    // Missing tools only surface per video later; warn early.
    check_tool_available(&config.decode.ffmpeg, "-version").await;
    check_tool_available(&config.decode.ffprobe, "-version").await;
    check_tool_available(&config.extract.ocr_program, "--version").await;
    if config.resolver.enabled {
        check_tool_available(&config.resolver.program, "--version").await;
    }

    let hasher = PerceptualHasher::new(config.templates.crop);
    let coarse = load_bank("coarse", &config.templates.coarse_dir, &hasher);
    let fine = load_bank("fine", &config.templates.fine_dir, &hasher);

    let layout = match config.extract.layout() {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "invalid extract regions");
            std::process::exit(1);
        }
    };
    let recognizer = TesseractRecognizer::new(
        config.extract.ocr_program.clone(),
        config.extract.ocr_args.clone(),
    );
    let mut extractor = RegionExtractor::new(layout, recognizer, config.extract.upscale)
        .with_debug_dir(config.output.debug_dir.clone());

    let locator = EventLocator::new(config.locator.clone(), hasher, coarse, fine);
    let resolver = MediaResolver::new(config.resolver.clone());
    let sink = JsonlSink::new(config.output.rows_path.clone());

    let done = match sink.existing_urls().await {
        Ok(urls) => urls,
        Err(e) => {
            error!(error = %e, "failed to read existing rows");
            std::process::exit(1);
        }
    };
    let jobs = pending_jobs(&config.videos, &done, config.max_videos);
    info!(
        pending = jobs.len(),
        already_done = done.len(),
        "video queue prepared"
    );

    let mut total_rows = 0usize;
    for (n, job) in jobs.iter().enumerate() {
        info!(
            n = n + 1,
            of = jobs.len(),
            identifier = job.identifier,
            url = job.url,
            "processing video"
        );
        match process_video(job, &resolver, &locator, &mut extractor, &sink, &config.decode).await {
            Ok(rows) => total_rows += rows,
            Err(e) => warn!(url = job.url, error = %e, "video failed, continuing with next"),
        }
    }

    info!(videos = jobs.len(), rows = total_rows, "batch finished");
}

#[derive(Debug, thiserror::Error)]
enum VideoError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Resolve, scan and persist one video. Returns the number of rows written.
async fn process_video<H: FrameHasher, R: TextRecognizer>(
    job: &VideoJob,
    resolver: &MediaResolver,
    locator: &EventLocator<H>,
    extractor: &mut RegionExtractor<R>,
    sink: &JsonlSink,
    decode: &DecodeConfig,
) -> Result<usize, VideoError> {
    let media_url = resolver.resolve(&job.url).await?;

    let mut source = FfmpegSource::new(media_url, decode.clone());
    let report = locator.scan(&mut source, extractor, job).await;

    match &report.stop {
        StopReason::UnusableSource => {
            error!(url = job.url, "no frames could be decoded");
        }
        StopReason::DecodeFailed(e) => {
            warn!(url = job.url, error = e, rows = report.rows.len(), "scan cut short by decode failure");
        }
        reason => {
            info!(
                url = job.url,
                stop = %reason,
                rows = report.rows.len(),
                frames_sampled = report.frames_sampled,
                decode_starts = report.decode_starts,
                final_cursor_secs = report.final_cursor_secs,
                "video scanned"
            );
        }
    }

    sink.append(&report.rows).await?;
    Ok(report.rows.len())
}

fn load_bank<H: FrameHasher>(name: &str, dir: &Path, hasher: &H) -> TemplateBank {
    match TemplateBank::load(name, dir, hasher) {
        Ok(bank) if !bank.is_empty() => {
            debug!(bank = bank.name(), templates = bank.len(), "bank ready");
            bank
        }
        Ok(_) => {
            error!(bank = name, dir = %dir.display(), "no usable templates");
            std::process::exit(1);
        }
        Err(e) => {
            error!(bank = name, error = %e, "failed to load template bank");
            std::process::exit(1);
        }
    }
}

/// Jobs without rows yet, in config order, capped at `max_videos`.
fn pending_jobs<'a>(
    videos: &'a [VideoJob],
    done: &HashSet<String>,
    max_videos: usize,
) -> Vec<&'a VideoJob> {
    videos
        .iter()
        .filter(|job| !done.contains(&job.url))
        .take(max_videos)
        .collect()
}

async fn check_tool_available(program: &str, version_arg: &str) {
    match Command::new(program).arg(version_arg).output().await {
        Ok(out) if out.status.success() => {
            debug!(program, "tool is available");
        }
        Ok(_) => {
            warn!(program, "tool returned non-zero for its version check");
        }
        Err(e) => {
            warn!(program, error = %e, "tool not found on PATH; videos needing it will fail");
        }
    }
}
