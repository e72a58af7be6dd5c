pub mod state;

use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use vodscan_common::config::LocatorConfig;
use vodscan_common::record::{EventMeta, EventRow, VideoJob};

use crate::extract::{RegionExtractor, TextRecognizer};
use crate::hash::{FrameHasher, TemplateBank};
use crate::source::{Frame, FrameSource, SourceError};
use state::{Phase, ScanState};

/// Why a scan finished. None of these is an error from the caller's point
/// of view; the rows found up to that point are always returned.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The decoder never produced a single frame for this video.
    UnusableSource,
    StreamEnded,
    DecodeFailed(String),
    NoSignalTimeout,
    PastDuration,
    HardCap,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UnusableSource => write!(f, "unusable source"),
            StopReason::StreamEnded => write!(f, "stream ended"),
            StopReason::DecodeFailed(e) => write!(f, "decode failed: {e}"),
            StopReason::NoSignalTimeout => write!(f, "no-signal timeout"),
            StopReason::PastDuration => write!(f, "past media duration"),
            StopReason::HardCap => write!(f, "hard cap reached"),
        }
    }
}

#[derive(Debug)]
pub struct ScanReport {
    /// Located events, in media-time order.
    pub rows: Vec<EventRow>,
    pub stop: StopReason,
    pub final_cursor_secs: f64,
    pub frames_sampled: u64,
    pub decode_starts: u32,
}

/// Outcome of one scan step, inspected by the driving loop.
enum Step {
    /// Keep reading from the running decoder.
    Continue,
    /// Parameters changed; start a new decode segment.
    Restart,
    Stop(StopReason),
}

/// Where located events go while a scan runs.
struct Collector<'a, R> {
    extractor: &'a mut RegionExtractor<R>,
    job: &'a VideoJob,
    rows: Vec<EventRow>,
}

/// Two-phase event search over one video.
///
/// Coarse phase: sample every `coarse_interval_secs` and compare against the
/// coarse bank. On a hit, rewind to the hit and switch to the fine phase.
///
/// Fine phase: sample a fixed window every `fine_interval_secs`, keep the
/// frames that match the fine bank, emit one row for the best of them and
/// jump `skip_secs` past it. An empty window resumes coarse sampling right
/// after the window.
pub struct EventLocator<H> {
    config: LocatorConfig,
    hasher: H,
    coarse: TemplateBank,
    fine: TemplateBank,
}

impl<H: FrameHasher> EventLocator<H> {
    pub fn new(config: LocatorConfig, hasher: H, coarse: TemplateBank, fine: TemplateBank) -> Self {
        Self {
            config,
            hasher,
            coarse,
            fine,
        }
    }

    pub async fn scan<S, R>(
        &self,
        source: &mut S,
        extractor: &mut RegionExtractor<R>,
        job: &VideoJob,
    ) -> ScanReport
    where
        S: FrameSource,
        R: TextRecognizer,
    {
        let duration = source.probe_duration().await;
        info!(
            identifier = job.identifier,
            duration_secs = ?duration,
            window_frames = self.config.window_frames(),
            "scan started"
        );

        let mut state = ScanState::new();
        let mut out = Collector {
            extractor,
            job,
            rows: Vec::new(),
        };
        let mut progress = Progress::new(self.config.progress_every_secs);
        let mut frames_sampled = 0u64;
        let mut decode_starts = 0u32;
        let mut needs_start = true;

        let stop = loop {
            if let Some(reason) = self.bound_reached(&state, duration) {
                break reason;
            }

            if needs_start {
                let (offset, interval) = self.segment(&state);
                if let Err(e) = source.start(offset, interval).await {
                    error!(offset_secs = offset, error = %e, "failed to start decoder");
                    break self.end_segment(&mut state, frames_sampled, Some(e), &mut out).await;
                }
                decode_starts += 1;
                needs_start = false;
            }

            let step = match source.next_frame().await {
                Ok(Some(frame)) => {
                    frames_sampled += 1;
                    progress.tick(frame.timestamp_secs, frames_sampled, out.rows.len());
                    match state.phase {
                        Phase::Coarse => self.coarse_step(&mut state, &frame),
                        Phase::Fine => self.fine_step(&mut state, frame, &mut out).await,
                    }
                }
                Ok(None) => {
                    Step::Stop(self.end_segment(&mut state, frames_sampled, None, &mut out).await)
                }
                Err(e) => {
                    Step::Stop(self.end_segment(&mut state, frames_sampled, Some(e), &mut out).await)
                }
            };

            match step {
                Step::Continue => {}
                Step::Restart => needs_start = true,
                Step::Stop(reason) => break reason,
            }
        };

        source.stop().await;

        info!(
            identifier = job.identifier,
            stop = %stop,
            rows = out.rows.len(),
            frames_sampled,
            decode_starts,
            cursor_secs = state.cursor_secs,
            "scan finished"
        );

        ScanReport {
            rows: out.rows,
            stop,
            final_cursor_secs: state.cursor_secs,
            frames_sampled,
            decode_starts,
        }
    }

    /// Offset and interval of the segment the current phase needs.
    fn segment(&self, state: &ScanState) -> (f64, f64) {
        match state.phase {
            Phase::Coarse => (state.cursor_secs, self.config.coarse_interval_secs),
            Phase::Fine => (state.rewind_secs, self.config.fine_interval_secs),
        }
    }

    fn bound_reached(&self, state: &ScanState, duration: Option<f64>) -> Option<StopReason> {
        let cursor = state.cursor_secs;
        if !state.coarse_matched && cursor >= self.config.no_signal_timeout_secs {
            info!(cursor_secs = cursor, "no coarse match before timeout");
            return Some(StopReason::NoSignalTimeout);
        }
        if duration.is_some_and(|d| cursor >= d) {
            debug!(cursor_secs = cursor, "cursor past media duration");
            return Some(StopReason::PastDuration);
        }
        if cursor >= self.config.hard_cap_secs {
            warn!(cursor_secs = cursor, "hard cap reached");
            return Some(StopReason::HardCap);
        }
        None
    }

    fn coarse_step(&self, state: &mut ScanState, frame: &Frame) -> Step {
        let t = frame.timestamp_secs;
        let hash = self.hasher.hash(&frame.image);
        let nearest = self.coarse.nearest(hash);
        debug!(t, distance = ?nearest.map(|n| n.distance), "coarse sample");

        match nearest.filter(|n| n.distance <= self.config.coarse_threshold) {
            Some(hit) => {
                info!(
                    t,
                    distance = hit.distance,
                    bank = self.coarse.name(),
                    template = hit.identifier,
                    "coarse match, rewinding for fine scan"
                );
                state.open_window(t);
                Step::Restart
            }
            None => {
                state.cursor_secs = t + self.config.coarse_interval_secs;
                Step::Continue
            }
        }
    }

    async fn fine_step<R: TextRecognizer>(
        &self,
        state: &mut ScanState,
        frame: Frame,
        out: &mut Collector<'_, R>,
    ) -> Step {
        let index = state.window_index;
        let hash = self.hasher.hash(&frame.image);
        let hit = self
            .fine
            .within(hash, self.config.fine_threshold)
            .map(|n| n.distance);
        debug!(index, t = frame.timestamp_secs, distance = ?hit, "fine sample");

        if let Some(distance) = hit {
            state.pool.offer(index, distance, frame, self.config.tie_break);
        }
        state.window_index += 1;

        if state.window_index >= self.config.window_frames() {
            self.resolve_window(state, out).await;
            Step::Restart
        } else {
            Step::Continue
        }
    }

    /// Close the fine window: emit a row for the best candidate, if any, and
    /// move the cursor past it.
    async fn resolve_window<R: TextRecognizer>(&self, state: &mut ScanState, out: &mut Collector<'_, R>) {
        let candidates = state.pool.len();
        debug!(rewind_secs = state.rewind_secs, seen = ?state.pool.seen(), "fine window closed");

        match state.pool.take_best() {
            Some(best) => {
                let offset = state.rewind_secs + best.index as f64 * self.config.fine_interval_secs;
                info!(
                    offset_secs = offset,
                    distance = best.distance,
                    index = best.index,
                    candidates,
                    "event located"
                );
                let meta = EventMeta::for_job(out.job, offset, best.distance);
                let row = out.extractor.extract(&best.frame, meta).await;
                out.rows.push(row);
                state.close_window(offset + self.config.skip_secs);
            }
            None => {
                info!(rewind_secs = state.rewind_secs, "no fine match in window");
                state.close_window(state.rewind_secs + self.config.window_secs);
            }
        }
    }

    async fn end_segment<R: TextRecognizer>(
        &self,
        state: &mut ScanState,
        frames_sampled: u64,
        failure: Option<SourceError>,
        out: &mut Collector<'_, R>,
    ) -> StopReason {
        if frames_sampled == 0 {
            match &failure {
                Some(e) => error!(error = %e, "decoder failed before producing any frame"),
                None => error!("decoder produced no frames"),
            }
            return StopReason::UnusableSource;
        }

        if state.phase == Phase::Fine {
            self.resolve_window(state, out).await;
        }

        match failure {
            None => StopReason::StreamEnded,
            Some(e) => {
                warn!(error = %e, cursor_secs = state.cursor_secs, "decode failed, ending scan");
                StopReason::DecodeFailed(e.to_string())
            }
        }
    }
}

/// Periodic progress line keyed on media time.
struct Progress {
    every_secs: f64,
    next_at: f64,
    last: Instant,
}

impl Progress {
    fn new(every_secs: f64) -> Self {
        Self {
            every_secs,
            next_at: every_secs,
            last: Instant::now(),
        }
    }

    fn tick(&mut self, t: f64, frames: u64, rows: usize) {
        if t < self.next_at {
            return;
        }
        let minutes = (t / 60.0) as u64;
        info!(
            media_time = format!("{:02}:{:02}", minutes / 60, minutes % 60),
            frames,
            rows,
            elapsed_secs = self.last.elapsed().as_secs_f64(),
            "scan progress"
        );
        self.last = Instant::now();
        self.next_at = ((t / self.every_secs).floor() + 1.0) * self.every_secs;
    }
}
