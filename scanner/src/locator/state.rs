use vodscan_common::config::TieBreak;

use crate::source::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sparse sampling, looking for the event's neighbourhood.
    Coarse,
    /// Dense sampling of a fixed window after a coarse hit.
    Fine,
}

/// Best fine-phase frame of a window.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: u32,
    pub distance: u32,
    pub frame: Frame,
}

/// Fine-phase matches of the current window.
///
/// Every (index, distance) pair is recorded but only the best frame is
/// retained, so memory stays at one raster per window.
#[derive(Debug, Default)]
pub struct CandidatePool {
    seen: Vec<(u32, u32)>,
    best: Option<Candidate>,
}

impl CandidatePool {
    pub fn offer(&mut self, index: u32, distance: u32, frame: Frame, tie_break: TieBreak) {
        self.seen.push((index, distance));

        let replace = match &self.best {
            None => true,
            Some(best) if distance != best.distance => distance < best.distance,
            Some(best) => match tie_break {
                TieBreak::Latest => index > best.index,
                TieBreak::Earliest => index < best.index,
            },
        };
        if replace {
            self.best = Some(Candidate {
                index,
                distance,
                frame,
            });
        }
    }

    pub fn seen(&self) -> &[(u32, u32)] {
        &self.seen
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Empty the pool, returning the winning candidate.
    pub fn take_best(&mut self) -> Option<Candidate> {
        self.seen.clear();
        self.best.take()
    }
}

/// Mutable scan position of one video.
#[derive(Debug)]
pub struct ScanState {
    pub phase: Phase,
    /// Media time the next coarse segment starts from.
    pub cursor_secs: f64,
    /// Timestamp of the coarse frame that opened the current fine window.
    pub rewind_secs: f64,
    /// Fine samples consumed in the current window.
    pub window_index: u32,
    pub pool: CandidatePool,
    pub coarse_matched: bool,
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Coarse,
            cursor_secs: 0.0,
            rewind_secs: 0.0,
            window_index: 0,
            pool: CandidatePool::default(),
            coarse_matched: false,
        }
    }

    /// Enter the fine phase at the timestamp of a coarse hit.
    pub fn open_window(&mut self, at_secs: f64) {
        self.phase = Phase::Fine;
        self.rewind_secs = at_secs;
        self.cursor_secs = at_secs;
        self.window_index = 0;
        self.pool = CandidatePool::default();
        self.coarse_matched = true;
    }

    /// Return to the coarse phase, continuing from `cursor_secs`.
    pub fn close_window(&mut self, cursor_secs: f64) {
        self.phase = Phase::Coarse;
        self.cursor_secs = cursor_secs;
        self.window_index = 0;
    }
}
