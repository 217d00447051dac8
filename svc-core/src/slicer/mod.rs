//! Chunk slicer: turns a continuous sample stream into overlapping
//! inference windows.
//!
//! ## Stream geometry
//!
//! ```text
//! stream:  ... | before | overlap | core k | after | ...
//!                                  ^start  ^cut
//! ```
//!
//! Core `k` starts where core `k-1` was cut. The overlap is the last
//! `crossfade` samples of core `k-1`, the before/after context is read from the
//! neighbouring audio. Samples before the stream start read as zero.
//!
//! A window is only produced once its lookahead (`after`, plus the boundary
//! search span) has been received, so realtime output lags input by
//! `after + search`.

pub mod boundary;
pub mod energy;
pub mod silence;

use tracing::{debug, trace};

use crate::buffering::chunk::{AudioChunk, InferenceWindow};
use crate::config::{RealtimeAlgorithm, WindowLayout};
use energy::{SilenceThreshold, ENERGY_FRAME_SECONDS};

pub struct ChunkSlicer {
    layout: WindowLayout,
    policy: RealtimeAlgorithm,
    threshold: SilenceThreshold,
    sample_rate: u32,
    /// Energy frame used by the boundary search.
    frame: usize,
    /// Retained samples, starting at absolute index `base`.
    history: Vec<f32>,
    base: u64,
    /// Absolute index one past the last received sample.
    received: u64,
    /// Absolute index where the next core starts.
    next_start: u64,
    next_seq: u64,
    finished: bool,
}

impl ChunkSlicer {
    pub fn new(
        layout: WindowLayout,
        policy: RealtimeAlgorithm,
        threshold: SilenceThreshold,
        sample_rate: u32,
    ) -> Self {
        let frame = ((ENERGY_FRAME_SECONDS * sample_rate as f32).round() as usize).max(1);
        Self {
            layout,
            policy,
            threshold,
            sample_rate,
            frame,
            history: Vec::new(),
            base: 0,
            received: 0,
            next_start: 0,
            next_seq: 0,
            finished: false,
        }
    }

    pub fn layout(&self) -> WindowLayout {
        self.layout
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feed newly captured samples.
    pub fn push(&mut self, samples: &[f32]) {
        if self.finished {
            debug!(len = samples.len(), "push after finish ignored");
            return;
        }
        self.history.extend_from_slice(samples);
        self.received += samples.len() as u64;
    }

    /// Mark end of input. Remaining audio is flushed as zero-padded chunks.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Start over for a new session.
    pub fn reset(&mut self) {
        self.history.clear();
        self.base = 0;
        self.received = 0;
        self.next_start = 0;
        self.next_seq = 0;
        self.finished = false;
    }

    /// Samples received but not yet assigned to a core.
    pub fn pending_samples(&self) -> u64 {
        self.received.saturating_sub(self.next_start)
    }

    /// Lookahead needed past a nominal cut before a window can be built.
    fn lookahead(&self) -> u64 {
        let search_margin = if self.layout.search > 0 {
            self.layout.search + self.frame
        } else {
            0
        };
        (self.layout.after + search_margin) as u64
    }

    /// Number of complete chunks that could be produced right now.
    pub fn ready_chunks(&self) -> u64 {
        let usable = self.received.saturating_sub(self.lookahead());
        usable.saturating_sub(self.next_start) / self.layout.block as u64
    }

    /// Drop all but the newest ready chunk. Returns how many were dropped.
    ///
    /// Called when inference has fallen behind real time: the backlog is
    /// superseded rather than queued. Dropped chunks still consume sequence
    /// numbers so gaps are visible downstream.
    pub fn drop_stale(&mut self) -> u64 {
        if self.finished {
            return 0;
        }
        let ready = self.ready_chunks();
        if ready <= 1 {
            return 0;
        }
        let dropped = ready - 1;
        self.next_start += dropped * self.layout.block as u64;
        self.next_seq += dropped;
        self.trim();
        dropped
    }

    /// Next inference window, or `None` if more input is needed (or the
    /// stream is finished and fully consumed).
    pub fn next_chunk(&mut self) -> Option<InferenceWindow> {
        if self.next_start >= self.received && (self.finished || self.received == 0) {
            return None;
        }

        let block = self.layout.block as u64;
        let nominal_cut = self.next_start + block;
        if !self.finished && self.received < nominal_cut + self.lookahead() {
            return None;
        }

        let cut = match self.policy {
            RealtimeAlgorithm::ConstantInterval => nominal_cut,
            RealtimeAlgorithm::SpeechBoundary => self.search_cut(nominal_cut),
        };

        let start = self.next_start;
        let overlap = self.layout.crossfade as u64;
        let before = self.layout.before as u64;
        let after = self.layout.after as u64;

        let window_start = start as i64 - (overlap + before) as i64;
        let window_end = (cut + after) as i64;
        let samples = self.gather(window_start, window_end);
        let core_samples = self.gather(start as i64, cut as i64);

        let core = AudioChunk::sequenced(core_samples, self.sample_rate, self.next_seq, start);
        trace!(
            seq = self.next_seq,
            start,
            cut,
            len = core.len(),
            "chunk sliced"
        );

        self.next_seq += 1;
        self.next_start = cut;
        self.trim();

        Some(InferenceWindow::new(
            samples,
            core,
            self.layout.before,
            self.layout.crossfade,
            self.layout.after,
        ))
    }

    fn search_cut(&self, nominal_cut: u64) -> u64 {
        let search = self.layout.search as u64;
        if search == 0 {
            return nominal_cut;
        }
        // Keep at least half a block per chunk.
        let min_cut = self.next_start + (self.layout.block as u64 / 2).max(1);
        let lo = nominal_cut.saturating_sub(search).max(min_cut);
        let hi = nominal_cut + search;

        let half = (self.frame / 2) as u64;
        let region_start = lo.saturating_sub(half);
        let region_end = hi + self.frame as u64;
        let region = self.gather(region_start as i64, region_end as i64);

        let cut = boundary::find_cut(
            &region,
            (nominal_cut - region_start) as usize,
            (lo - region_start) as usize,
            (hi - region_start) as usize,
            self.frame,
            self.threshold,
        );
        let chosen = region_start + cut.offset as u64;
        trace!(
            nominal_cut,
            chosen,
            energy = cut.energy,
            naive_energy = cut.naive_energy,
            "speech boundary cut"
        );
        chosen
    }

    /// Copy absolute range `[start, end)`; anything not retained reads as 0.
    fn gather(&self, start: i64, end: i64) -> Vec<f32> {
        let len = (end - start).max(0) as usize;
        let mut out = vec![0.0f32; len];
        let avail_start = self.base as i64;
        let avail_end = self.received as i64;
        let copy_start = start.max(avail_start);
        let copy_end = end.min(avail_end);
        if copy_start < copy_end {
            let src = (copy_start - avail_start) as usize..(copy_end - avail_start) as usize;
            let dst = (copy_start - start) as usize;
            out[dst..dst + src.len()].copy_from_slice(&self.history[src]);
        }
        out
    }

    /// Forget samples no future window can reference.
    fn trim(&mut self) {
        let keep_from = self
            .next_start
            .saturating_sub((self.layout.crossfade + self.layout.before) as u64)
            .min(self.received);
        if keep_from > self.base {
            let drop = (keep_from - self.base) as usize;
            self.history.drain(..drop);
            self.base = keep_from;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(block: usize, crossfade: usize, before: usize, after: usize) -> WindowLayout {
        WindowLayout {
            block,
            crossfade,
            before,
            after,
            search: 0,
        }
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    fn constant(l: WindowLayout) -> ChunkSlicer {
        ChunkSlicer::new(
            l,
            RealtimeAlgorithm::ConstantInterval,
            SilenceThreshold::absolute(-40.0),
            1_000,
        )
    }

    #[test]
    fn constant_interval_cuts_at_exact_block_multiples() {
        let mut slicer = constant(layout(100, 10, 20, 30));
        let mut positions = Vec::new();
        // Feed in awkward pieces to make sure cuts do not follow push sizes.
        for piece in ramp(1_000).chunks(37) {
            slicer.push(piece);
            while let Some(w) = slicer.next_chunk() {
                assert_eq!(w.core().len(), 100);
                positions.push(w.core().position());
            }
        }
        let expected: Vec<u64> = (0..positions.len() as u64).map(|k| k * 100).collect();
        assert_eq!(positions, expected);
        // 1000 samples with 30 lookahead → 9 complete windows.
        assert_eq!(positions.len(), 9);
    }

    #[test]
    fn window_carries_context_and_zero_prefix() {
        let mut slicer = constant(layout(100, 10, 20, 30));
        slicer.push(&ramp(400));

        let first = slicer.next_chunk().expect("first window");
        assert_eq!(first.samples().len(), 20 + 10 + 100 + 30);
        // before + overlap precede the stream start → zeros.
        assert!(first.samples()[..30].iter().all(|&s| s == 0.0));
        assert_eq!(first.samples()[30], 0.0);
        assert_eq!(first.samples()[31], 1.0);
        assert_eq!(first.samples()[159], 129.0);

        let second = slicer.next_chunk().expect("second window");
        assert_eq!(second.seq(), 1);
        // Window starts at 100 - 10 - 20 = 70.
        assert_eq!(second.samples()[0], 70.0);
        // Overlap region covers the tail of the previous core.
        assert_eq!(&second.samples()[20..30], &ramp(100)[90..100]);
        assert_eq!(second.core().samples()[0], 100.0);
    }

    #[test]
    fn waits_for_lookahead() {
        let mut slicer = constant(layout(100, 0, 0, 50));
        slicer.push(&ramp(149));
        assert!(slicer.next_chunk().is_none());
        slicer.push(&[149.0]);
        assert!(slicer.next_chunk().is_some());
    }

    #[test]
    fn finish_flushes_zero_padded_tail() {
        let mut slicer = constant(layout(100, 0, 0, 50));
        slicer.push(&ramp(130));
        slicer.finish();
        let a = slicer.next_chunk().expect("full chunk");
        let b = slicer.next_chunk().expect("tail chunk");
        assert!(slicer.next_chunk().is_none());
        assert_eq!(a.core().len(), 100);
        assert_eq!(b.core().len(), 100);
        assert_eq!(b.core().samples()[29], 129.0);
        assert!(b.core().samples()[30..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn drop_stale_keeps_only_newest_chunk() {
        let mut slicer = constant(layout(100, 10, 10, 0));
        slicer.push(&ramp(450));
        assert_eq!(slicer.ready_chunks(), 4);
        assert_eq!(slicer.drop_stale(), 3);
        let w = slicer.next_chunk().expect("newest chunk");
        assert_eq!(w.seq(), 3);
        assert_eq!(w.core().position(), 300);
        // Context still available after the drop.
        assert_eq!(w.samples()[0], 280.0);
        assert!(slicer.next_chunk().is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut slicer = constant(layout(100, 10, 10, 10));
        for piece in ramp(100_000).chunks(500) {
            slicer.push(piece);
            while slicer.next_chunk().is_some() {}
        }
        assert!(slicer.history.len() < 200, "retained {}", slicer.history.len());
    }

    #[test]
    fn speech_boundary_prefers_quiet_cut() {
        let l = WindowLayout {
            block: 1_000,
            crossfade: 0,
            before: 0,
            after: 0,
            search: 200,
        };
        let mut slicer = ChunkSlicer::new(
            l,
            RealtimeAlgorithm::SpeechBoundary,
            SilenceThreshold::absolute(-40.0),
            1_000,
        );
        // Loud signal with a silent gap at 880..920.
        let mut signal: Vec<f32> = (0..3_000)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        for s in &mut signal[880..920] {
            *s = 0.0;
        }
        slicer.push(&signal);
        let w = slicer.next_chunk().expect("window");
        let cut = w.core().len();
        assert!((880..=920).contains(&cut), "cut={cut}");
        let next = slicer.next_chunk().expect("second window");
        assert_eq!(next.core().position(), cut as u64);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut slicer = constant(layout(10, 0, 0, 0));
        slicer.push(&ramp(30));
        assert!(slicer.next_chunk().is_some());
        slicer.reset();
        assert_eq!(slicer.pending_samples(), 0);
        slicer.push(&ramp(10));
        let w = slicer.next_chunk().expect("window after reset");
        assert_eq!(w.seq(), 0);
        assert_eq!(w.core().position(), 0);
    }
}
