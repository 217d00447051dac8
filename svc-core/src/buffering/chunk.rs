//! Typed audio chunks passed between the slicer, adapter and mixer.

use std::ops::Range;
use std::time::Duration;

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Immutable once built: the samples are only reachable through shared
/// accessors, or moved out with [`AudioChunk::into_samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
    sample_rate: u32,
    /// Monotonic index within the session.
    seq: u64,
    /// Stream position of the first sample, in samples at `sample_rate`.
    position: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::sequenced(samples, sample_rate, 0, 0)
    }

    pub fn sequenced(samples: Vec<f32>, sample_rate: u32, seq: u64, position: u64) -> Self {
        Self {
            samples,
            sample_rate,
            seq,
            position,
        }
    }

    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Stream time of the first sample.
    pub fn timestamp(&self) -> Duration {
        Duration::from_secs_f64(self.position as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One chunk plus the context audio fed to the model around it.
///
/// ```text
/// samples: | before | overlap | core | after |
///                   └── emit_range ──┘
/// ```
///
/// `overlap` is the crossfade lead-in shared with the previous window's core.
/// Moved by value into exactly one inference call.
#[derive(Debug)]
pub struct InferenceWindow {
    samples: Vec<f32>,
    core: AudioChunk,
    before: usize,
    overlap: usize,
    after: usize,
}

impl InferenceWindow {
    /// Build a window. `samples` must be `before + overlap + core.len() + after` long.
    pub fn new(
        samples: Vec<f32>,
        core: AudioChunk,
        before: usize,
        overlap: usize,
        after: usize,
    ) -> Self {
        debug_assert_eq!(samples.len(), before + overlap + core.len() + after);
        Self {
            samples,
            core,
            before,
            overlap,
            after,
        }
    }

    /// Full window including all padding.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn core(&self) -> &AudioChunk {
        &self.core
    }

    pub fn into_core(self) -> AudioChunk {
        self.core
    }

    pub fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    pub fn seq(&self) -> u64 {
        self.core.seq()
    }

    pub fn before(&self) -> usize {
        self.before
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn after(&self) -> usize {
        self.after
    }

    /// Range of `samples` that survives padding trim (overlap + core).
    pub fn emit_range(&self) -> Range<usize> {
        self.before..self.before + self.overlap + self.core.len()
    }

    /// Length of the region the adapter must return.
    pub fn emit_len(&self) -> usize {
        self.overlap + self.core.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_follows_position() {
        let chunk = AudioChunk::sequenced(vec![0.0; 100], 16_000, 3, 8_000);
        assert_eq!(chunk.seq(), 3);
        assert_eq!(chunk.timestamp(), Duration::from_millis(500));
        assert!((chunk.duration_secs() - 100.0 / 16_000.0).abs() < 1e-12);
    }

    #[test]
    fn emit_range_skips_padding() {
        let core = AudioChunk::sequenced(vec![1.0; 4], 8, 0, 0);
        let mut samples = vec![0.0; 2];
        samples.extend([0.5; 1]);
        samples.extend([1.0; 4]);
        samples.extend([0.0; 3]);
        let window = InferenceWindow::new(samples, core, 2, 1, 3);
        assert_eq!(window.emit_range(), 2..7);
        assert_eq!(window.emit_len(), 5);
        assert_eq!(&window.samples()[window.emit_range()], &[0.5, 1.0, 1.0, 1.0, 1.0]);
    }
}
