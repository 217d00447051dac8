//! Crossfade mixer: stitches independently inferred chunks into one stream.
//!
//! ## Algorithm
//!
//! Each inferred chunk starts with `crossfade` samples that cover the same
//! stream time as the trailing `crossfade` samples of the previous chunk.
//!
//! 1. Blend the leading region with the held tail: `out = tail·(1−g) + new·g`,
//!    where `g` rises monotonically from 0 to 1 across the region.
//! 2. Emit everything up to (not including) the new chunk's own tail.
//! 3. Hold that tail for the next call.
//!
//! Every call therefore emits `chunk.len() − crossfade` samples: one block,
//! no drift. Fade-in and fade-out gains are complementary, so a seam between
//! two identical signals reproduces the signal exactly (up to rounding).

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, SvcError};

/// Shape of the fade-in gain. The fade-out gain is always `1 − fade_in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FadeCurve {
    /// `g = t`
    Linear,
    /// `g = ½ − ½·cos(πt)`: zero slope at both ends, softer seams.
    #[default]
    RaisedCosine,
}

impl FadeCurve {
    /// Fade-in gain for sample `index` of an `len`-sample crossfade.
    ///
    /// Sampled at bin centres so neither end is exactly 0 or 1 and the
    /// curve is symmetric: `fade_in(i) + fade_in(len-1-i) == 1`.
    pub fn fade_in(self, index: usize, len: usize) -> f32 {
        if len == 0 {
            return 1.0;
        }
        let t = (index as f32 + 0.5) / len as f32;
        match self {
            FadeCurve::Linear => t,
            FadeCurve::RaisedCosine => 0.5 - 0.5 * (PI * t).cos(),
        }
    }

    /// `(fade_out, fade_in)` gains for one sample position.
    pub fn gains(self, index: usize, len: usize) -> (f32, f32) {
        let fade_in = self.fade_in(index, len);
        (1.0 - fade_in, fade_in)
    }
}

impl fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FadeCurve::Linear => f.write_str("linear"),
            FadeCurve::RaisedCosine => f.write_str("raised-cosine"),
        }
    }
}

impl FromStr for FadeCurve {
    type Err = SvcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "raised-cosine" | "cosine" | "hann" => Ok(FadeCurve::RaisedCosine),
            other => Err(SvcError::config(format!("unknown fade curve '{other}'"))),
        }
    }
}

/// Trailing samples of the previous output, waiting to be faded out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossfadeBuffer {
    tail: Vec<f32>,
}

impl CrossfadeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[f32] {
        &self.tail
    }

    pub fn len(&self) -> usize {
        self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_empty()
    }

    /// Release the held tail (end of an offline stream).
    pub fn into_samples(self) -> Vec<f32> {
        self.tail
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrossfadeMixer {
    crossfade: usize,
    curve: FadeCurve,
}

impl CrossfadeMixer {
    pub fn new(crossfade: usize, curve: FadeCurve) -> Self {
        Self { crossfade, curve }
    }

    pub fn crossfade(&self) -> usize {
        self.crossfade
    }

    pub fn curve(&self) -> FadeCurve {
        self.curve
    }

    /// Blend `new_chunk` into the stream. Returns the emitted block and the
    /// buffer for the next call. An empty buffer (first chunk) means no fade.
    pub fn mix(&self, new_chunk: AudioChunk, buffer: CrossfadeBuffer) -> (AudioChunk, CrossfadeBuffer) {
        let sample_rate = new_chunk.sample_rate();
        let seq = new_chunk.seq();
        let position = new_chunk.position();
        let mut samples = new_chunk.into_samples();

        let hold = self.crossfade.min(samples.len());
        let emit_len = samples.len() - hold;
        let tail = samples.split_off(emit_len);

        let fade_len = buffer.len().min(hold).min(emit_len);
        let held = buffer.samples();
        for (i, sample) in samples.iter_mut().take(fade_len).enumerate() {
            let (fade_out, fade_in) = self.curve.gains(i, fade_len);
            *sample = held[i] * fade_out + *sample * fade_in;
        }

        (
            AudioChunk::sequenced(samples, sample_rate, seq, position),
            CrossfadeBuffer { tail },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn chunk(samples: Vec<f32>, seq: u64) -> AudioChunk {
        AudioChunk::sequenced(samples, 1_000, seq, 0)
    }

    #[test]
    fn gains_sum_to_unity_everywhere() {
        for curve in [FadeCurve::Linear, FadeCurve::RaisedCosine] {
            for len in [1usize, 2, 7, 64, 441, 2_205] {
                for i in 0..len {
                    let (out, fade_in) = curve.gains(i, len);
                    assert_abs_diff_eq!(out + fade_in, 1.0, epsilon = 1e-6);
                    assert!((0.0..=1.0).contains(&fade_in), "{curve} gain {fade_in}");
                }
            }
        }
    }

    #[test]
    fn fade_in_is_monotonic_and_symmetric() {
        for curve in [FadeCurve::Linear, FadeCurve::RaisedCosine] {
            let len = 100;
            for i in 1..len {
                assert!(curve.fade_in(i, len) > curve.fade_in(i - 1, len));
            }
            for i in 0..len {
                assert_abs_diff_eq!(
                    curve.fade_in(i, len) + curve.fade_in(len - 1 - i, len),
                    1.0,
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn first_chunk_passes_through_unfaded() {
        let mixer = CrossfadeMixer::new(3, FadeCurve::Linear);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let (out, buffer) = mixer.mix(chunk(input.clone(), 0), CrossfadeBuffer::new());
        assert_eq!(out.samples(), &input[..7]);
        assert_eq!(buffer.samples(), &input[7..]);
    }

    #[test]
    fn constant_signal_has_no_seam_dip() {
        let mixer = CrossfadeMixer::new(40, FadeCurve::RaisedCosine);
        let mut buffer = CrossfadeBuffer::new();
        let mut stream = Vec::new();
        for seq in 0..5 {
            let (out, next) = mixer.mix(chunk(vec![0.5; 240], seq), buffer);
            assert_eq!(out.len(), 200, "every call emits one block");
            stream.extend_from_slice(out.samples());
            buffer = next;
        }
        for s in stream {
            assert_abs_diff_eq!(s, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn seam_blends_from_old_to_new() {
        let mixer = CrossfadeMixer::new(4, FadeCurve::Linear);
        let (_, buffer) = mixer.mix(chunk(vec![1.0; 12], 0), CrossfadeBuffer::new());
        let (out, next) = mixer.mix(chunk(vec![0.0; 12], 1), buffer);

        let seam = &out.samples()[..4];
        assert_abs_diff_eq!(seam[0], 0.875, epsilon = 1e-6);
        assert_abs_diff_eq!(seam[3], 0.125, epsilon = 1e-6);
        assert!(seam.windows(2).all(|w| w[1] < w[0]));
        assert!(out.samples()[4..].iter().all(|&s| s == 0.0));
        assert_eq!(out.seq(), 1);
        assert_eq!(next.len(), 4);
    }

    #[test]
    fn zero_crossfade_is_plain_concatenation() {
        let mixer = CrossfadeMixer::new(0, FadeCurve::RaisedCosine);
        let (out, buffer) = mixer.mix(chunk(vec![0.25; 8], 0), CrossfadeBuffer::new());
        assert_eq!(out.samples(), &[0.25; 8]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn parses_curve_names() {
        assert_eq!("linear".parse::<FadeCurve>().unwrap(), FadeCurve::Linear);
        assert_eq!("hann".parse::<FadeCurve>().unwrap(), FadeCurve::RaisedCosine);
        assert!("equal-power".parse::<FadeCurve>().is_err());
    }
}
