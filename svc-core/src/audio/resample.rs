//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Devices run at their native rate (commonly 48 kHz) while the voice model
//! has its own fixed rate (e.g. 44.1 kHz). The pipeline uses one
//! `RateConverter` on the way in and one on the way out; both live on the
//! session worker, where allocation is allowed.
//!
//! When the two rates match, `RateConverter` is a passthrough: no rubato
//! session is created and samples are copied unchanged.
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 44_100, 960)?;
//! let out = rc.process(&raw_samples); // Vec<f32> at 44.1 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, SvcError};

/// Input frames per rubato call used by the streaming pipeline.
pub const STREAM_CHUNK: usize = 960;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when the rates match (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `SvcError::Configuration` if rubato rejects the ratio.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(SvcError::config(format!(
                "invalid resampling rates {from_rate} -> {to_rate}"
            )));
        }
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| SvcError::config(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(from_rate, to_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples accumulate until a full `chunk_size` block is available; the
    /// remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Output frames of filter delay at the start of the stream.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Input samples waiting for a full chunk.
    pub fn buffered(&self) -> usize {
        self.input_buf.len()
    }

    /// Drop buffered input and restart the filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }

    /// Returns `true` when the rates match (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a complete clip. Output length is `round(len · to / from)`,
/// with the filter delay removed.
pub fn resample_clip(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    let mut rc = RateConverter::new(from_rate, to_rate, STREAM_CHUNK)?;
    let expected =
        (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(samples);
    // Flush the tail and the filter delay with silence.
    let ratio = from_rate as f64 / to_rate as f64;
    let flush = STREAM_CHUNK + (delay as f64 * ratio).ceil() as usize + STREAM_CHUNK;
    out.extend(rc.process(&vec![0.0; flush]));

    let start = delay.min(out.len());
    let mut out = out.split_off(start);
    out.resize(expected, 0.0);
    Ok(out)
}
