//! Short-time energy helpers shared by the speech-boundary slicer and the
//! offline silence splitter.

use crate::config::SessionConfig;

/// Energy frame length in seconds (10 ms).
pub const ENERGY_FRAME_SECONDS: f32 = 0.01;

/// Floor applied before taking the log so digital silence maps to -100 dB.
const MIN_AMPLITUDE: f32 = 1e-5;

/// Compute the root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(MIN_AMPLITUDE).log10()
}

/// How `SilenceThreshold::db` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    /// dBFS.
    Absolute,
    /// dB relative to a reference level (the loudest frame in scope).
    Relative,
}

/// Frames quieter than this are silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceThreshold {
    pub db: f32,
    pub mode: ThresholdMode,
}

impl SilenceThreshold {
    pub fn absolute(db: f32) -> Self {
        Self {
            db,
            mode: ThresholdMode::Absolute,
        }
    }

    pub fn relative(db: f32) -> Self {
        Self {
            db,
            mode: ThresholdMode::Relative,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        if config.absolute_thresh {
            Self::absolute(config.silence_threshold)
        } else {
            Self::relative(config.silence_threshold)
        }
    }

    /// `reference_rms` is only consulted in relative mode.
    pub fn is_silent(&self, frame_rms: f32, reference_rms: f32) -> bool {
        let level = amplitude_to_db(frame_rms);
        match self.mode {
            ThresholdMode::Absolute => level < self.db,
            ThresholdMode::Relative => level < amplitude_to_db(reference_rms) + self.db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!((rms(&samples) - 0.5).abs() < 1e-5);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn digital_silence_is_floored() {
        assert!((amplitude_to_db(0.0) + 100.0).abs() < 1e-3);
        assert!(amplitude_to_db(1.0).abs() < 1e-6);
    }

    #[test]
    fn absolute_and_relative_thresholds() {
        let abs = SilenceThreshold::absolute(-40.0);
        assert!(abs.is_silent(0.001, 1.0)); // -60 dB
        assert!(!abs.is_silent(0.1, 1.0)); // -20 dB

        // -30 dB relative to a -20 dB reference → cut-off at -50 dB.
        let rel = SilenceThreshold::relative(-30.0);
        assert!(!rel.is_silent(0.01, 0.1)); // -40 dB
        assert!(rel.is_silent(0.001, 0.1)); // -60 dB
    }
}
