//! Typed session configuration.
//!
//! Every option the front-ends can set lives here with its valid range.
//! `SessionConfig::validate` runs before a session starts; nothing downstream
//! re-checks ranges.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffering::RING_CAPACITY;
use crate::error::{Result, SvcError};
use crate::mixer::FadeCurve;

/// Pitch estimation algorithm passed through to the model's F0 estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum F0Method {
    Crepe,
    CrepeTiny,
    Parselmouth,
    #[default]
    Dio,
    Harvest,
}

impl F0Method {
    pub const ALL: [F0Method; 5] = [
        F0Method::Crepe,
        F0Method::CrepeTiny,
        F0Method::Parselmouth,
        F0Method::Dio,
        F0Method::Harvest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            F0Method::Crepe => "crepe",
            F0Method::CrepeTiny => "crepe-tiny",
            F0Method::Parselmouth => "parselmouth",
            F0Method::Dio => "dio",
            F0Method::Harvest => "harvest",
        }
    }
}

impl fmt::Display for F0Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for F0Method {
    type Err = SvcError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        F0Method::ALL
            .into_iter()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| SvcError::config(format!("unknown f0 method '{s}'")))
    }
}

/// How the realtime input stream is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeAlgorithm {
    /// Cut strictly every `block_seconds`.
    #[default]
    #[serde(rename = "1")]
    ConstantInterval,
    /// Prefer a low-energy cut point near each block boundary.
    #[serde(rename = "2")]
    SpeechBoundary,
}

impl fmt::Display for RealtimeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealtimeAlgorithm::ConstantInterval => f.write_str("1 (constant interval)"),
            RealtimeAlgorithm::SpeechBoundary => f.write_str("2 (speech boundary)"),
        }
    }
}

impl FromStr for RealtimeAlgorithm {
    type Err = SvcError;

    fn from_str(s: &str) -> Result<Self> {
        // The GUI combo labels start with the version digit ("1 (Divide constantly)").
        match s.trim().chars().next() {
            Some('1') => Ok(RealtimeAlgorithm::ConstantInterval),
            Some('2') => Ok(RealtimeAlgorithm::SpeechBoundary),
            _ => Err(SvcError::config(format!("unknown realtime algorithm '{s}'"))),
        }
    }
}

/// Where the model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

impl ComputeDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Mps => "mps",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeDevice {
    type Err = SvcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "cuda" | "gpu" => Ok(ComputeDevice::Cuda),
            "mps" => Ok(ComputeDevice::Mps),
            other => Err(SvcError::config(format!("unknown compute device '{other}'"))),
        }
    }
}

/// Complete configuration for one conversion session (realtime or offline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    // ── paths ──
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    pub cluster_model_path: Option<PathBuf>,

    // ── voice ──
    /// Speaker name from the model's speaker table. `None` selects the first.
    pub speaker: Option<String>,
    /// Pitch shift in semitones. Ignored when `auto_predict_f0` is set.
    pub transpose: i32,
    pub auto_predict_f0: bool,
    pub f0_method: F0Method,
    pub cluster_infer_ratio: f32,
    pub noise_scale: f32,
    /// Seed for the synthesizer noise. Fixed per session so runs repeat.
    pub noise_seed: u64,

    // ── slicing ──
    /// Silence threshold in dB (negative).
    pub silence_threshold: f32,
    pub absolute_thresh: bool,
    pub pad_seconds: f32,
    pub chunk_seconds: f32,

    // ── realtime ──
    pub crossfade_seconds: f32,
    pub block_seconds: f32,
    pub additional_infer_before_seconds: f32,
    pub additional_infer_after_seconds: f32,
    pub realtime_algorithm: RealtimeAlgorithm,
    /// Half-width of the cut-point search used by the speech-boundary slicer.
    pub boundary_search_seconds: f32,
    pub fade_curve: FadeCurve,
    /// Silence queued ahead of the first block so playback has a cushion
    /// against jitter between block bursts.
    pub output_buffer_seconds: f32,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    pub passthrough_original: bool,
    pub device: ComputeDevice,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            config_path: PathBuf::new(),
            cluster_model_path: None,
            speaker: None,
            transpose: 0,
            auto_predict_f0: false,
            f0_method: F0Method::Dio,
            cluster_infer_ratio: 0.0,
            noise_scale: 0.4,
            noise_seed: 0,
            silence_threshold: -35.0,
            absolute_thresh: true,
            pad_seconds: 0.1,
            chunk_seconds: 0.5,
            crossfade_seconds: 0.05,
            block_seconds: 0.35,
            additional_infer_before_seconds: 0.15,
            additional_infer_after_seconds: 0.1,
            realtime_algorithm: RealtimeAlgorithm::ConstantInterval,
            boundary_search_seconds: 0.05,
            fade_curve: FadeCurve::RaisedCosine,
            output_buffer_seconds: 0.05,
            input_device: None,
            output_device: None,
            passthrough_original: false,
            device: ComputeDevice::Cpu,
        }
    }
}

fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(SvcError::config(format!(
            "{name}={value} is outside [{min}, {max}]"
        )));
    }
    Ok(())
}

impl SessionConfig {
    /// Check every range and every path. Device indices are resolved later,
    /// against the live device list.
    pub fn validate(&self) -> Result<()> {
        self.validate_ranges()?;
        self.validate_paths()
    }

    pub fn validate_ranges(&self) -> Result<()> {
        if !(-36..=36).contains(&self.transpose) {
            return Err(SvcError::config(format!(
                "transpose={} is outside [-36, 36]",
                self.transpose
            )));
        }
        check_range("cluster_infer_ratio", self.cluster_infer_ratio, 0.0, 1.0)?;
        check_range("noise_scale", self.noise_scale, 0.0, 1.0)?;
        check_range("silence_threshold", self.silence_threshold, -60.0, 0.0)?;
        check_range("pad_seconds", self.pad_seconds, 0.0, 1.0)?;
        check_range("chunk_seconds", self.chunk_seconds, 0.0, 3.0)?;
        check_range("crossfade_seconds", self.crossfade_seconds, 0.0, 0.6)?;
        check_range("block_seconds", self.block_seconds, 0.0, 3.0)?;
        check_range(
            "additional_infer_before_seconds",
            self.additional_infer_before_seconds,
            0.0,
            2.0,
        )?;
        check_range(
            "additional_infer_after_seconds",
            self.additional_infer_after_seconds,
            0.0,
            2.0,
        )?;
        check_range(
            "boundary_search_seconds",
            self.boundary_search_seconds,
            0.0,
            0.5,
        )?;
        check_range("output_buffer_seconds", self.output_buffer_seconds, 0.0, 1.0)?;
        if self.block_seconds <= 0.0 {
            return Err(SvcError::config("block_seconds must be positive"));
        }
        if self.crossfade_seconds > self.block_seconds {
            return Err(SvcError::config(format!(
                "crossfade_seconds={} must not exceed block_seconds={}",
                self.crossfade_seconds, self.block_seconds
            )));
        }
        Ok(())
    }

    pub fn validate_paths(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() || !self.model_path.is_file() {
            return Err(SvcError::config(format!(
                "model checkpoint not found: {}",
                self.model_path.display()
            )));
        }
        if self.config_path.as_os_str().is_empty() || !self.config_path.is_file() {
            return Err(SvcError::config(format!(
                "model config not found: {}",
                self.config_path.display()
            )));
        }
        if let Some(cluster) = &self.cluster_model_path {
            if !cluster.is_file() {
                return Err(SvcError::config(format!(
                    "cluster model not found: {}",
                    cluster.display()
                )));
            }
        }
        Ok(())
    }

    /// Transpose actually applied by the adapter: zero when the model
    /// predicts F0 itself.
    pub fn effective_transpose(&self) -> i32 {
        if self.auto_predict_f0 {
            0
        } else {
            self.transpose
        }
    }

    /// Copy of this config with mutually exclusive options resolved, as
    /// reported back to front-ends.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.transpose = self.effective_transpose();
        out
    }

    /// Sample layout of one inference window at `sample_rate`.
    pub fn layout(&self, sample_rate: u32) -> WindowLayout {
        let block = seconds_to_samples(self.block_seconds, sample_rate).max(1);
        let crossfade = seconds_to_samples(self.crossfade_seconds, sample_rate).min(block);
        let search = match self.realtime_algorithm {
            RealtimeAlgorithm::ConstantInterval => 0,
            RealtimeAlgorithm::SpeechBoundary => {
                seconds_to_samples(self.boundary_search_seconds, sample_rate).min(block / 4)
            }
        };
        WindowLayout {
            block,
            crossfade,
            before: seconds_to_samples(self.additional_infer_before_seconds, sample_rate),
            after: seconds_to_samples(self.additional_infer_after_seconds, sample_rate),
            search,
        }
    }

    /// Reject layouts whose largest window cannot fit in the device ring.
    pub fn validate_layout(&self, sample_rate: u32) -> Result<WindowLayout> {
        let layout = self.layout(sample_rate);
        if layout.max_window_len() > RING_CAPACITY {
            return Err(SvcError::config(format!(
                "inference window of {} samples exceeds ring capacity {}",
                layout.max_window_len(),
                RING_CAPACITY
            )));
        }
        Ok(layout)
    }
}

/// Realtime window geometry in samples.
///
/// ```text
/// | before | crossfade | block (core) | after |
/// ```
/// The crossfade region overlaps the tail of the previous window's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    pub block: usize,
    pub crossfade: usize,
    pub before: usize,
    pub after: usize,
    /// Half-width of the speech-boundary search (0 for constant interval).
    pub search: usize,
}

impl WindowLayout {
    /// Window length for a nominal block.
    pub fn window_len(&self) -> usize {
        self.before + self.crossfade + self.block + self.after
    }

    /// Longest possible window (speech-boundary cuts may stretch a block).
    pub fn max_window_len(&self) -> usize {
        self.window_len() + 2 * self.search
    }
}

pub fn seconds_to_samples(seconds: f32, sample_rate: u32) -> usize {
    (seconds.max(0.0) as f64 * sample_rate as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_range_validation() {
        SessionConfig::default()
            .validate_ranges()
            .expect("defaults must be valid");
    }

    #[test]
    fn auto_predict_f0_disables_transpose() {
        let config = SessionConfig {
            transpose: 7,
            auto_predict_f0: true,
            ..SessionConfig::default()
        };
        assert_eq!(config.effective_transpose(), 0);
        assert_eq!(config.normalized().transpose, 0);

        let manual = SessionConfig {
            transpose: 7,
            ..SessionConfig::default()
        };
        assert_eq!(manual.effective_transpose(), 7);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_ratio = SessionConfig {
            cluster_infer_ratio: 1.5,
            ..SessionConfig::default()
        };
        assert!(matches!(
            bad_ratio.validate_ranges(),
            Err(SvcError::Configuration(_))
        ));

        let bad_transpose = SessionConfig {
            transpose: 40,
            ..SessionConfig::default()
        };
        assert!(bad_transpose.validate_ranges().is_err());

        let crossfade_too_long = SessionConfig {
            crossfade_seconds: 0.5,
            block_seconds: 0.2,
            ..SessionConfig::default()
        };
        assert!(crossfade_too_long.validate_ranges().is_err());

        let long_cushion = SessionConfig {
            output_buffer_seconds: 2.0,
            ..SessionConfig::default()
        };
        assert!(long_cushion.validate_ranges().is_err());

        let nan_noise = SessionConfig {
            noise_scale: f32::NAN,
            ..SessionConfig::default()
        };
        assert!(nan_noise.validate_ranges().is_err());
    }

    #[test]
    fn missing_paths_are_configuration_errors() {
        let config = SessionConfig {
            model_path: PathBuf::from("/definitely/not/here/G_0.pth"),
            config_path: PathBuf::from("/definitely/not/here/config.json"),
            ..SessionConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SvcError::Configuration(_)), "got {err:?}");
    }

    #[test]
    fn layout_converts_seconds_to_samples() {
        let config = SessionConfig {
            block_seconds: 0.5,
            crossfade_seconds: 0.05,
            additional_infer_before_seconds: 0.1,
            additional_infer_after_seconds: 0.2,
            ..SessionConfig::default()
        };
        let layout = config.layout(16_000);
        assert_eq!(layout.block, 8_000);
        assert_eq!(layout.crossfade, 800);
        assert_eq!(layout.before, 1_600);
        assert_eq!(layout.after, 3_200);
        assert_eq!(layout.search, 0);
        assert_eq!(layout.window_len(), 13_600);
    }

    #[test]
    fn speech_boundary_search_is_bounded_by_quarter_block() {
        let config = SessionConfig {
            realtime_algorithm: RealtimeAlgorithm::SpeechBoundary,
            block_seconds: 0.1,
            boundary_search_seconds: 0.5,
            ..SessionConfig::default()
        };
        let layout = config.layout(10_000);
        assert_eq!(layout.block, 1_000);
        assert_eq!(layout.search, 250);
    }

    #[test]
    fn parses_front_end_labels() {
        assert_eq!(
            "1 (Divide constantly)".parse::<RealtimeAlgorithm>().unwrap(),
            RealtimeAlgorithm::ConstantInterval
        );
        assert_eq!(
            "2 (Divide by speech)".parse::<RealtimeAlgorithm>().unwrap(),
            RealtimeAlgorithm::SpeechBoundary
        );
        assert_eq!("crepe-tiny".parse::<F0Method>().unwrap(), F0Method::CrepeTiny);
        assert_eq!("GPU".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cuda);
        assert!("yin".parse::<F0Method>().is_err());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(SessionConfig::default()).expect("serialize config");
        assert_eq!(json["f0Method"], "dio");
        assert_eq!(json["realtimeAlgorithm"], "1");
        assert_eq!(json["device"], "cpu");
        assert!(json.get("additionalInferBeforeSeconds").is_some());
        assert!(json.get("outputBufferSeconds").is_some());

        let partial: SessionConfig =
            serde_json::from_str(r#"{"transpose": 3, "f0Method": "crepe"}"#)
                .expect("partial config deserializes with defaults");
        assert_eq!(partial.transpose, 3);
        assert_eq!(partial.f0_method, F0Method::Crepe);
        assert_eq!(partial.block_seconds, SessionConfig::default().block_seconds);
    }
}
