//! Inference adapter: runs the model on one window and trims its padding.
//!
//! ## Steps (per call)
//!
//! ```text
//! window ─► encode_content ─► estimate_f0 ─► resize + fill unvoiced
//!        ─► transpose (unless auto F0) ─► cluster blend (ratio > 0)
//!        ─► seeded noise · noise_scale ─► synthesize(speaker) ─► trim
//! ```
//!
//! Errors from any model call propagate unchanged; there are no retries.

use std::f32::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::buffering::chunk::{AudioChunk, InferenceWindow};
use crate::config::{ComputeDevice, F0Method, SessionConfig};
use crate::error::{Result, SvcError};
use crate::inference::cluster::{blend_content, ClusterModel};
use crate::inference::{f0, LoadedModel, ModelHandle, Speaker, SynthesisRequest};

/// The subset of `SessionConfig` the adapter reads, with mutually exclusive
/// options already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    /// Applied transpose (0 when `auto_predict_f0`).
    pub transpose: i32,
    pub auto_predict_f0: bool,
    pub f0_method: F0Method,
    pub cluster_infer_ratio: f32,
    pub noise_scale: f32,
    pub device: ComputeDevice,
}

impl InferenceSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            transpose: config.effective_transpose(),
            auto_predict_f0: config.auto_predict_f0,
            f0_method: config.f0_method,
            cluster_infer_ratio: config.cluster_infer_ratio,
            noise_scale: config.noise_scale,
            device: config.device,
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

pub struct InferenceAdapter {
    model: ModelHandle,
    cluster: Option<Arc<dyn ClusterModel>>,
    speaker: Speaker,
    sample_rate: u32,
    hop_length: usize,
    noise_channels: usize,
    seed: u64,
    rng: StdRng,
}

impl InferenceAdapter {
    pub fn new(loaded: &LoadedModel, speaker: Speaker, seed: u64) -> Self {
        let (sample_rate, hop_length, noise_channels) = {
            let model = loaded.model.0.lock();
            (model.sample_rate(), model.hop_length(), model.noise_channels())
        };
        Self {
            model: loaded.model.clone(),
            cluster: loaded.cluster.clone(),
            speaker,
            sample_rate,
            hop_length: hop_length.max(1),
            noise_channels,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn speaker(&self) -> &Speaker {
        &self.speaker
    }

    /// Restart the noise sequence from the session seed.
    pub fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    /// Clear model state and restart the noise sequence.
    pub fn reset(&mut self) {
        self.model.0.lock().reset();
        self.reseed();
    }

    /// Convert one window. Returns exactly the overlap + core region.
    pub fn infer(
        &mut self,
        window: InferenceWindow,
        settings: &InferenceSettings,
    ) -> Result<AudioChunk> {
        if window.sample_rate() != self.sample_rate {
            return Err(SvcError::Inference(format!(
                "window sample rate {} does not match model rate {}",
                window.sample_rate(),
                self.sample_rate
            )));
        }

        let converted = self.run(window.samples(), settings)?;

        let emit = window.emit_range();
        let end = emit.end.min(converted.len());
        let start = emit.start.min(end);
        let mut region = converted[start..end].to_vec();
        region.resize(window.emit_len(), 0.0);

        let core = window.core();
        trace!(
            seq = core.seq(),
            window = window.samples().len(),
            emitted = region.len(),
            "window converted"
        );
        Ok(AudioChunk::sequenced(
            region,
            self.sample_rate,
            core.seq(),
            core.position().saturating_sub(window.overlap() as u64),
        ))
    }

    /// Convert a whole clip at the model rate; output has the input's length.
    pub fn convert(&mut self, audio: &[f32], settings: &InferenceSettings) -> Result<Vec<f32>> {
        let mut out = self.run(audio, settings)?;
        out.resize(audio.len(), 0.0);
        Ok(out)
    }

    fn run(&mut self, audio: &[f32], settings: &InferenceSettings) -> Result<Vec<f32>> {
        let handle = Arc::clone(&self.model.0);
        let mut model = handle.lock();

        let mut content = model.encode_content(audio, self.sample_rate)?;
        let frames = content.frames();

        let raw_f0 =
            model.estimate_f0(audio, self.sample_rate, self.hop_length, settings.f0_method)?;
        let (mut f0, voiced) = f0::interpolate_unvoiced(&f0::resize_f0(&raw_f0, frames));
        if !settings.auto_predict_f0 {
            f0::apply_transpose(&mut f0, settings.transpose);
        }

        if settings.cluster_infer_ratio > 0.0 {
            if let Some(cluster) = &self.cluster {
                let blended = blend_content(
                    &mut content,
                    cluster.as_ref(),
                    &self.speaker.name,
                    settings.cluster_infer_ratio,
                );
                trace!(blended, frames, "cluster blend applied");
            }
        }

        let noise = self.noise(frames * self.noise_channels, settings.noise_scale);

        debug!(
            frames,
            speaker = %self.speaker.name,
            device = %settings.device,
            transpose = settings.transpose,
            auto_predict_f0 = settings.auto_predict_f0,
            "synthesizing"
        );
        model.synthesize(&SynthesisRequest {
            content: &content,
            f0: &f0,
            voiced: &voiced,
            speaker_id: self.speaker.id,
            noise: &noise,
            predict_f0: settings.auto_predict_f0,
        })
    }

    fn noise(&mut self, len: usize, scale: f32) -> Vec<f32> {
        if scale == 0.0 {
            return vec![0.0; len];
        }
        (0..len)
            .map(|_| standard_normal(&mut self.rng) * scale)
            .collect()
    }
}

/// Box–Muller transform.
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
