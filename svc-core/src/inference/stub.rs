//! `StubModel`: signal-level placeholder backend.
//!
//! Content features are the raw waveform cut into hop-sized frames, F0 is a
//! zero-crossing estimate, and synthesis flattens the frames back into audio
//! plus a small amount of the supplied noise. With `noise_scale = 0` the
//! output is the input, which makes the whole pipeline testable end-to-end
//! without checkpoint weights.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::F0Method;
use crate::error::{Result, SvcError};
use crate::inference::cluster::{ClusterModel, KMeansCluster};
use crate::inference::f0::{F0_MAX, F0_MIN};
use crate::inference::{
    ContentFeatures, LoadRequest, LoadedModel, ModelConfigFile, ModelHandle, ModelLoader,
    SynthesisRequest, VoiceModel,
};
use crate::slicer::energy::rms;

/// Frames quieter than this RMS are reported unvoiced.
const UNVOICED_RMS: f32 = 1e-3;

/// Gain applied to the synthesis noise input.
const NOISE_GAIN: f32 = 0.01;

pub struct StubModel {
    sample_rate: u32,
    hop_length: usize,
    windows: u64,
}

impl StubModel {
    pub fn new(sample_rate: u32, hop_length: usize) -> Self {
        Self {
            sample_rate,
            hop_length: hop_length.max(1),
            windows: 0,
        }
    }
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new(44_100, 512)
    }
}

impl VoiceModel for StubModel {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubModel::warm_up: no-op");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn hop_length(&self) -> usize {
        self.hop_length
    }

    fn encode_content(&mut self, audio: &[f32], _sample_rate: u32) -> Result<ContentFeatures> {
        let hop = self.hop_length;
        let frames = audio.len().div_ceil(hop);
        let mut data = audio.to_vec();
        data.resize(frames * hop, 0.0);
        Ok(ContentFeatures::new(frames, hop, data))
    }

    fn estimate_f0(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        hop_length: usize,
        _method: F0Method,
    ) -> Result<Vec<f32>> {
        let hop = hop_length.max(1);
        Ok(audio
            .chunks(hop)
            .map(|frame| {
                if rms(frame) < UNVOICED_RMS {
                    return 0.0;
                }
                let crossings = frame
                    .windows(2)
                    .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
                    .count();
                let hz = crossings as f32 * sample_rate as f32 / (2.0 * frame.len() as f32);
                if (F0_MIN..=F0_MAX).contains(&hz) {
                    hz
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<Vec<f32>> {
        let content = request.content;
        if content.dim() != self.hop_length {
            return Err(SvcError::Inference(format!(
                "content dim {} does not match hop length {}",
                content.dim(),
                self.hop_length
            )));
        }
        if request.f0.len() != content.frames() {
            return Err(SvcError::Inference(format!(
                "f0 has {} frames, content has {}",
                request.f0.len(),
                content.frames()
            )));
        }

        self.windows += 1;
        let mut out = content.as_slice().to_vec();
        let channels = self.noise_channels();
        if request.noise.len() == content.frames() * channels {
            for (i, frame) in out.chunks_mut(self.hop_length).enumerate() {
                let noise = &request.noise[i * channels..(i + 1) * channels];
                for (j, s) in frame.iter_mut().enumerate() {
                    *s += noise[j % channels] * NOISE_GAIN;
                }
            }
        }
        Ok(out)
    }

    fn reset(&mut self) {
        debug!(windows = self.windows, "StubModel::reset");
        self.windows = 0;
    }
}

/// Loader for [`StubModel`]. Reads the speaker table and audio geometry from
/// `config.json`; the checkpoint must exist but its weights are not executed.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubLoader;

impl ModelLoader for StubLoader {
    fn load(&self, request: &LoadRequest) -> Result<LoadedModel> {
        if !request.model_path.is_file() {
            return Err(SvcError::ModelNotFound {
                path: request.model_path.clone(),
            });
        }
        let config = ModelConfigFile::load(&request.config_path)?;
        let speakers = config.speaker_table();

        let cluster = request
            .cluster_path()
            .map(KMeansCluster::load)
            .transpose()?
            .map(|c| Arc::new(c) as Arc<dyn ClusterModel>);

        warn!(
            model = %request.model_path.display(),
            "stub backend: checkpoint weights are not executed"
        );
        info!(
            sample_rate = config.data.sampling_rate,
            hop_length = config.data.hop_length,
            speakers = speakers.len(),
            device = %request.device,
            "model loaded"
        );

        Ok(LoadedModel {
            model: ModelHandle::new(StubModel::new(
                config.data.sampling_rate,
                config.data.hop_length,
            )),
            speakers,
            cluster,
        })
    }
}
