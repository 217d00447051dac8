//! Voice model abstraction.
//!
//! The neural pieces (content encoder, F0 estimator, synthesizer) are opaque
//! collaborators behind `VoiceModel`. `ModelLoader` turns checkpoint paths into
//! a `ModelHandle` plus the speaker table; `ClusterModel` supplies k-means
//! centroids for content blending.
//!
//! `&mut self` on the model methods expresses that backends may keep state
//! (caches, device buffers). All mutation is serialised through
//! `ModelHandle`'s `parking_lot::Mutex`.

pub mod adapter;
pub mod cluster;
pub mod f0;
pub mod speakers;
pub mod stub;

pub use adapter::{InferenceAdapter, InferenceSettings};
pub use cluster::{ClusterModel, KMeansCluster};
pub use speakers::{ModelConfigFile, Speaker, SpeakerTable};
pub use stub::{StubLoader, StubModel};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ComputeDevice, F0Method, SessionConfig};
use crate::error::Result;

/// Per-frame content features (row-major `frames × dim`).
#[derive(Debug, Clone, PartialEq)]
pub struct ContentFeatures {
    frames: usize,
    dim: usize,
    data: Vec<f32>,
}

impl ContentFeatures {
    pub fn new(frames: usize, dim: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), frames * dim);
        Self { frames, dim, data }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn frame(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn frame_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Everything the synthesizer is conditioned on for one window.
#[derive(Debug)]
pub struct SynthesisRequest<'a> {
    pub content: &'a ContentFeatures,
    /// Frame-level F0 in Hz, already transposed (0 = unvoiced).
    pub f0: &'a [f32],
    /// Voiced/unvoiced flags per frame.
    pub voiced: &'a [bool],
    pub speaker_id: usize,
    /// `frames × noise_channels` standard-normal noise, pre-scaled by `noise_scale`.
    pub noise: &'a [f32],
    /// Let the model predict F0 from content instead of using `f0`.
    pub predict_f0: bool,
}

/// Contract for voice conversion backends.
pub trait VoiceModel: Send + 'static {
    /// One-time warm-up (weights on device, dummy pass). Called at session start.
    fn warm_up(&mut self) -> Result<()>;

    /// Rate the model consumes and produces (Hz).
    fn sample_rate(&self) -> u32;

    /// Samples per feature frame.
    fn hop_length(&self) -> usize;

    /// Width of the synthesizer's noise input per frame.
    fn noise_channels(&self) -> usize {
        192
    }

    /// Content encoder (HuBERT-style). `audio` is at `sample_rate`.
    fn encode_content(&mut self, audio: &[f32], sample_rate: u32) -> Result<ContentFeatures>;

    /// F0 estimator. Returns one value per hop (Hz, 0 = unvoiced).
    fn estimate_f0(
        &mut self,
        audio: &[f32],
        sample_rate: u32,
        hop_length: usize,
        method: F0Method,
    ) -> Result<Vec<f32>>;

    /// Synthesizer + vocoder. Output is aligned sample-for-sample with the
    /// audio the content was extracted from.
    fn synthesize(&mut self, request: &SynthesisRequest<'_>) -> Result<Vec<f32>>;

    /// Drop any per-session state.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `VoiceModel` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn VoiceModel>>);

impl ModelHandle {
    /// Wrap any `VoiceModel` in a `ModelHandle`.
    pub fn new<M: VoiceModel>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }

    /// Warm the model up and return its sample rate.
    pub fn warm_up(&self) -> Result<u32> {
        let mut model = self.0.lock();
        model.warm_up()?;
        Ok(model.sample_rate())
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

/// Paths and placement for one model load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    pub cluster_model_path: Option<PathBuf>,
    pub device: ComputeDevice,
}

impl LoadRequest {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            config_path: config.config_path.clone(),
            cluster_model_path: config.cluster_model_path.clone(),
            device: config.device,
        }
    }

    pub fn cluster_path(&self) -> Option<&Path> {
        self.cluster_model_path.as_deref()
    }
}

/// A loaded model with its speaker table and optional cluster model.
#[derive(Clone)]
pub struct LoadedModel {
    pub model: ModelHandle,
    pub speakers: SpeakerTable,
    pub cluster: Option<Arc<dyn ClusterModel>>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("speakers", &self.speakers)
            .field("cluster", &self.cluster.is_some())
            .finish_non_exhaustive()
    }
}

/// Checkpoint loader: paths + device → model handle and speaker table.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, request: &LoadRequest) -> Result<LoadedModel>;
}
