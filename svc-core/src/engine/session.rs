//! `StreamSession`: everything resolved for one realtime run.

use tracing::info;

use crate::{
    audio::{
        device::{check_index, DeviceDirection},
        AudioBackend,
    },
    config::{SessionConfig, WindowLayout},
    engine::cancel::CancelToken,
    error::Result,
    inference::{InferenceAdapter, LoadRequest, LoadedModel, ModelLoader, Speaker},
};

/// Created on start, torn down when the worker exits.
pub struct StreamSession {
    pub id: u64,
    pub config: SessionConfig,
    pub model: LoadedModel,
    pub speaker: Speaker,
    /// Window geometry at the model rate.
    pub layout: WindowLayout,
    pub cancel: CancelToken,
}

impl StreamSession {
    /// Validate `config`, check device indices, load and warm up the model
    /// and resolve the speaker.
    ///
    /// # Errors
    /// `SvcError::Configuration` for bad ranges, paths, device indices or an
    /// unknown speaker; loader and warm-up errors are passed through.
    pub fn prepare(
        id: u64,
        config: SessionConfig,
        loader: &dyn ModelLoader,
        backend: &dyn AudioBackend,
    ) -> Result<Self> {
        config.validate()?;
        check_index(
            &backend.list_input_devices(),
            config.input_device,
            DeviceDirection::Input,
        )?;
        check_index(
            &backend.list_output_devices(),
            config.output_device,
            DeviceDirection::Output,
        )?;

        let model = loader.load(&LoadRequest::from_config(&config))?;
        let speaker = model.speakers.resolve(config.speaker.as_deref())?;
        let sample_rate = model.model.warm_up()?;
        let layout = config.validate_layout(sample_rate)?;

        info!(
            session = id,
            speaker = %speaker.name,
            sample_rate,
            block = layout.block,
            device = %config.device,
            "session prepared"
        );

        Ok(Self {
            id,
            config,
            model,
            speaker,
            layout,
            cancel: CancelToken::new(),
        })
    }

    pub fn adapter(&self) -> InferenceAdapter {
        InferenceAdapter::new(&self.model, self.speaker.clone(), self.config.noise_seed)
    }
}
