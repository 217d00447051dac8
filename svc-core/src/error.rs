use thiserror::Error;

/// All errors produced by svc-core.
#[derive(Debug, Error)]
pub enum SvcError {
    /// Invalid or missing configuration. Raised before a session starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("inference error: {0}")]
    Inference(String),

    #[error("session is not running")]
    NotRunning,

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SvcError {
    /// Shorthand used by validation code.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors raised by the audio device layer.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::AudioDevice(_)
                | Self::AudioStream(_)
                | Self::NoDefaultInputDevice
                | Self::NoDefaultOutputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, SvcError>;
