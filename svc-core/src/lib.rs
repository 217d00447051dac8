//! # svc-core
//!
//! Realtime singing-voice conversion engine: chunked streaming inference
//! over a voice model with crossfaded stitching.
//!
//! ## Architecture
//!
//! ```text
//! Input device → SPSC RingBuffer → Pipeline thread
//!                                     │ resample to model rate
//!                                ChunkSlicer (block + context + crossfade)
//!                                     │
//!                          InferenceAdapter::infer (VoiceModel)
//!                                     │
//!                              CrossfadeMixer::mix
//!                                     │ resample to device rate
//!                  SPSC RingBuffer → Output device
//!                                     │
//!                         broadcast::Sender<ChunkEvent>
//! ```
//!
//! The audio callbacks never allocate. All heap work happens on the session
//! worker thread owned by [`StreamController`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod inference;
pub mod mixer;
pub mod offline;
pub mod slicer;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, CpalBackend, DeviceInfo, VirtualBackend};
pub use config::{ComputeDevice, F0Method, RealtimeAlgorithm, SessionConfig, WindowLayout};
pub use engine::{DiagnosticsSnapshot, SessionOutcome, StreamController};
pub use error::{Result, SvcError};
pub use events::{ChunkEvent, SessionStatus, SessionStatusEvent};
pub use inference::{
    InferenceAdapter, InferenceSettings, LoadRequest, LoadedModel, ModelHandle, ModelLoader,
    StubLoader, StubModel, VoiceModel,
};
pub use mixer::{CrossfadeMixer, FadeCurve};
pub use offline::{convert_file, OfflineReport};
pub use slicer::ChunkSlicer;
