//! Duplex audio I/O.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must
//! not** block on a mutex, perform I/O, or allocate after the first callback.
//! Capture writes into the input SPSC ring producer and playback reads from
//! the output ring consumer; both `push_slice`/`pop_slice` are lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`AudioBackend::open`] is therefore called on the session worker
//! thread, and the returned [`ActiveStreams`] is dropped on that same thread.

pub mod device;
pub mod resample;
pub mod virtual_device;

pub use device::{DeviceDirection, DeviceInfo};
pub use virtual_device::{DeviceEvent, VirtualBackend};

use std::sync::{
    atomic::{AtomicBool, AtomicUsize},
    Arc,
};

use crate::buffering::{AudioConsumer, AudioProducer};
use crate::error::Result;

/// Everything a backend needs to wire one session's devices.
pub struct DeviceIo {
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
    /// Capture side of the input ring (device → pipeline).
    pub capture: AudioProducer,
    /// Playback side of the output ring (pipeline → device).
    pub playback: AudioConsumer,
    /// Callbacks no-op once this goes `false`.
    pub active: Arc<AtomicBool>,
    /// Incremented each time playback finds the output ring short.
    pub underruns: Arc<AtomicUsize>,
}

/// Open device streams. Dropping the value releases the devices.
pub trait ActiveStreams {
    fn input_sample_rate(&self) -> u32;
    fn output_sample_rate(&self) -> u32;
}

/// Device seam of the streaming controller.
pub trait AudioBackend: Send + Sync + 'static {
    fn list_input_devices(&self) -> Vec<DeviceInfo>;
    fn list_output_devices(&self) -> Vec<DeviceInfo>;

    /// Open input and output streams and start them.
    ///
    /// # Errors
    /// `SvcError::NoDefaultInputDevice` / `NoDefaultOutputDevice` when no
    /// device is selected and the host has no default, `SvcError::AudioStream`
    /// if the stream cannot be built.
    fn open(&self, io: DeviceIo) -> Result<Box<dyn ActiveStreams>>;
}

/// The system audio host via cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

#[cfg(feature = "audio-cpal")]
mod cpal_io {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{ActiveStreams, DeviceIo};
    use crate::audio::device::{resolve, DeviceDirection};
    use crate::buffering::{AudioConsumer, AudioProducer, Playout, Producer};
    use crate::error::{Result, SvcError};

    pub(super) struct CpalStreams {
        _input: Stream,
        _output: Stream,
        input_rate: u32,
        output_rate: u32,
    }

    impl ActiveStreams for CpalStreams {
        fn input_sample_rate(&self) -> u32 {
            self.input_rate
        }

        fn output_sample_rate(&self) -> u32 {
            self.output_rate
        }
    }

    pub(super) fn open(io: DeviceIo) -> Result<CpalStreams> {
        let DeviceIo {
            input_device,
            output_device,
            capture,
            playback,
            active,
            underruns,
        } = io;

        let (input, input_rate) = open_capture(input_device, capture, Arc::clone(&active))?;
        let (output, output_rate) = open_playback(output_device, playback, active, underruns)?;

        input.play().map_err(|e| SvcError::AudioStream(e.to_string()))?;
        output
            .play()
            .map_err(|e| SvcError::AudioStream(e.to_string()))?;

        Ok(CpalStreams {
            _input: input,
            _output: output,
            input_rate,
            output_rate,
        })
    }

    fn open_capture(
        index: Option<usize>,
        producer: AudioProducer,
        active: Arc<AtomicBool>,
    ) -> Result<(Stream, u32)> {
        let device = resolve(DeviceDirection::Input, index)?;
        let supported = device
            .default_input_config()
            .map_err(|e| SvcError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, channels, "opening input device"
        );

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_capture::<f32>(&device, &config, producer, active),
            SampleFormat::I16 => build_capture::<i16>(&device, &config, producer, active),
            SampleFormat::U16 => build_capture::<u16>(&device, &config, producer, active),
            SampleFormat::U8 => build_capture::<u8>(&device, &config, producer, active),
            fmt => {
                return Err(SvcError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }?;
        Ok((stream, sample_rate))
    }

    fn open_playback(
        index: Option<usize>,
        consumer: AudioConsumer,
        active: Arc<AtomicBool>,
        underruns: Arc<AtomicUsize>,
    ) -> Result<(Stream, u32)> {
        let device = resolve(DeviceDirection::Output, index)?;
        let supported = device
            .default_output_config()
            .map_err(|e| SvcError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, channels, "opening output device"
        );

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_playback::<f32>(&device, &config, consumer, active, underruns)
            }
            SampleFormat::I16 => {
                build_playback::<i16>(&device, &config, consumer, active, underruns)
            }
            SampleFormat::U16 => {
                build_playback::<u16>(&device, &config, consumer, active, underruns)
            }
            fmt => {
                return Err(SvcError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }?;
        Ok((stream, sample_rate))
    }

    /// Downmix interleaved frames to mono and push them into the input ring.
    fn build_capture<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: AudioProducer,
        active: Arc<AtomicBool>,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let ch = config.channels.max(1) as usize;
        let mut mono: Vec<f32> = Vec::new();
        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !active.load(Ordering::Relaxed) {
                        return;
                    }
                    mono.resize(data.len() / ch, 0.0);
                    for (out, frame) in mono.iter_mut().zip(data.chunks_exact(ch)) {
                        *out = frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / ch as f32;
                    }
                    let written = producer.push_slice(&mono);
                    if written < mono.len() {
                        warn!("input ring full: dropped {} frames", mono.len() - written);
                    }
                },
                |err| error!("input stream error: {err}"),
                None,
            )
            .map_err(|e| SvcError::AudioStream(e.to_string()))
    }

    /// Pull mono samples from the output ring and fan them out to every
    /// channel. Missing samples are played as silence.
    fn build_playback<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut consumer: AudioConsumer,
        active: Arc<AtomicBool>,
        underruns: Arc<AtomicUsize>,
    ) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let ch = config.channels.max(1) as usize;
        let mut mono: Vec<f32> = Vec::new();
        let mut playout = Playout::new(underruns);
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    mono.resize(data.len() / ch, 0.0);
                    if active.load(Ordering::Relaxed) {
                        playout.fill(&mut consumer, &mut mono);
                    } else {
                        mono.fill(0.0);
                    }
                    for (frame, &s) in data.chunks_exact_mut(ch).zip(mono.iter()) {
                        frame.fill(T::from_sample(s));
                    }
                },
                |err| error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| SvcError::AudioStream(e.to_string()))
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioBackend for CpalBackend {
    fn list_input_devices(&self) -> Vec<DeviceInfo> {
        device::list_input_devices()
    }

    fn list_output_devices(&self) -> Vec<DeviceInfo> {
        device::list_output_devices()
    }

    fn open(&self, io: DeviceIo) -> Result<Box<dyn ActiveStreams>> {
        Ok(Box::new(cpal_io::open(io)?))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioBackend for CpalBackend {
    fn list_input_devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn list_output_devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn open(&self, _io: DeviceIo) -> Result<Box<dyn ActiveStreams>> {
        Err(crate::error::SvcError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
