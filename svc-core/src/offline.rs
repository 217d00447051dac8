//! Whole-file conversion.
//!
//! ```text
//! WAV ─► mono ─► resample to model rate ─► split speech / silence
//!     ─► per speech region: pad · infer · trim   (silence → zeros)
//!     ─► 32-bit float WAV at the model rate
//! ```
//!
//! The output has exactly the length of the resampled input.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info};

use crate::{
    audio::resample::resample_clip,
    config::{seconds_to_samples, SessionConfig},
    error::Result,
    inference::{InferenceAdapter, InferenceSettings},
    slicer::{energy::SilenceThreshold, silence::split_silence},
};

/// Summary of one offline conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineReport {
    pub sample_rate: u32,
    pub samples: usize,
    pub segments: usize,
    pub speech_segments: usize,
}

/// Read any PCM or float WAV and mix it down to mono f32.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32).max(1.0);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Write mono samples as a 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Convert `samples` (already at the model rate) region by region.
pub fn convert_samples(
    samples: &[f32],
    adapter: &mut InferenceAdapter,
    config: &SessionConfig,
) -> Result<(Vec<f32>, OfflineReport)> {
    let sample_rate = adapter.sample_rate();
    let settings = InferenceSettings::from_config(config);
    let threshold = SilenceThreshold::from_config(config);
    let max_len = seconds_to_samples(config.chunk_seconds, sample_rate);
    let pad = seconds_to_samples(config.pad_seconds, sample_rate);

    let segments = split_silence(samples, sample_rate, threshold, max_len);
    let mut out = Vec::with_capacity(samples.len());
    let mut speech_segments = 0;

    for segment in &segments {
        if !segment.is_speech {
            out.resize(out.len() + segment.len(), 0.0);
            continue;
        }
        speech_segments += 1;
        let mut padded = vec![0.0; pad];
        padded.extend_from_slice(&samples[segment.range.clone()]);
        padded.resize(padded.len() + pad, 0.0);

        let converted = adapter.convert(&padded, &settings)?;
        out.extend_from_slice(&converted[pad..pad + segment.len()]);
        debug!(
            start = segment.range.start,
            len = segment.len(),
            "speech region converted"
        );
    }

    let report = OfflineReport {
        sample_rate,
        samples: out.len(),
        segments: segments.len(),
        speech_segments,
    };
    Ok((out, report))
}

/// Convert `input` into `output` with `adapter`.
///
/// # Errors
/// WAV read/write errors and inference errors. No partial file is left
/// behind on inference failure: the output is only created after all regions
/// have been converted.
pub fn convert_file(
    input: &Path,
    output: &Path,
    adapter: &mut InferenceAdapter,
    config: &SessionConfig,
) -> Result<OfflineReport> {
    let (samples, source_rate) = read_wav_mono(input)?;
    let model_rate = adapter.sample_rate();
    let samples = resample_clip(&samples, source_rate, model_rate)?;
    info!(
        input = %input.display(),
        source_rate,
        model_rate,
        samples = samples.len(),
        "offline conversion started"
    );

    adapter.reseed();
    let (converted, report) = convert_samples(&samples, adapter, config)?;
    write_wav(output, &converted, model_rate)?;

    info!(
        output = %output.display(),
        segments = report.segments,
        speech_segments = report.speech_segments,
        "offline conversion finished"
    );
    Ok(report)
}
