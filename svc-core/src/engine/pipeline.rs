//! Blocking session loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain the input ring, resample to the model rate, push into the slicer
//! 2. Drop stale backlog (newest ready chunk supersedes older ones)
//! 3. Take the next InferenceWindow (or sleep when nothing is ready)
//! 4. Infer + crossfade, or pass the core through untouched
//! 5. Resample to the output rate and push into the output ring
//! 6. Broadcast a ChunkEvent
//! ```
//!
//! Converted audio reaches the output ring one block at a time while the
//! playback callback pulls a device period at a time. The first block is
//! preceded by `output_buffer_seconds` of silence so the ring never runs dry
//! between bursts.
//!
//! Cancellation is checked between chunks. On a clean stop the output ring
//! is drained for at most one block period plus the cushion so queued audio
//! still plays.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    audio::resample::{RateConverter, STREAM_CHUNK},
    buffering::{chunk::InferenceWindow, AudioConsumer, AudioProducer, Consumer, Observer, Producer},
    config::{seconds_to_samples, SessionConfig, WindowLayout},
    engine::cancel::CancelToken,
    error::Result,
    events::ChunkEvent,
    inference::{InferenceAdapter, InferenceSettings},
    mixer::{CrossfadeBuffer, CrossfadeMixer},
    slicer::{
        energy::{rms, SilenceThreshold},
        ChunkSlicer,
    },
};

pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_resampled: AtomicUsize,
    pub chunks_sliced: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub inference_calls: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub chunks_emitted: AtomicUsize,
    pub budget_overruns: AtomicUsize,
    pub output_overflows: AtomicUsize,
    /// Shared with the playback callback.
    pub underruns: Arc<AtomicUsize>,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            frames_in: AtomicUsize::new(0),
            frames_resampled: AtomicUsize::new(0),
            chunks_sliced: AtomicUsize::new(0),
            chunks_dropped: AtomicUsize::new(0),
            inference_calls: AtomicUsize::new(0),
            inference_errors: AtomicUsize::new(0),
            chunks_emitted: AtomicUsize::new(0),
            budget_overruns: AtomicUsize::new(0),
            output_overflows: AtomicUsize::new(0),
            underruns: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_resampled.store(0, Ordering::Relaxed);
        self.chunks_sliced.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.inference_calls.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.chunks_emitted.store(0, Ordering::Relaxed);
        self.budget_overruns.store(0, Ordering::Relaxed);
        self.output_overflows.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_resampled: self.frames_resampled.load(Ordering::Relaxed),
            chunks_sliced: self.chunks_sliced.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
            output_overflows: self.output_overflows.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_resampled: usize,
    pub chunks_sliced: usize,
    pub chunks_dropped: usize,
    pub inference_calls: usize,
    pub inference_errors: usize,
    pub chunks_emitted: usize,
    pub budget_overruns: usize,
    pub output_overflows: usize,
    pub underruns: usize,
}

/// All context the loop needs, passed as one struct so the worker closure
/// stays tidy.
pub struct PipelineContext {
    pub session_id: u64,
    pub config: SessionConfig,
    pub layout: WindowLayout,
    pub adapter: InferenceAdapter,
    /// Consumer side of the input ring (filled by the capture callback).
    pub input: AudioConsumer,
    /// Producer side of the output ring (drained by the playback callback).
    pub output: AudioProducer,
    pub input_rate: u32,
    pub output_rate: u32,
    pub cancel: CancelToken,
    pub chunk_tx: broadcast::Sender<ChunkEvent>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Samples popped from the input ring per read.
const DRAIN_CHUNK: usize = 4_096;

/// Sleep when nothing is ready (avoids busy-wait burning a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("SVC_PIPELINE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

/// Per-session processing state that is not part of the context.
struct Stage {
    mixer: CrossfadeMixer,
    buffer: CrossfadeBuffer,
    outbound: RateConverter,
    settings: InferenceSettings,
    budget: Duration,
    /// Silence still to be queued ahead of the first block.
    cushion: usize,
    dropped_since_emit: u64,
}

/// Run the loop until `ctx.cancel` fires or inference fails.
///
/// # Errors
/// The first inference error, or a resampler setup error. The loop does not
/// retry.
pub fn run(mut ctx: PipelineContext) -> Result<()> {
    let model_rate = ctx.adapter.sample_rate();
    let span = info_span!(
        "session",
        id = ctx.session_id,
        model_rate,
        input_rate = ctx.input_rate,
        output_rate = ctx.output_rate,
        passthrough = ctx.config.passthrough_original,
    );
    let _enter = span.enter();

    let mut inbound = RateConverter::new(ctx.input_rate, model_rate, STREAM_CHUNK)?;
    let outbound = RateConverter::new(model_rate, ctx.output_rate, STREAM_CHUNK)?;

    // Realtime slicing always uses an absolute threshold.
    let mut slicer = ChunkSlicer::new(
        ctx.layout,
        ctx.config.realtime_algorithm,
        SilenceThreshold::absolute(ctx.config.silence_threshold),
        model_rate,
    );
    let budget = chunk_budget(&ctx.layout, model_rate);
    let block_period = Duration::from_secs_f64(ctx.layout.block as f64 / model_rate as f64);
    let cushion_period = Duration::from_secs_f32(ctx.config.output_buffer_seconds.max(0.0));
    let mut stage = Stage {
        mixer: CrossfadeMixer::new(ctx.layout.crossfade, ctx.config.fade_curve),
        buffer: CrossfadeBuffer::new(),
        outbound,
        settings: InferenceSettings::from_config(&ctx.config),
        budget,
        cushion: seconds_to_samples(ctx.config.output_buffer_seconds, ctx.output_rate),
        dropped_since_emit: 0,
    };
    ctx.adapter.reseed();

    info!(
        block = ctx.layout.block,
        crossfade = ctx.layout.crossfade,
        before = ctx.layout.before,
        after = ctx.layout.after,
        algorithm = %ctx.config.realtime_algorithm,
        budget_ms = budget.as_secs_f32() * 1000.0,
        cushion = stage.cushion,
        "pipeline started"
    );

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let result = loop {
        if ctx.cancel.is_cancelled() {
            break Ok(());
        }

        let received = drain_input(&mut ctx, &mut raw, &mut inbound, &mut slicer);

        let dropped = slicer.drop_stale();
        if dropped > 0 {
            ctx.diagnostics
                .chunks_dropped
                .fetch_add(dropped as usize, Ordering::Relaxed);
            stage.dropped_since_emit += dropped;
            warn!(
                dropped,
                pending = slicer.pending_samples(),
                "inference behind real time: dropping stale chunks"
            );
        }

        let Some(window) = slicer.next_chunk() else {
            if received == 0 {
                thread::sleep(Duration::from_millis(empty_sleep_ms()));
            }
            continue;
        };

        if let Err(e) = process_window(&mut ctx, &mut stage, window) {
            break Err(e);
        }
    };

    if result.is_ok() {
        drain_output(&ctx, block_period + cushion_period);
    }
    ctx.adapter.reset();

    let snap = ctx.diagnostics.snapshot();
    info!(
        chunks_sliced = snap.chunks_sliced,
        chunks_emitted = snap.chunks_emitted,
        chunks_dropped = snap.chunks_dropped,
        inference_errors = snap.inference_errors,
        budget_overruns = snap.budget_overruns,
        underruns = snap.underruns,
        "pipeline finished"
    );
    result
}

/// Real-time budget for one chunk: block plus both paddings. The crossfade
/// overlap belongs to the previous block.
fn chunk_budget(layout: &WindowLayout, model_rate: u32) -> Duration {
    let samples = layout.block + layout.before + layout.after;
    Duration::from_secs_f64(samples as f64 / model_rate.max(1) as f64)
}

/// Move everything captured so far into the slicer. Returns raw samples read.
fn drain_input(
    ctx: &mut PipelineContext,
    raw: &mut [f32],
    inbound: &mut RateConverter,
    slicer: &mut ChunkSlicer,
) -> usize {
    let mut total = 0;
    loop {
        let n = ctx.input.pop_slice(raw);
        if n == 0 {
            break;
        }
        total += n;
        let resampled = inbound.process(&raw[..n]);
        ctx.diagnostics
            .frames_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);
        slicer.push(&resampled);
    }
    ctx.diagnostics.frames_in.fetch_add(total, Ordering::Relaxed);
    total
}

fn process_window(
    ctx: &mut PipelineContext,
    stage: &mut Stage,
    window: InferenceWindow,
) -> Result<()> {
    let started = Instant::now();
    let seq = window.seq();
    let input_rms = rms(window.core().samples());
    let passthrough = ctx.config.passthrough_original;
    ctx.diagnostics.chunks_sliced.fetch_add(1, Ordering::Relaxed);

    let block = if passthrough {
        window.into_core()
    } else {
        ctx.diagnostics
            .inference_calls
            .fetch_add(1, Ordering::Relaxed);
        let converted = match ctx.adapter.infer(window, &stage.settings) {
            Ok(chunk) => chunk,
            Err(e) => {
                ctx.diagnostics
                    .inference_errors
                    .fetch_add(1, Ordering::Relaxed);
                error!(seq, "inference failed: {e}");
                return Err(e);
            }
        };
        let (out, next) = stage
            .mixer
            .mix(converted, std::mem::take(&mut stage.buffer));
        stage.buffer = next;
        out
    };

    let latency = started.elapsed();
    let latency_ms = latency.as_secs_f32() * 1000.0;
    let budget_ms = stage.budget.as_secs_f32() * 1000.0;
    if latency > stage.budget {
        ctx.diagnostics
            .budget_overruns
            .fetch_add(1, Ordering::Relaxed);
        warn!(seq, latency_ms, budget_ms, "chunk exceeded real-time budget");
    }

    let output_rms = rms(block.samples());
    if stage.cushion > 0 {
        let queued = ctx
            .output
            .push_iter(std::iter::repeat(0.0).take(stage.cushion));
        debug!(samples = queued, "output cushion queued");
        stage.cushion = 0;
    }
    let resampled = stage.outbound.process(block.samples());
    let written = ctx.output.push_slice(&resampled);
    if written < resampled.len() {
        ctx.diagnostics
            .output_overflows
            .fetch_add(1, Ordering::Relaxed);
        warn!("output ring full: dropped {} samples", resampled.len() - written);
    }
    ctx.diagnostics
        .chunks_emitted
        .fetch_add(1, Ordering::Relaxed);

    let dropped = std::mem::take(&mut stage.dropped_since_emit);
    debug!(seq, latency_ms, samples = written, dropped, "chunk emitted");
    let _ = ctx.chunk_tx.send(ChunkEvent {
        seq,
        latency_ms,
        budget_ms,
        input_rms,
        output_rms,
        dropped,
        passthrough,
    });
    Ok(())
}

/// Wait (bounded) for the playback callback to consume queued output.
fn drain_output(ctx: &PipelineContext, limit: Duration) {
    let deadline = Instant::now() + limit;
    while ctx.output.occupied_len() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(empty_sleep_ms()));
    }
    let left = ctx.output.occupied_len();
    if left > 0 {
        debug!(left, "output not fully drained before release");
    }
}
