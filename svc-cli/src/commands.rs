//! Subcommand handlers.
//!
//! Each handler returns `anyhow::Result`; errors from `svc-core` carry their
//! `SvcError` message through unchanged.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use svc_core::{
    inference::LoadRequest,
    offline::{read_wav_mono, write_wav},
    AudioBackend, ChunkEvent, CpalBackend, InferenceAdapter, ModelLoader, SessionConfig,
    SessionOutcome, StreamController, StubLoader, VirtualBackend,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::presets::{load_presets, save_presets, PresetFile};

/// How often the foreground loop polls the controller.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Print input and output devices of the default host.
pub fn list_devices(json: bool) -> Result<()> {
    let backend = CpalBackend;
    let inputs = backend.list_input_devices();
    let outputs = backend.list_output_devices();

    if json {
        let payload = serde_json::json!({ "input": inputs, "output": outputs });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for (label, devices) in [("Input", &inputs), ("Output", &outputs)] {
        println!("{label} devices:");
        if devices.is_empty() {
            println!("  (none)");
        }
        for d in devices.iter() {
            let marker = if d.is_default { "*" } else { " " };
            println!("  {marker}{:>3}  {}  [{}]", d.index, d.name, d.host_api);
        }
    }
    Ok(())
}

/// Optional in-memory devices for headless realtime runs.
pub struct VirtualIo {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

/// Run a realtime session until Enter is pressed, `duration` elapses, or the
/// session fails.
pub fn run_realtime(
    config: SessionConfig,
    duration: Option<Duration>,
    virtual_io: Option<VirtualIo>,
) -> Result<()> {
    let (backend, virtual_backend, duration) = match &virtual_io {
        Some(io) => {
            let (signal, rate) = read_wav_mono(&io.input)?;
            let length = Duration::from_secs_f64(signal.len() as f64 / rate as f64);
            info!(input = %io.input.display(), rate, "using virtual devices");
            // 10 ms periods keep the feed at real time.
            let period = (rate as usize / 100).max(1);
            let vb = VirtualBackend::new(rate, signal).paced(period, Duration::from_millis(10));
            let run_for = duration.unwrap_or(length + Duration::from_millis(500));
            (
                Arc::new(vb.clone()) as Arc<dyn AudioBackend>,
                Some((vb, rate)),
                Some(run_for),
            )
        }
        None => (Arc::new(CpalBackend) as Arc<dyn AudioBackend>, None, duration),
    };

    let controller = StreamController::new(Arc::new(StubLoader), backend);
    let mut chunks = controller.subscribe_chunks();

    let session = controller.start(config)?;
    info!(session, "realtime session started; press Enter to stop");

    let (enter_tx, enter_rx) = crossbeam_channel::bounded::<()>(1);
    if virtual_io.is_none() {
        thread::Builder::new()
            .name("svc-stdin".into())
            .spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
                let _ = enter_tx.send(());
            })?;
    }

    let started = Instant::now();
    let failure = loop {
        drain_chunk_events(&mut chunks);

        if let Some(outcome) = controller.poll_outcome() {
            break match outcome {
                SessionOutcome::Failed { error, .. } => Some(error),
                SessionOutcome::Stopped { .. } => None,
            };
        }
        let timed_out = duration.is_some_and(|d| started.elapsed() >= d);
        if timed_out || enter_rx.try_recv().is_ok() {
            // The worker may have exited between the poll and the stop.
            if let Err(e) = controller.stop() {
                debug!("stop: {e}");
            }
            controller.wait();
            break match controller.poll_outcome() {
                Some(SessionOutcome::Failed { error, .. }) => Some(error),
                _ => None,
            };
        }
        thread::sleep(POLL_INTERVAL);
    };
    controller.wait();
    drain_chunk_events(&mut chunks);

    let snap = controller.diagnostics_snapshot();
    info!(
        chunks_sliced = snap.chunks_sliced,
        chunks_emitted = snap.chunks_emitted,
        chunks_dropped = snap.chunks_dropped,
        budget_overruns = snap.budget_overruns,
        underruns = snap.underruns,
        "session diagnostics"
    );

    if let (Some((vb, rate)), Some(path)) = (
        virtual_backend,
        virtual_io.as_ref().and_then(|io| io.output.as_deref()),
    ) {
        write_wav(path, &vb.recorded(), rate)?;
        info!(output = %path.display(), "virtual output written");
    }

    match failure {
        Some(error) => Err(anyhow!(error).context("realtime session failed")),
        None => Ok(()),
    }
}

fn drain_chunk_events(rx: &mut broadcast::Receiver<ChunkEvent>) {
    loop {
        match rx.try_recv() {
            Ok(ev) => {
                if ev.over_budget() {
                    warn!(
                        seq = ev.seq,
                        latency_ms = ev.latency_ms,
                        budget_ms = ev.budget_ms,
                        "chunk over real-time budget"
                    );
                } else {
                    debug!(
                        seq = ev.seq,
                        latency_ms = ev.latency_ms,
                        input_rms = ev.input_rms,
                        output_rms = ev.output_rms,
                        dropped = ev.dropped,
                        "chunk"
                    );
                }
            }
            Err(TryRecvError::Lagged(n)) => debug!(skipped = n, "chunk events lagged"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
        }
    }
}

/// Convert a WAV file offline.
pub fn convert(config: SessionConfig, input: &Path, output: &Path) -> Result<()> {
    config.validate()?;
    let loaded = StubLoader.load(&LoadRequest::from_config(&config))?;
    let speaker = loaded.speakers.resolve(config.speaker.as_deref())?;
    loaded.model.warm_up()?;

    let mut adapter = InferenceAdapter::new(&loaded, speaker, config.noise_seed);
    let started = Instant::now();
    let report = svc_core::convert_file(input, output, &mut adapter, &config)?;
    info!(
        output = %output.display(),
        sample_rate = report.sample_rate,
        seconds = report.samples as f64 / report.sample_rate as f64,
        speech_segments = report.speech_segments,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "conversion finished"
    );
    Ok(())
}

pub fn preset_list(path: &Path) -> Result<()> {
    let presets = load_presets(path)?;
    for name in presets.names() {
        println!("{name}");
    }
    Ok(())
}

/// Store `config` under `name`, overwriting any preset of the same name.
pub fn preset_add(path: &Path, name: &str, config: SessionConfig) -> Result<()> {
    config
        .validate_ranges()
        .with_context(|| format!("preset '{name}' is not valid"))?;
    let mut presets = load_presets(path)?;
    presets.add(name, config)?;
    save_presets(path, &presets)?;
    info!(name, path = %path.display(), "preset saved");
    Ok(())
}

pub fn preset_delete(path: &Path, name: &str) -> Result<()> {
    let mut presets = load_presets(path)?;
    presets.delete(name)?;
    save_presets(path, &presets)?;
    info!(name, "preset deleted");
    Ok(())
}

/// Print the effective configuration a preset resolves to.
pub fn preset_apply(config: &SessionConfig) -> Result<()> {
    config.validate_ranges()?;
    println!("{}", serde_json::to_string_pretty(&config.normalized())?);
    Ok(())
}

/// Base configuration for a command: an explicit JSON file wins over a
/// named preset.
pub fn base_config(presets_path: &Path, preset: &str, file: Option<&Path>) -> Result<SessionConfig> {
    if let Some(file) = file {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("malformed session config {}", file.display()));
    }
    let presets: PresetFile = load_presets(presets_path)?;
    match presets.get(preset) {
        Some(config) => Ok(config.clone()),
        None => bail!("no preset named '{preset}'"),
    }
}
