use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use svc_core::audio::DeviceEvent;
use svc_core::inference::{
    ContentFeatures, LoadRequest, LoadedModel, ModelHandle, SpeakerTable, SynthesisRequest,
    VoiceModel,
};
use svc_core::{
    ChunkEvent, F0Method, ModelLoader, SessionConfig, SessionOutcome, SessionStatus,
    SessionStatusEvent, StreamController, StubLoader, SvcError, VirtualBackend,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const SR: u32 = 8_000;

/// Model checkpoint + config.json in a scratch directory.
struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("svc-it-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).expect("create fixture dir");
        fs::write(dir.join("G_0.pth"), b"not a real checkpoint").expect("write model");
        fs::write(
            dir.join("config.json"),
            format!(r#"{{"data":{{"sampling_rate":{SR},"hop_length":80}},"spk":{{"alice":0}}}}"#),
        )
        .expect("write config");
        Self { dir }
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            model_path: self.dir.join("G_0.pth"),
            config_path: self.dir.join("config.json"),
            block_seconds: 0.1,
            crossfade_seconds: 0.02,
            additional_infer_before_seconds: 0.05,
            additional_infer_after_seconds: 0.02,
            noise_scale: 0.0,
            output_buffer_seconds: 0.05,
            ..SessionConfig::default()
        }
    }
}

/// Silence queued ahead of the first block: 0.05 s at 8 kHz.
const CUSHION: usize = 400;

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn signal(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i as f32) * 0.071).sin() * 0.5).collect()
}

/// Real-time pacing: 80 samples every 10 ms at 8 kHz.
fn backend(signal: Vec<f32>) -> VirtualBackend {
    VirtualBackend::new(SR, signal).paced(80, Duration::from_millis(10))
}

fn controller(loader: impl ModelLoader, backend: &VirtualBackend) -> StreamController {
    StreamController::new(Arc::new(loader), Arc::new(backend.clone()))
}

fn wait_for_recorded(backend: &VirtualBackend, len: usize, timeout: Duration) {
    let start = Instant::now();
    while backend.recorded().len() < len {
        assert!(
            start.elapsed() < timeout,
            "timed out after {} recorded samples",
            backend.recorded().len()
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_outcome(controller: &StreamController, timeout: Duration) -> SessionOutcome {
    let start = Instant::now();
    loop {
        if let Some(outcome) = controller.poll_outcome() {
            return outcome;
        }
        assert!(start.elapsed() < timeout, "timed out waiting for outcome");
        thread::sleep(Duration::from_millis(5));
    }
}

fn collect_statuses(
    rx: &mut broadcast::Receiver<SessionStatusEvent>,
    until: SessionStatus,
    timeout: Duration,
) -> Vec<SessionStatus> {
    let start = Instant::now();
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => {
                seen.push(ev.status);
                if ev.status == until && seen.len() > 1 {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                assert!(start.elapsed() < timeout, "statuses so far: {seen:?}");
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return seen,
        }
    }
}

fn recv_chunk(rx: &mut broadcast::Receiver<ChunkEvent>, timeout: Duration) -> ChunkEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                assert!(start.elapsed() < timeout, "timed out waiting for chunk event");
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("chunk channel closed unexpectedly"),
        }
    }
}

#[test]
fn passthrough_session_plays_input_unchanged() {
    let fixture = Fixture::new("passthrough");
    let input = signal(SR as usize);
    let backend = backend(input.clone());
    let controller = controller(StubLoader, &backend);

    let id = controller
        .start(SessionConfig {
            passthrough_original: true,
            ..fixture.config()
        })
        .expect("start");
    assert_eq!(controller.status(), SessionStatus::Running);

    wait_for_recorded(&backend, CUSHION + 2_400, Duration::from_secs(5));
    controller.stop().expect("stop");
    controller.wait();

    let recorded = backend.recorded();
    assert!(recorded.len() >= CUSHION + 2_400);
    assert!(recorded[..CUSHION].iter().all(|&s| s == 0.0));
    let played = &recorded[CUSHION..];
    assert_eq!(played[..], input[..played.len()]);
    assert!(matches!(
        controller.poll_outcome(),
        Some(SessionOutcome::Stopped { session }) if session == id
    ));
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.diagnostics_snapshot().inference_calls, 0);
}

#[test]
fn converted_session_emits_chunk_events() {
    let fixture = Fixture::new("converted");
    let input = signal(SR as usize);
    let backend = backend(input.clone());
    let controller = controller(StubLoader, &backend);
    let mut chunks = controller.subscribe_chunks();

    controller.start(fixture.config()).expect("start");
    let first = recv_chunk(&mut chunks, Duration::from_secs(5));
    wait_for_recorded(&backend, CUSHION + 1_600, Duration::from_secs(5));
    controller.stop().expect("stop");
    controller.wait();

    assert_eq!(first.seq, 0);
    assert!(!first.passthrough);
    assert!(first.budget_ms > 0.0);

    // Identity stub with zero noise: output is the input delayed by the
    // cushion and the crossfade.
    let lag = CUSHION + 160;
    let recorded = backend.recorded();
    for (i, &s) in recorded.iter().enumerate().take(CUSHION + 1_600) {
        let expected = if i < lag { 0.0 } else { input[i - lag] };
        approx::assert_abs_diff_eq!(s, expected, epsilon = 1e-5);
    }
    assert!(controller.diagnostics_snapshot().inference_calls >= 2);
}

#[test]
fn restart_releases_devices_before_reopening() {
    let fixture = Fixture::new("restart");
    let backend = backend(signal(4 * SR as usize));
    let controller = controller(StubLoader, &backend);
    let mut statuses = controller.subscribe_status();

    let first = controller.start(fixture.config()).expect("first start");
    let second = controller.start(fixture.config()).expect("second start");
    assert_ne!(first, second);
    let seen: Vec<SessionStatus> = std::iter::from_fn(|| statuses.try_recv().ok())
        .map(|e| e.status)
        .collect();
    assert_eq!(
        seen,
        vec![
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Stopping,
            SessionStatus::Idle,
            SessionStatus::Starting,
            SessionStatus::Running
        ]
    );
    assert_eq!(
        backend.events(),
        vec![
            DeviceEvent::Opened(0),
            DeviceEvent::Closed(0),
            DeviceEvent::Opened(1)
        ]
    );
    assert_eq!(backend.open_streams(), 1);

    controller.stop().expect("stop");
    controller.wait();
    assert_eq!(backend.open_streams(), 0);

    let outcomes: Vec<u64> = std::iter::from_fn(|| controller.poll_outcome())
        .map(|o| o.session())
        .collect();
    assert_eq!(outcomes, vec![first, second]);
}

#[test]
fn device_open_failure_reports_error_then_idle() {
    let fixture = Fixture::new("device-failure");
    let backend = backend(signal(SR as usize));
    backend.set_fail_open(true);
    let controller = controller(StubLoader, &backend);
    let mut statuses = controller.subscribe_status();

    let err = controller.start(fixture.config()).unwrap_err();
    assert!(err.is_device_error(), "unexpected error: {err}");
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(
        collect_statuses(&mut statuses, SessionStatus::Idle, Duration::from_secs(1)),
        vec![
            SessionStatus::Starting,
            SessionStatus::Error,
            SessionStatus::Idle
        ]
    );
    assert!(backend.events().is_empty());
}

#[test]
fn invalid_configuration_is_rejected_before_devices_open() {
    let fixture = Fixture::new("invalid");
    let backend = backend(signal(SR as usize));
    let controller = controller(StubLoader, &backend);

    let err = controller
        .start(SessionConfig {
            transpose: 48,
            ..fixture.config()
        })
        .unwrap_err();
    assert!(matches!(err, SvcError::Configuration(_)));

    let err = controller
        .start(SessionConfig {
            input_device: Some(3),
            ..fixture.config()
        })
        .unwrap_err();
    assert!(matches!(err, SvcError::Configuration(_)));

    let err = controller
        .start(SessionConfig {
            speaker: Some("nobody".into()),
            ..fixture.config()
        })
        .unwrap_err();
    assert!(matches!(err, SvcError::Configuration(_)));

    assert!(backend.events().is_empty());
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert!(matches!(controller.stop(), Err(SvcError::NotRunning)));
}

/// Fails every synthesis call. Dropping it takes `linger`, which keeps the
/// session worker alive for a while after it has reported `Idle`.
struct BrokenModel {
    linger: Duration,
}

impl Drop for BrokenModel {
    fn drop(&mut self) {
        thread::sleep(self.linger);
    }
}

impl VoiceModel for BrokenModel {
    fn warm_up(&mut self) -> svc_core::Result<()> {
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        SR
    }

    fn hop_length(&self) -> usize {
        80
    }

    fn encode_content(&mut self, audio: &[f32], _sample_rate: u32) -> svc_core::Result<ContentFeatures> {
        let frames = audio.len().div_ceil(80);
        Ok(ContentFeatures::new(frames, 1, vec![0.0; frames]))
    }

    fn estimate_f0(
        &mut self,
        audio: &[f32],
        _sample_rate: u32,
        hop_length: usize,
        _method: F0Method,
    ) -> svc_core::Result<Vec<f32>> {
        Ok(vec![0.0; audio.len().div_ceil(hop_length)])
    }

    fn synthesize(&mut self, _request: &SynthesisRequest<'_>) -> svc_core::Result<Vec<f32>> {
        Err(SvcError::Inference("synthesizer exploded".into()))
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
struct BrokenLoader {
    linger: Duration,
}

impl ModelLoader for BrokenLoader {
    fn load(&self, _request: &LoadRequest) -> svc_core::Result<LoadedModel> {
        Ok(LoadedModel {
            model: ModelHandle::new(BrokenModel {
                linger: self.linger,
            }),
            speakers: SpeakerTable::new([("alice".to_string(), 0)]),
            cluster: None,
        })
    }
}

#[test]
fn inference_failure_halts_session_with_error() {
    let fixture = Fixture::new("inference-failure");
    let backend = backend(signal(SR as usize));
    let controller = controller(BrokenLoader::default(), &backend);
    let mut statuses = controller.subscribe_status();

    let id = controller.start(fixture.config()).expect("start");
    match wait_for_outcome(&controller, Duration::from_secs(5)) {
        SessionOutcome::Failed { session, error } => {
            assert_eq!(session, id);
            assert!(matches!(error, SvcError::Inference(_)));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    controller.wait();

    let seen = collect_statuses(&mut statuses, SessionStatus::Idle, Duration::from_secs(1));
    assert_eq!(
        seen,
        vec![
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Error,
            SessionStatus::Idle
        ]
    );
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(backend.open_streams(), 0);
    assert_eq!(controller.diagnostics_snapshot().inference_errors, 1);
}

#[test]
fn stop_after_failure_keeps_idle_status() {
    let fixture = Fixture::new("stop-after-failure");
    let backend = backend(signal(SR as usize));
    let controller = controller(
        BrokenLoader {
            linger: Duration::from_millis(300),
        },
        &backend,
    );
    let mut statuses = controller.subscribe_status();

    controller.start(fixture.config()).expect("start");
    let seen = collect_statuses(&mut statuses, SessionStatus::Idle, Duration::from_secs(5));
    assert_eq!(
        seen,
        vec![
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Error,
            SessionStatus::Idle
        ]
    );

    // The worker thread is still dropping the model here.
    assert!(matches!(controller.stop(), Err(SvcError::NotRunning)));
    assert_eq!(controller.status(), SessionStatus::Idle);

    controller.wait();
    assert!(matches!(statuses.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert!(matches!(
        controller.poll_outcome(),
        Some(SessionOutcome::Failed { .. })
    ));
}
