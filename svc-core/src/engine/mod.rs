//! `StreamController`: top-level lifecycle controller for realtime sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! StreamController::new(loader, backend)
//!     └─► start(config)   → Starting: validate, load model, open devices
//!                         → Running:  worker thread runs the pipeline
//!         └─► stop()      → Stopping: cancel, drain output, release devices
//!                         → Idle
//! ```
//!
//! An inference or device failure moves the session to `Error`, then `Idle`;
//! the error itself is delivered through [`StreamController::poll_outcome`].
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! Devices are therefore opened *inside* the worker thread so they never cross
//! a thread boundary. A sync oneshot channel propagates open errors back to
//! the `start()` caller. Calling `start()` while a session is active cancels
//! and joins the old worker first, so at most one session owns the devices.
//! The old session reports `Stopping` and `Idle` before the new one reports
//! `Starting`.

pub mod cancel;
pub mod pipeline;
pub mod session;

pub use cancel::CancelToken;
pub use pipeline::DiagnosticsSnapshot;
pub use session::StreamSession;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    audio::{AudioBackend, DeviceIo},
    buffering::create_audio_ring,
    config::SessionConfig,
    error::{Result, SvcError},
    events::{ChunkEvent, SessionStatus, SessionStatusEvent},
    inference::ModelLoader,
};

/// Broadcast channel capacity for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Stopped or cancelled.
    Stopped { session: u64 },
    /// Halted by an inference or device failure.
    Failed { session: u64, error: SvcError },
}

impl SessionOutcome {
    pub fn session(&self) -> u64 {
        match self {
            Self::Stopped { session } | Self::Failed { session, .. } => *session,
        }
    }
}

/// Status mutex plus its broadcast, shared with the worker.
#[derive(Clone)]
struct StatusCell {
    current: Arc<Mutex<SessionStatus>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StatusCell {
    /// Events go out under the lock so subscribers see them in order.
    fn set(&self, status: SessionStatus, detail: Option<String>) {
        let mut current = self.current.lock();
        *current = status;
        let _ = self.tx.send(SessionStatusEvent { status, detail });
    }

    /// Move to `to` only if the status is still `from`.
    fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        let mut current = self.current.lock();
        if *current != from {
            return false;
        }
        *current = to;
        let _ = self.tx.send(SessionStatusEvent {
            status: to,
            detail: None,
        });
        true
    }

    fn get(&self) -> SessionStatus {
        *self.current.lock()
    }
}

struct Worker {
    session: u64,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn cancel_and_join(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            error!(session = self.session, "session worker panicked");
        }
    }
}

/// The streaming controller.
///
/// `Send + Sync`: all fields use interior mutability. Wrap in `Arc` to share
/// with event-forwarding threads.
pub struct StreamController {
    loader: Arc<dyn ModelLoader>,
    backend: Arc<dyn AudioBackend>,
    status: StatusCell,
    chunk_tx: broadcast::Sender<ChunkEvent>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    worker: Mutex<Option<Worker>>,
    outcome_tx: Sender<SessionOutcome>,
    outcome_rx: Receiver<SessionOutcome>,
    next_session: AtomicU64,
}

impl StreamController {
    pub fn new(loader: Arc<dyn ModelLoader>, backend: Arc<dyn AudioBackend>) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (chunk_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        Self {
            loader,
            backend,
            status: StatusCell {
                current: Arc::new(Mutex::new(SessionStatus::Idle)),
                tx: status_tx,
            },
            chunk_tx,
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            worker: Mutex::new(None),
            outcome_tx,
            outcome_rx,
            next_session: AtomicU64::new(0),
        }
    }

    /// Start a session with `config`. Returns the new session id.
    ///
    /// Blocks until the devices are confirmed open (or fail). A session that
    /// is already running is cancelled and joined first.
    ///
    /// # Errors
    /// - `SvcError::Configuration` for invalid config, device index or speaker.
    /// - Loader errors (`ModelNotFound`, `Io`, `Json`…).
    /// - Device errors (`NoDefaultInputDevice`, `AudioStream`…).
    pub fn start(&self, config: SessionConfig) -> Result<u64> {
        let mut slot = self.worker.lock();
        if let Some(previous) = slot.take() {
            info!(session = previous.session, "cancelling previous session");
            // The old worker reports Idle once its devices are released.
            self.status
                .transition(SessionStatus::Running, SessionStatus::Stopping);
            previous.cancel_and_join();
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.diagnostics.reset();
        self.status.set(SessionStatus::Starting, None);

        let session = match StreamSession::prepare(
            id,
            config,
            self.loader.as_ref(),
            self.backend.as_ref(),
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!(session = id, "session rejected: {e}");
                self.status.set(SessionStatus::Idle, Some(e.to_string()));
                return Err(e);
            }
        };

        let cancel = session.cancel.clone();
        let backend = Arc::clone(&self.backend);
        let status = self.status.clone();
        let chunk_tx = self.chunk_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let outcome_tx = self.outcome_tx.clone();

        // Sync oneshot: the worker reports device open success/failure.
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let spawned = thread::Builder::new()
            .name(format!("svc-session-{id}"))
            .spawn(move || {
                run_session(
                    session,
                    backend.as_ref(),
                    &status,
                    chunk_tx,
                    diagnostics,
                    &outcome_tx,
                    open_tx,
                )
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.status.set(SessionStatus::Idle, Some(e.to_string()));
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!(session = id, "session running");
                *slot = Some(Worker {
                    session: id,
                    cancel,
                    handle,
                });
                Ok(id)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the worker panicked.
                let _ = handle.join();
                self.status.set(
                    SessionStatus::Error,
                    Some("session worker failed to start".into()),
                );
                self.status.set(SessionStatus::Idle, None);
                Err(SvcError::Other(anyhow::anyhow!(
                    "session worker died unexpectedly"
                )))
            }
        }
    }

    /// Request the running session to stop. Returns immediately; the worker
    /// drains output and releases the devices, then reports `Idle`.
    ///
    /// # Errors
    /// `SvcError::NotRunning` unless the status is `Running`. A session that
    /// already failed or is already stopping keeps its status.
    pub fn stop(&self) -> Result<()> {
        let slot = self.worker.lock();
        let Some(worker) = slot.as_ref() else {
            return Err(SvcError::NotRunning);
        };
        if !self
            .status
            .transition(SessionStatus::Running, SessionStatus::Stopping)
        {
            return Err(SvcError::NotRunning);
        }
        worker.cancel.cancel();
        info!(session = worker.session, "session stop requested");
        Ok(())
    }

    /// Block until the current worker (if any) has exited.
    pub fn wait(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.handle.join().is_err() {
                error!(session = worker.session, "session worker panicked");
            }
        }
    }

    /// Current status (snapshot).
    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.status.get() == SessionStatus::Running
    }

    /// Next finished-session outcome, if one is waiting.
    pub fn poll_outcome(&self) -> Option<SessionOutcome> {
        self.outcome_rx.try_recv().ok()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status.tx.subscribe()
    }

    /// Subscribe to per-chunk latency / level events.
    pub fn subscribe_chunks(&self) -> broadcast::Receiver<ChunkEvent> {
        self.chunk_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel_and_join();
        }
    }
}

/// Worker body: open devices on this thread, run the pipeline, release.
fn run_session(
    session: StreamSession,
    backend: &dyn AudioBackend,
    status: &StatusCell,
    chunk_tx: broadcast::Sender<ChunkEvent>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    outcome_tx: &Sender<SessionOutcome>,
    open_tx: mpsc::Sender<Result<()>>,
) {
    let id = session.id;
    let (capture, input) = create_audio_ring();
    let (output, playback) = create_audio_ring();
    let active = Arc::new(AtomicBool::new(true));

    // Must happen on THIS thread: cpal::Stream is !Send.
    let streams = match backend.open(DeviceIo {
        input_device: session.config.input_device,
        output_device: session.config.output_device,
        capture,
        playback,
        active: Arc::clone(&active),
        underruns: Arc::clone(&diagnostics.underruns),
    }) {
        Ok(s) => s,
        Err(e) => {
            error!(session = id, "failed to open audio devices: {e}");
            status.set(SessionStatus::Error, Some(e.to_string()));
            status.set(SessionStatus::Idle, None);
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    status.set(SessionStatus::Running, None);
    let _ = open_tx.send(Ok(()));

    let result = pipeline::run(pipeline::PipelineContext {
        session_id: id,
        adapter: session.adapter(),
        layout: session.layout,
        input,
        output,
        input_rate: streams.input_sample_rate(),
        output_rate: streams.output_sample_rate(),
        cancel: session.cancel.clone(),
        chunk_tx,
        diagnostics,
        config: session.config,
    });

    active.store(false, Ordering::SeqCst);
    // Streams drop here, releasing the devices on this thread.
    drop(streams);

    match result {
        Ok(()) => {
            info!(session = id, "session stopped");
            let _ = outcome_tx.send(SessionOutcome::Stopped { session: id });
            status.set(SessionStatus::Idle, None);
        }
        Err(error) => {
            error!(session = id, "session halted: {error}");
            status.set(SessionStatus::Error, Some(error.to_string()));
            let _ = outcome_tx.send(SessionOutcome::Failed { session: id, error });
            status.set(SessionStatus::Idle, None);
        }
    }
}
