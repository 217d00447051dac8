//! In-memory audio backend.
//!
//! Plays a fixed signal into the input ring and records everything the
//! pipeline writes to the output ring. Every open/close is logged so callers
//! can check device ownership across sessions. Used for headless runs and by
//! the integration tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{ActiveStreams, AudioBackend, DeviceInfo, DeviceIo};
use crate::buffering::{AudioConsumer, AudioProducer, Consumer, Producer};
use crate::error::{Result, SvcError};

/// Device ownership log entry; the payload is the open counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Opened(usize),
    Closed(usize),
}

struct Shared {
    input_rate: u32,
    output_rate: u32,
    period: usize,
    pace: Duration,
    signal: Vec<f32>,
    fail_open: AtomicBool,
    opens: AtomicUsize,
    recorded: Mutex<Vec<f32>>,
    events: Mutex<Vec<DeviceEvent>>,
}

#[derive(Clone)]
pub struct VirtualBackend {
    shared: Arc<Shared>,
}

impl VirtualBackend {
    /// A backend at `sample_rate` on both sides, feeding `signal` in periods of
    /// 256 samples every millisecond.
    pub fn new(sample_rate: u32, signal: Vec<f32>) -> Self {
        Self::with_rates(sample_rate, sample_rate, signal)
    }

    pub fn with_rates(input_rate: u32, output_rate: u32, signal: Vec<f32>) -> Self {
        Self::build(input_rate, output_rate, signal, 256, Duration::from_millis(1))
    }

    /// Feed `period` samples every `pace`.
    pub fn paced(self, period: usize, pace: Duration) -> Self {
        let s = &self.shared;
        Self::build(s.input_rate, s.output_rate, s.signal.clone(), period, pace)
    }

    fn build(
        input_rate: u32,
        output_rate: u32,
        signal: Vec<f32>,
        period: usize,
        pace: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                input_rate,
                output_rate,
                period: period.max(1),
                pace,
                signal,
                fail_open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                recorded: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make subsequent opens fail with `SvcError::AudioDevice`.
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Everything played to the output so far.
    pub fn recorded(&self) -> Vec<f32> {
        self.shared.recorded.lock().clone()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.shared.events.lock().clone()
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        let events = self.shared.events.lock();
        let opened = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Opened(_)))
            .count();
        opened - (events.len() - opened)
    }

    fn device(&self, name: &str) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            index: 0,
            name: name.to_string(),
            host_api: "virtual".into(),
            is_default: true,
        }]
    }
}

impl AudioBackend for VirtualBackend {
    fn list_input_devices(&self) -> Vec<DeviceInfo> {
        self.device("Virtual Input")
    }

    fn list_output_devices(&self) -> Vec<DeviceInfo> {
        self.device("Virtual Output")
    }

    fn open(&self, io: DeviceIo) -> Result<Box<dyn ActiveStreams>> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(SvcError::AudioDevice("virtual device unavailable".into()));
        }
        let id = self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.events.lock().push(DeviceEvent::Opened(id));
        debug!(id, "virtual streams opened");

        let stop = Arc::new(AtomicBool::new(false));
        let feeder = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            let active = Arc::clone(&io.active);
            let producer = io.capture;
            thread::spawn(move || feed(&shared, producer, &stop, &active))
        };
        let drainer = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            let active = io.active;
            let consumer = io.playback;
            thread::spawn(move || drain(&shared, consumer, &stop, &active))
        };

        Ok(Box::new(VirtualStreams {
            id,
            shared: Arc::clone(&self.shared),
            stop,
            threads: vec![feeder, drainer],
        }))
    }
}

fn feed(shared: &Shared, mut producer: AudioProducer, stop: &AtomicBool, active: &AtomicBool) {
    for period in shared.signal.chunks(shared.period) {
        let mut pending = period;
        while !pending.is_empty() {
            if stop.load(Ordering::Relaxed) || !active.load(Ordering::Relaxed) {
                return;
            }
            let written = producer.push_slice(pending);
            pending = &pending[written..];
            if !pending.is_empty() {
                thread::sleep(shared.pace);
            }
        }
        thread::sleep(shared.pace);
    }
}

fn drain(shared: &Shared, mut consumer: AudioConsumer, stop: &AtomicBool, active: &AtomicBool) {
    let mut buf = vec![0f32; shared.period];
    loop {
        let stopping = stop.load(Ordering::Relaxed);
        if active.load(Ordering::Relaxed) || stopping {
            loop {
                let n = consumer.pop_slice(&mut buf);
                if n == 0 {
                    break;
                }
                shared.recorded.lock().extend_from_slice(&buf[..n]);
            }
        }
        if stopping {
            return;
        }
        thread::sleep(shared.pace);
    }
}

struct VirtualStreams {
    id: usize,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ActiveStreams for VirtualStreams {
    fn input_sample_rate(&self) -> u32 {
        self.shared.input_rate
    }

    fn output_sample_rate(&self) -> u32 {
        self.shared.output_rate
    }
}

impl Drop for VirtualStreams {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.shared.events.lock().push(DeviceEvent::Closed(self.id));
        debug!(id = self.id, "virtual streams closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_audio_ring_with_capacity;
    use std::time::Instant;

    fn io() -> (DeviceIo, AudioConsumer, AudioProducer, Arc<AtomicBool>) {
        let (capture, input_rx) = create_audio_ring_with_capacity(4_096);
        let (output_tx, playback) = create_audio_ring_with_capacity(4_096);
        let active = Arc::new(AtomicBool::new(true));
        (
            DeviceIo {
                input_device: None,
                output_device: None,
                capture,
                playback,
                active: Arc::clone(&active),
                underruns: Arc::new(AtomicUsize::new(0)),
            },
            input_rx,
            output_tx,
            active,
        )
    }

    #[test]
    fn feeds_signal_and_records_output() {
        let signal: Vec<f32> = (0..1_000).map(|i| i as f32).collect();
        let backend = VirtualBackend::new(8_000, signal.clone());
        let (io, mut input_rx, mut output_tx, _active) = io();
        let streams = backend.open(io).expect("open");
        assert_eq!(streams.input_sample_rate(), 8_000);

        let mut captured = Vec::new();
        let mut buf = [0f32; 128];
        let deadline = Instant::now() + Duration::from_secs(2);
        while captured.len() < signal.len() && Instant::now() < deadline {
            let n = input_rx.pop_slice(&mut buf);
            captured.extend_from_slice(&buf[..n]);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(captured, signal);

        output_tx.push_slice(&[0.5; 64]);
        drop(streams);
        assert_eq!(backend.recorded(), vec![0.5; 64]);
        assert_eq!(
            backend.events(),
            vec![DeviceEvent::Opened(0), DeviceEvent::Closed(0)]
        );
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn failing_open_reports_device_error() {
        let backend = VirtualBackend::new(8_000, Vec::new());
        backend.set_fail_open(true);
        let (io, ..) = io();
        let err = backend.open(io).err().expect("open should fail");
        assert!(err.is_device_error());
        assert!(backend.events().is_empty());
    }
}
