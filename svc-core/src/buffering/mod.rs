//! Lock-free SPSC ring buffers between the device callbacks and the worker.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback. One ring carries captured
//! input to the worker, a second carries converted output to the playback
//! callback.

pub mod chunk;
pub mod playout;

use ringbuf::{traits::Split, HeapRb};

pub use playout::Playout;
pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^22 = 4 194 304 f32 samples ≈ 87.4 s at 48 kHz.
/// Any single inference window must fit; see `SessionConfig::validate_layout`.
pub const RING_CAPACITY: usize = 1 << 22;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Same as [`create_audio_ring`] with an explicit capacity (tests, small devices).
pub fn create_audio_ring_with_capacity(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}
