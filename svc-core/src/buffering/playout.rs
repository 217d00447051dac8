//! Playback side of the output ring.
//!
//! Runs inside the device callback: no locks, no allocation.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::{AudioConsumer, Consumer};

/// Pulls one device period at a time from the output ring and keeps the
/// underrun count.
pub struct Playout {
    primed: bool,
    underruns: Arc<AtomicUsize>,
}

impl Playout {
    pub fn new(underruns: Arc<AtomicUsize>) -> Self {
        Self {
            primed: false,
            underruns,
        }
    }

    /// Whether audio has started flowing.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Fill `out` from the ring. Missing samples are played as silence.
    ///
    /// A short read counts as an underrun only once the first sample has
    /// been played, so the wait for the first block is not an underrun.
    /// Returns the number of samples taken from the ring.
    pub fn fill(&mut self, consumer: &mut AudioConsumer, out: &mut [f32]) -> usize {
        let got = consumer.pop_slice(out);
        if got > 0 {
            self.primed = true;
        }
        if got < out.len() {
            out[got..].fill(0.0);
            if self.primed {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        got
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_ring_with_capacity, Producer};

    #[test]
    fn waiting_for_first_block_is_not_an_underrun() {
        let underruns = Arc::new(AtomicUsize::new(0));
        let mut playout = Playout::new(Arc::clone(&underruns));
        let (mut tx, mut rx) = create_audio_ring_with_capacity(64);
        let mut out = [1.0f32; 4];

        assert_eq!(playout.fill(&mut rx, &mut out), 0);
        assert_eq!(out, [0.0; 4]);
        assert!(!playout.is_primed());

        tx.push_slice(&[0.5; 6]);
        assert_eq!(playout.fill(&mut rx, &mut out), 4);
        assert_eq!(playout.fill(&mut rx, &mut out), 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(underruns.load(Ordering::Relaxed), 1);
    }
}
