//! Low-energy cut point search for the speech-boundary slicing policy.
//!
//! ## Algorithm
//!
//! 1. Score candidate cut points spaced `frame / 4` apart across
//!    `[naive - search, naive + search]`; the naive point is always a candidate.
//! 2. Each score is the RMS of one energy frame centred on the candidate.
//! 3. If the naive point is already silent, keep it.
//! 4. Otherwise pick the quietest candidate (ties → closest to naive).
//!
//! The chosen candidate's energy is never above the naive point's.

use super::energy::{rms, SilenceThreshold};

/// Result of a cut search, in `region` coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutPoint {
    pub offset: usize,
    pub energy: f32,
    pub naive_energy: f32,
}

/// Find a cut point in `region`.
///
/// `naive` is the nominal boundary; candidates lie in `[lo, hi]` (inclusive,
/// both within `region`). Energy frames are clipped to the region edges.
pub fn find_cut(
    region: &[f32],
    naive: usize,
    lo: usize,
    hi: usize,
    frame: usize,
    threshold: SilenceThreshold,
) -> CutPoint {
    let naive_energy = frame_energy(region, naive, frame);
    if lo >= hi || frame == 0 {
        return CutPoint {
            offset: naive,
            energy: naive_energy,
            naive_energy,
        };
    }

    let step = (frame / 4).max(1);
    let mut candidates = Vec::new();
    let mut c = naive;
    while c >= lo {
        candidates.push(c);
        match c.checked_sub(step) {
            Some(next) => c = next,
            None => break,
        }
    }
    let mut c = naive + step;
    while c <= hi {
        candidates.push(c);
        c += step;
    }

    let scored: Vec<(usize, f32)> = candidates
        .into_iter()
        .map(|c| (c, frame_energy(region, c, frame)))
        .collect();
    let reference = scored.iter().map(|&(_, e)| e).fold(0.0f32, f32::max);

    if threshold.is_silent(naive_energy, reference) {
        return CutPoint {
            offset: naive,
            energy: naive_energy,
            naive_energy,
        };
    }

    let (offset, energy) = scored
        .into_iter()
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| a.0.abs_diff(naive).cmp(&b.0.abs_diff(naive)))
        })
        .unwrap_or((naive, naive_energy));

    CutPoint {
        offset,
        energy,
        naive_energy,
    }
}

/// RMS of the frame centred on `center`, clipped to the region.
pub fn frame_energy(region: &[f32], center: usize, frame: usize) -> f32 {
    let half = frame / 2;
    let start = center.saturating_sub(half).min(region.len());
    let end = (center + frame - half).min(region.len());
    rms(&region[start..end])
}
