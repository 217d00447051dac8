//! Frame-level F0 helpers: transpose, unvoiced interpolation and resizing.

/// Pitch range accepted as voiced by the estimators.
pub const F0_MIN: f32 = 50.0;
pub const F0_MAX: f32 = 1100.0;

/// Values below this are treated as unvoiced.
const VOICED_EPSILON: f32 = 1e-3;

/// Multiplicative factor for a shift of `semitones`.
pub fn transpose_factor(semitones: i32) -> f32 {
    2f32.powf(semitones as f32 / 12.0)
}

/// Shift every frame by `semitones`. Unvoiced frames stay at 0.
pub fn apply_transpose(f0: &mut [f32], semitones: i32) {
    if semitones == 0 {
        return;
    }
    let factor = transpose_factor(semitones);
    for v in f0.iter_mut() {
        *v *= factor;
    }
}

/// Fill unvoiced gaps by linear interpolation between voiced neighbours,
/// holding the nearest voiced value at the edges.
///
/// Returns the filled contour and the voiced mask. An all-unvoiced input is
/// returned unchanged.
pub fn interpolate_unvoiced(f0: &[f32]) -> (Vec<f32>, Vec<bool>) {
    let voiced: Vec<bool> = f0.iter().map(|&v| v > VOICED_EPSILON).collect();
    let voiced_idx: Vec<usize> = (0..f0.len()).filter(|&i| voiced[i]).collect();
    let (Some(&first), Some(&last)) = (voiced_idx.first(), voiced_idx.last()) else {
        return (f0.to_vec(), voiced);
    };

    let mut out = f0.to_vec();
    for v in &mut out[..first] {
        *v = f0[first];
    }
    for v in &mut out[last + 1..] {
        *v = f0[last];
    }
    for pair in voiced_idx.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let span = (b - a) as f32;
        for i in a + 1..b {
            let t = (i - a) as f32 / span;
            out[i] = f0[a] + (f0[b] - f0[a]) * t;
        }
    }
    (out, voiced)
}

/// Resample a contour to `target_len` frames. Positions whose neighbours
/// are not both voiced come out unvoiced.
pub fn resize_f0(f0: &[f32], target_len: usize) -> Vec<f32> {
    if f0.is_empty() || target_len == 0 {
        return vec![0.0; target_len];
    }
    if f0.len() == target_len {
        return f0.to_vec();
    }
    let src_len = f0.len();
    (0..target_len)
        .map(|i| {
            // Align sample points across the two grids (as numpy.interp over
            // arange(0, src*target, src)/target does).
            let pos = (i * src_len) as f32 / target_len as f32;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(src_len - 1);
            let t = pos - lo as f32;
            let (a, b) = (f0[lo.min(src_len - 1)], f0[hi]);
            if t == 0.0 {
                return if a > VOICED_EPSILON { a } else { 0.0 };
            }
            if a > VOICED_EPSILON && b > VOICED_EPSILON {
                a + (b - a) * t
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn octave_transpose_doubles_pitch() {
        let mut f0 = vec![220.0, 0.0, 110.0];
        apply_transpose(&mut f0, 12);
        assert_relative_eq!(f0[0], 440.0, max_relative = 1e-5);
        assert_eq!(f0[1], 0.0);
        assert_relative_eq!(f0[2], 220.0, max_relative = 1e-5);

        apply_transpose(&mut f0, -12);
        assert_relative_eq!(f0[0], 220.0, max_relative = 1e-5);
        assert_relative_eq!(transpose_factor(7), 1.498_307, max_relative = 1e-5);
    }

    #[test]
    fn interpolation_fills_gaps_and_edges() {
        let (filled, voiced) = interpolate_unvoiced(&[0.0, 100.0, 0.0, 0.0, 160.0, 0.0]);
        assert_eq!(voiced, vec![false, true, false, false, true, false]);
        assert_relative_eq!(filled[0], 100.0);
        assert_relative_eq!(filled[2], 120.0);
        assert_relative_eq!(filled[3], 140.0);
        assert_relative_eq!(filled[5], 160.0);
    }

    #[test]
    fn all_unvoiced_is_untouched() {
        let (filled, voiced) = interpolate_unvoiced(&[0.0, 0.0]);
        assert_eq!(filled, vec![0.0, 0.0]);
        assert!(voiced.iter().all(|v| !v));
    }

    #[test]
    fn resize_keeps_voicing_boundaries() {
        assert_eq!(resize_f0(&[100.0, 200.0], 4), vec![100.0, 150.0, 200.0, 200.0]);
        assert_eq!(resize_f0(&[100.0, 0.0], 4), vec![100.0, 0.0, 0.0, 0.0]);
        assert_eq!(resize_f0(&[100.0, 0.0, 300.0], 3), vec![100.0, 0.0, 300.0]);
        assert_eq!(resize_f0(&[], 3), vec![0.0; 3]);
        assert_eq!(resize_f0(&[100.0, 100.0, 100.0, 100.0], 2), vec![100.0, 100.0]);
    }
}
