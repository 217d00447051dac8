//! Offline speech/silence segmentation.
//!
//! Splits a whole clip into alternating silent and voiced regions using 10 ms
//! energy frames, then caps voiced regions at `max_len` samples so long
//! phrases are inferred in bounded pieces.

use std::ops::Range;

use super::energy::{rms, SilenceThreshold, ENERGY_FRAME_SECONDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: Range<usize>,
    pub is_speech: bool,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Segment `samples`. The returned segments tile `0..samples.len()` in order.
///
/// `max_len == 0` leaves voiced regions unbounded.
pub fn split_silence(
    samples: &[f32],
    sample_rate: u32,
    threshold: SilenceThreshold,
    max_len: usize,
) -> Vec<Segment> {
    if samples.is_empty() {
        return Vec::new();
    }
    let hop = ((ENERGY_FRAME_SECONDS * sample_rate as f32).round() as usize).max(1);
    let frame_rms: Vec<f32> = samples.chunks(hop).map(rms).collect();
    let reference = frame_rms.iter().copied().fold(0.0f32, f32::max);

    let mut segments: Vec<Segment> = Vec::new();
    for (i, &level) in frame_rms.iter().enumerate() {
        let is_speech = !threshold.is_silent(level, reference);
        let start = i * hop;
        let end = (start + hop).min(samples.len());
        match segments.last_mut() {
            Some(last) if last.is_speech == is_speech => last.range.end = end,
            _ => segments.push(Segment {
                range: start..end,
                is_speech,
            }),
        }
    }

    if max_len == 0 {
        return segments;
    }

    let mut bounded = Vec::with_capacity(segments.len());
    for segment in segments {
        if !segment.is_speech || segment.len() <= max_len {
            bounded.push(segment);
            continue;
        }
        let mut start = segment.range.start;
        while start < segment.range.end {
            let end = (start + max_len).min(segment.range.end);
            bounded.push(Segment {
                range: start..end,
                is_speech: true,
            });
            start = end;
        }
    }
    bounded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect()
    }

    #[test]
    fn segments_tile_the_clip() {
        let mut clip = vec![0.0; 500];
        clip.extend(tone(1_000));
        clip.extend(vec![0.0; 505]);
        let segs = split_silence(&clip, 1_000, SilenceThreshold::absolute(-40.0), 0);

        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0], Segment { range: 0..500, is_speech: false });
        assert_eq!(segs[1], Segment { range: 500..1_500, is_speech: true });
        assert_eq!(segs[2], Segment { range: 1_500..2_005, is_speech: false });
    }

    #[test]
    fn long_speech_is_capped() {
        let clip = tone(2_500);
        let segs = split_silence(&clip, 1_000, SilenceThreshold::absolute(-40.0), 1_000);
        let lens: Vec<usize> = segs.iter().map(Segment::len).collect();
        assert_eq!(lens, vec![1_000, 1_000, 500]);
        assert!(segs.iter().all(|s| s.is_speech));
    }

    #[test]
    fn relative_threshold_tracks_clip_level() {
        // Quiet clip: absolute -40 dB would call it all silence.
        let mut clip: Vec<f32> = tone(1_000).iter().map(|s| s * 0.01).collect();
        clip.extend(vec![0.0; 1_000]);
        let abs = split_silence(&clip, 1_000, SilenceThreshold::absolute(-40.0), 0);
        assert!(abs.iter().all(|s| !s.is_speech));

        let rel = split_silence(&clip, 1_000, SilenceThreshold::relative(-20.0), 0);
        assert!(rel[0].is_speech);
        assert_eq!(rel[0].range, 0..1_000);
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(split_silence(&[], 16_000, SilenceThreshold::absolute(-40.0), 0).is_empty());
    }
}
