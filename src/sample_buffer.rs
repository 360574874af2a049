//! Immutable planar sample storage for buffer playback.

use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::{MAX_CHANNELS, MIN_CHANNELS};

/// A playable audio buffer: planar samples, a channel count, and the sample
/// rate the material was recorded at.
///
/// A `SampleBuffer` is immutable from the moment it exists; publication to
/// the render thread is an `Arc` clone, so every reader observes the fully
/// initialized data.
pub struct SampleBuffer {
    data: Vec<Vec<f32>>,
    frames: usize,
    sample_rate: f64,
}

impl SampleBuffer {
    /// Build a buffer from planar channel data.
    ///
    /// All channels must have the same length, the channel count must be in
    /// `1..=32`, and the sample rate must be positive.
    pub fn from_planar(data: Vec<Vec<f32>>, sample_rate: f64) -> Result<Arc<Self>> {
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&data.len()) {
            return Err(GraphError::argument(format!(
                "channel count {} out of range 1..=32",
                data.len()
            )));
        }
        let frames = data[0].len();
        if data.iter().any(|ch| ch.len() != frames) {
            return Err(GraphError::argument("channels differ in length"));
        }
        if !(sample_rate > 0.0) {
            return Err(GraphError::argument(format!(
                "sample rate {sample_rate} must be positive"
            )));
        }
        Ok(Arc::new(Self {
            data,
            frames,
            sample_rate,
        }))
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Sample rate the material was recorded at (not necessarily the
    /// context rate; playback resamples across the difference).
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Duration in seconds at the source rate.
    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.data[ch]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_planar() {
        let buf = SampleBuffer::from_planar(vec![vec![0.0; 100], vec![0.0; 100]], 44100.0).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 100);
        assert!((buf.duration() - 100.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_ragged_channels() {
        let err = SampleBuffer::from_planar(vec![vec![0.0; 10], vec![0.0; 11]], 48000.0);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_empty_and_bad_rate() {
        assert!(SampleBuffer::from_planar(vec![], 48000.0).is_err());
        assert!(SampleBuffer::from_planar(vec![vec![0.0; 4]], 0.0).is_err());
        assert!(SampleBuffer::from_planar(vec![vec![0.0; 4]], f64::NAN).is_err());
    }
}
