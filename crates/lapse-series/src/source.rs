//! Frame sources: where raw pixel data comes from.
//!
//! A [`FrameSource`] abstracts over "an ordered sequence of N images",
//! independent of whether storage is a set of discrete files
//! ([`ImageSequence`](crate::ImageSequence)) or an in-memory stacked
//! volume ([`MemoryStack`]).

use lapse_pipeline::Frame;

use crate::error::SeriesError;

/// An ordered sequence of raw frames.
pub trait FrameSource: Send + Sync {
    /// Number of frames in the sequence.
    fn count(&self) -> usize;

    /// Read the raw (untransformed) frame `num`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::FrameOutOfRange`] for a frame number
    /// outside `0..count()`, and decode errors for unreadable storage.
    fn read_raw(&self, num: i64) -> Result<Frame, SeriesError>;

    /// Approximate acquisition time of frame `num` as Unix seconds,
    /// when the storage records one.
    fn approximate_time(&self, num: i64) -> Option<f64> {
        let _ = num;
        None
    }
}

/// Resolve a frame number against a sequence length.
///
/// # Errors
///
/// Returns [`SeriesError::FrameOutOfRange`] when `num` is negative or
/// past the end.
pub fn frame_index(num: i64, count: usize) -> Result<usize, SeriesError> {
    usize::try_from(num)
        .ok()
        .filter(|&index| index < count)
        .ok_or(SeriesError::FrameOutOfRange { num, count })
}

/// An in-memory stack of frames.
///
/// Used for stacked-volume storage read into memory up front, and for
/// synthetic sequences in tests.
#[derive(Debug, Clone)]
pub struct MemoryStack {
    frames: Vec<Frame>,
    times: Option<Vec<f64>>,
}

impl MemoryStack {
    /// Create a stack from frames, with no timing information.
    #[must_use]
    pub const fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            times: None,
        }
    }

    /// Create a stack with per-frame acquisition times (Unix seconds).
    ///
    /// `times` is truncated or padded implicitly by lookup: frames
    /// without a matching entry report no time.
    #[must_use]
    pub const fn with_times(frames: Vec<Frame>, times: Vec<f64>) -> Self {
        Self {
            frames,
            times: Some(times),
        }
    }
}

impl FrameSource for MemoryStack {
    fn count(&self) -> usize {
        self.frames.len()
    }

    fn read_raw(&self, num: i64) -> Result<Frame, SeriesError> {
        let index = frame_index(num, self.frames.len())?;
        Ok(self.frames[index].clone())
    }

    fn approximate_time(&self, num: i64) -> Option<f64> {
        let index = usize::try_from(num).ok()?;
        self.times.as_ref()?.get(index).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn stack() -> MemoryStack {
        let frames = (0..3)
            .map(|i| Frame::Gray8(GrayImage::from_pixel(2, 2, Luma([10 * (i + 1)]))))
            .collect();
        MemoryStack::with_times(frames, vec![0.0, 0.5, 1.0])
    }

    #[test]
    fn count_and_read() {
        let stack = stack();
        assert_eq!(stack.count(), 3);
        let frame = stack.read_raw(1).unwrap();
        assert!((frame.mean() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_errors() {
        let stack = stack();
        assert!(matches!(
            stack.read_raw(3),
            Err(SeriesError::FrameOutOfRange { num: 3, count: 3 }),
        ));
        assert!(matches!(
            stack.read_raw(-1),
            Err(SeriesError::FrameOutOfRange { num: -1, .. }),
        ));
    }

    #[test]
    fn times_are_reported() {
        let stack = stack();
        assert_eq!(stack.approximate_time(2), Some(1.0));
        assert_eq!(stack.approximate_time(9), None);
        let untimed = MemoryStack::new(vec![]);
        assert_eq!(untimed.approximate_time(0), None);
    }
}
