//! 1-D front detection over an image sequence.
//!
//! Collapses each frame to a horizontal intensity profile (per-column
//! mean), one output column per image x-position. Stacking the rows
//! over time gives the space-time diagram from which a wetting or
//! drying front position can be read.

use std::sync::Arc;

use lapse_pipeline::Frame;
use lapse_series::ImageSeries;

use crate::analysis::{Analysis, FrameJob};
use crate::error::AnalysisError;
use crate::store::Metadata;
use crate::table::Cell;

/// Per-column mean intensity profile.
pub struct Front1d {
    width: Option<u32>,
}

impl Front1d {
    /// Create an unconfigured analysis; the profile width is taken
    /// from the first frame at initialize time.
    #[must_use]
    pub const fn new() -> Self {
        Self { width: None }
    }
}

impl Default for Front1d {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean of each pixel column, left to right.
fn column_means(frame: &Frame) -> Vec<f64> {
    let gray = frame.to_gray_f32();
    let (width, height) = gray.dimensions();
    let mut means = vec![0.0_f64; width as usize];
    if height == 0 {
        return means;
    }
    for (x, _, pixel) in gray.enumerate_pixels() {
        means[x as usize] += f64::from(pixel.0[0]);
    }
    for value in &mut means {
        *value /= f64::from(height);
    }
    means
}

fn profile_row(frame: &Frame, expected_width: u32) -> Result<Vec<Cell>, AnalysisError> {
    let (width, _) = frame.dimensions();
    if width != expected_width {
        return Err(AnalysisError::InvalidParameter {
            key: "width".to_owned(),
            reason: format!("frame is {width} columns wide, profile expects {expected_width}"),
        });
    }
    Ok(column_means(frame).into_iter().map(Cell::Float).collect())
}

impl Analysis for Front1d {
    fn kind(&self) -> &'static str {
        "front1d"
    }

    fn default_basename(&self) -> &'static str {
        "Img_Front1D"
    }

    fn initialize(&mut self, series: &ImageSeries) -> Result<(), AnalysisError> {
        let (width, _) = series.read(0)?.dimensions();
        self.width = Some(width);
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        let width = self.width.unwrap_or(0);
        (0..width).map(|x| x.to_string()).collect()
    }

    fn analyze(&mut self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        let expected = self.width.ok_or_else(|| AnalysisError::NotConfigured {
            kind: "front1d",
            what: "profile width not initialized".to_owned(),
        })?;
        profile_row(frame, expected)
    }

    fn parallel_worker(&self) -> Option<Arc<dyn FrameJob>> {
        self.width.map(|width| {
            let job: Arc<dyn FrameJob> = Arc::new(Front1dJob { width });
            job
        })
    }

    fn parameters_to_metadata(&self) -> Metadata {
        // The profile width is derived from the frames themselves.
        Metadata::new()
    }

    fn parameters_from_metadata(&mut self, _metadata: &Metadata) -> Result<(), AnalysisError> {
        self.width = None;
        Ok(())
    }
}

struct Front1dJob {
    width: u32,
}

impl FrameJob for Front1dJob {
    fn analyze(&self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        profile_row(frame, self.width)
    }
}
