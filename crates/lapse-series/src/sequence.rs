//! On-disk image sequences.
//!
//! A sequence is one or more folders of image files sharing an
//! extension, ordered by folder then file name. Frame timestamps are
//! approximated from file modification times, which matches how
//! acquisition software typically writes one file per captured frame.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lapse_pipeline::Frame;
use walkdir::WalkDir;

use crate::error::SeriesError;
use crate::source::{FrameSource, frame_index};

/// A file-per-frame image sequence on disk.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    files: Vec<PathBuf>,
    times: Vec<Option<f64>>,
}

impl ImageSequence {
    /// Scan a single folder for image files with `extension`
    /// (e.g. `"png"`), sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::EmptySequence`] when no matching file is
    /// found.
    pub fn scan(folder: impl AsRef<Path>, extension: &str) -> Result<Self, SeriesError> {
        Self::scan_all(&[folder.as_ref().to_path_buf()], extension)
    }

    /// Scan several folders in order; frame numbers run continuously
    /// across folder boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::EmptySequence`] when no folder contains a
    /// matching file.
    pub fn scan_all(folders: &[PathBuf], extension: &str) -> Result<Self, SeriesError> {
        let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
        let mut files = Vec::new();
        for folder in folders {
            for entry in WalkDir::new(folder)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                let path = entry.path();
                let matches = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&wanted));
                if entry.file_type().is_file() && matches {
                    files.push(path.to_path_buf());
                }
            }
        }
        if files.is_empty() {
            return Err(SeriesError::EmptySequence {
                path: folders.first().cloned().unwrap_or_default(),
                extension: wanted,
            });
        }

        let times = files.iter().map(|path| modification_time(path)).collect();
        tracing::debug!(count = files.len(), extension = %wanted, "scanned image sequence");
        Ok(Self { files, times })
    }

    /// The scanned files, in frame order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn modification_time(path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(unix_seconds(modified))
}

#[allow(clippy::cast_precision_loss)]
fn unix_seconds(time: SystemTime) -> f64 {
    let datetime: DateTime<Utc> = time.into();
    datetime.timestamp() as f64 + f64::from(datetime.timestamp_subsec_nanos()) * 1e-9
}

impl FrameSource for ImageSequence {
    fn count(&self) -> usize {
        self.files.len()
    }

    fn read_raw(&self, num: i64) -> Result<Frame, SeriesError> {
        let index = frame_index(num, self.files.len())?;
        let path = &self.files[index];
        let decoded = image::open(path).map_err(|source| SeriesError::Decode {
            path: path.clone(),
            source,
        })?;
        let frame = match decoded {
            image::DynamicImage::ImageLuma8(gray) => Frame::Gray8(gray),
            other => Frame::Rgb8(other.to_rgb8()),
        };
        Ok(frame)
    }

    fn approximate_time(&self, num: i64) -> Option<f64> {
        let index = usize::try_from(num).ok()?;
        self.times.get(index).copied().flatten()
    }
}
