//! Contour extraction and measurement.
//!
//! Contours are extracted by border-following on the frame binarized
//! at a grey level, then measured (centroid, perimeter, enclosed area)
//! as closed polygons. The tracking analysis only consumes these three
//! properties; full contour geometry never leaves this module.

use geo::line_measures::{Distance, Length};
use geo::{Centroid, Coord, Euclidean, LineString, Point, Polygon};
use image::{GrayImage, Luma};
use lapse_pipeline::Frame;

/// Measured properties of one extracted contour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredContour {
    /// Centroid `(x, y)` in pixel coordinates.
    pub centroid: (f64, f64),
    /// Closed perimeter length in pixels.
    pub perimeter: f64,
    /// Enclosed area in square pixels.
    pub area: f64,
}

impl MeasuredContour {
    /// Euclidean distance from this contour's centroid to a position.
    #[must_use]
    pub fn distance_to(&self, position: (f64, f64)) -> f64 {
        Euclidean.distance(
            Point::new(self.centroid.0, self.centroid.1),
            Point::new(position.0, position.1),
        )
    }
}

/// Extract and measure the contours of `frame` binarized at `level`.
///
/// Pixels with value `>= level` are foreground. Degenerate contours
/// (fewer than three boundary points) are dropped.
#[must_use]
pub fn measured_contours(frame: &Frame, level: f64) -> Vec<MeasuredContour> {
    let gray = frame.to_gray_f32();
    let (width, height) = gray.dimensions();
    let binary = GrayImage::from_fn(width, height, |x, y| {
        Luma([if f64::from(gray.get_pixel(x, y).0[0]) >= level {
            255
        } else {
            0
        }])
    });

    imageproc::contours::find_contours::<u32>(&binary)
        .into_iter()
        .filter_map(|contour| measure(&contour.points))
        .collect()
}

/// The contour closest (by centroid) to `position`, if any.
#[must_use]
pub fn closest_contour(
    contours: &[MeasuredContour],
    position: (f64, f64),
) -> Option<&MeasuredContour> {
    contours.iter().min_by(|a, b| {
        a.distance_to(position)
            .total_cmp(&b.distance_to(position))
    })
}

fn measure(points: &[imageproc::point::Point<u32>]) -> Option<MeasuredContour> {
    if points.len() < 3 {
        return None;
    }
    let coords: Vec<Coord<f64>> = points
        .iter()
        .map(|p| Coord {
            x: f64::from(p.x),
            y: f64::from(p.y),
        })
        .collect();
    let mut ring = LineString::new(coords);
    ring.close();

    let centroid = ring.centroid()?;
    let perimeter = Euclidean.length(&ring);
    let area = geo::Area::unsigned_area(&Polygon::new(ring, Vec::new()));
    Some(MeasuredContour {
        centroid: (centroid.x(), centroid.y()),
        perimeter,
        area,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A frame with one bright square on a dark background.
    fn square_frame(x0: u32, y0: u32, side: u32) -> Frame {
        let img = GrayImage::from_fn(32, 32, |x, y| {
            let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
            Luma([if inside { 200 } else { 10 }])
        });
        Frame::Gray8(img)
    }

    #[test]
    fn uniform_frame_has_no_contours() {
        let frame = Frame::Gray8(GrayImage::from_pixel(16, 16, Luma([10])));
        assert!(measured_contours(&frame, 100.0).is_empty());
    }

    #[test]
    fn single_square_is_found_and_measured() {
        let frame = square_frame(8, 8, 9);
        let contours = measured_contours(&frame, 100.0);
        assert_eq!(contours.len(), 1);

        let contour = contours[0];
        // Centroid sits at the center of the 9x9 square at (8..16).
        assert!((contour.centroid.0 - 12.0).abs() < 0.5);
        assert!((contour.centroid.1 - 12.0).abs() < 0.5);
        // Border-following traces the outer boundary: 4 * (side - 1).
        assert!((contour.perimeter - 32.0).abs() < 2.0);
        assert!((contour.area - 64.0).abs() < 8.0);
    }

    #[test]
    fn closest_contour_picks_by_centroid() {
        let mut frame = GrayImage::from_pixel(40, 40, Luma([0]));
        for (cx, cy) in [(8_u32, 8_u32), (30, 30)] {
            for dx in 0..5 {
                for dy in 0..5 {
                    frame.put_pixel(cx + dx, cy + dy, Luma([255]));
                }
            }
        }
        let contours = measured_contours(&Frame::Gray8(frame), 128.0);
        assert_eq!(contours.len(), 2);

        let near_origin = closest_contour(&contours, (0.0, 0.0)).unwrap();
        assert!(near_origin.centroid.0 < 20.0);
        let near_corner = closest_contour(&contours, (39.0, 39.0)).unwrap();
        assert!(near_corner.centroid.0 > 20.0);
    }

    #[test]
    fn closest_contour_of_empty_set_is_none() {
        assert!(closest_contour(&[], (0.0, 0.0)).is_none());
    }
}
