//! Ruler-and-square construction of an arc's center and radius.
//!
//! The two farthest arc pixels span a chord whose perpendicular bisector
//! passes through the center. The arc pixel `q` nearest that bisector, and
//! the foot `X` of the right angle at the chord end, are diametrically
//! opposite, so the center is their midpoint.

use std::collections::HashSet;

use crate::geometry::{distance, midpoint, to_point, Line, Pixel, Point};

/// Geometry of a successful construction, kept for overlays.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Construction {
    /// Chord extremes.
    pub p1: Point,
    pub p2: Point,
    pub midpoint: Point,
    /// Arc pixel closest to the perpendicular bisector.
    pub q_min: Point,
    /// Point diametrically opposite `q_min`.
    pub antipode: Point,
    pub center: Point,
    pub radius: f64,
    /// Number of chords tried.
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstructionError {
    #[error("arc has {0} pixels, at least 2 are needed")]
    TooFewPixels(usize),
    #[error("construction lines stayed parallel after {0} attempts")]
    Degenerate(usize),
}

/// Evenly spaced subset of at most `cap` pixels, order preserved.
fn downsample(pixels: &[Pixel], cap: usize) -> Vec<Pixel> {
    if cap == 0 || pixels.len() <= cap {
        return pixels.to_vec();
    }
    (0..cap).map(|i| pixels[i * pixels.len() / cap]).collect()
}

/// First pair with the largest separation.
fn farthest_pair(pixels: &[Pixel]) -> (Pixel, Pixel) {
    let mut best = -1.0;
    let mut pair = (pixels[0], pixels[0]);
    for (i, &a) in pixels.iter().enumerate() {
        for &b in &pixels[i + 1..] {
            let d = distance(to_point(a), to_point(b));
            if d > best {
                best = d;
                pair = (a, b);
            }
        }
    }
    pair
}

/// Grid pixels on `line`, one per column (per row when the line is steep).
fn rasterize(line: &Line, dim: (usize, usize)) -> Vec<Pixel> {
    let (rows, cols) = dim;
    let in_range = |v: f64, n: usize| v >= 0.0 && v < n as f64;
    if line.is_steep() {
        (0..rows)
            .filter_map(|r| {
                let c = (line.col_at(r as f64)? + 0.5).floor();
                in_range(c, cols).then_some((c as usize, r))
            })
            .collect()
    } else {
        (0..cols)
            .filter_map(|c| {
                let r = (line.row_at(c as f64)? + 0.5).floor();
                in_range(r, rows).then_some((c, r as usize))
            })
            .collect()
    }
}

/// Construct the center and radius of the arc made of `pixels`.
///
/// `pixels` should be in row-major order; `dim` is the plane shape.
pub fn construct(
    pixels: &[Pixel],
    dim: (usize, usize),
    sample_cap: usize,
    max_attempts: usize,
) -> Result<Construction, ConstructionError> {
    let mut pts = downsample(pixels, sample_cap);

    for attempt in 1..=max_attempts {
        if pts.len() < 2 {
            return Err(ConstructionError::TooFewPixels(pts.len()));
        }
        let (a, b) = farthest_pair(&pts);
        let (p1, p2) = (to_point(a), to_point(b));
        let m = midpoint(p1, p2);
        let Some(chord) = Line::through(p1, p2) else {
            return Err(ConstructionError::TooFewPixels(1));
        };
        let bisector = chord.perpendicular_through(m);

        let members: HashSet<Pixel> = pts.iter().copied().collect();
        let mut candidates: Vec<Pixel> = rasterize(&bisector, dim)
            .into_iter()
            .filter(|p| members.contains(p))
            .collect();
        if candidates.is_empty() {
            candidates = pts.clone();
        }
        let mut q = to_point(candidates[0]);
        let mut q_dist = bisector.distance_to(q);
        for &c in &candidates[1..] {
            let d = bisector.distance_to(to_point(c));
            if d < q_dist {
                q = to_point(c);
                q_dist = d;
            }
        }

        let intersection = Line::through(p1, q)
            .map(|secant| secant.perpendicular_through(p1))
            .and_then(|tertiary| tertiary.intersection(&bisector));
        let Some(antipode) = intersection else {
            tracing::debug!(attempt, ?p1, "parallel construction lines, dropping chord end");
            pts.retain(|&p| p != a);
            continue;
        };

        let center = midpoint(q, antipode);
        return Ok(Construction {
            p1,
            p2,
            midpoint: m,
            q_min: q,
            antipode,
            center,
            radius: distance(center, q),
            attempts: attempt,
        });
    }
    Err(ConstructionError::Degenerate(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_pixels(dim: (usize, usize), center: Point, radius: f64, half_width: f64) -> Vec<Pixel> {
        let mut out = Vec::new();
        for r in 0..dim.0 {
            for c in 0..dim.1 {
                let d = distance([c as f64, r as f64], center);
                if (d - radius).abs() <= half_width {
                    out.push((c, r));
                }
            }
        }
        out
    }

    #[test]
    fn upper_half_arc() {
        let pixels: Vec<Pixel> = ring_pixels((100, 100), [50.0, 50.0], 30.0, 0.5)
            .into_iter()
            .filter(|p| p.1 < 50)
            .collect();
        let c = construct(&pixels, (100, 100), 5000, 10).unwrap();
        assert!(distance(c.center, [50.0, 50.0]) < 1.0, "{:?}", c.center);
        assert!((c.radius - 30.0).abs() < 1.0);
        assert_eq!(c.attempts, 1);
        assert!(distance(c.midpoint, midpoint(c.p1, c.p2)) < 1e-12);
    }

    #[test]
    fn steep_bisector_arc() {
        let pixels: Vec<Pixel> = ring_pixels((100, 100), [40.0, 60.0], 25.0, 0.7)
            .into_iter()
            .filter(|p| p.0 > 40)
            .collect();
        let c = construct(&pixels, (100, 100), 5000, 10).unwrap();
        assert!(distance(c.center, [40.0, 60.0]) < 1.0, "{:?}", c.center);
        assert!((c.radius - 25.0).abs() < 1.0);
    }

    #[test]
    fn downsampling_keeps_construction_close() {
        let pixels: Vec<Pixel> = ring_pixels((200, 200), [100.0, 100.0], 80.0, 1.5)
            .into_iter()
            .filter(|p| p.1 < 100)
            .collect();
        assert!(pixels.len() > 200);
        let c = construct(&pixels, (200, 200), 200, 10).unwrap();
        assert!(distance(c.center, [100.0, 100.0]) < 3.0, "{:?}", c.center);
    }

    #[test]
    fn single_pixel_fails() {
        assert_eq!(
            construct(&[(3, 3)], (10, 10), 5000, 10),
            Err(ConstructionError::TooFewPixels(1))
        );
    }

    #[test]
    fn straight_segment_is_degenerate() {
        // q lies on the chord, so the tertiary line is parallel to the
        // bisector on every attempt.
        let pixels: Vec<Pixel> = (10..30).map(|c| (c, 5)).collect();
        let err = construct(&pixels, (20, 40), 5000, 10).unwrap_err();
        assert_eq!(err, ConstructionError::Degenerate(10));
    }
}
