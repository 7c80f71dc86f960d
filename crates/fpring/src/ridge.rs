//! Ridge segmentation of an interferogram plane.
//!
//! The row-axis gradient of a ring pattern is strongly positive on one flank
//! of each fringe and strongly negative on the other. A pixel surrounded by
//! enough of both lies on the fringe centerline.

use ndarray::{Array2, ArrayView2, Axis, Zip};

use crate::finder::FinderConfig;
use crate::percentile::Percentiles;

/// Per-axis finite differences of a plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientField {
    /// Derivative along rows (axis 0).
    pub row: Array2<f64>,
    /// Derivative along columns (axis 1).
    pub col: Array2<f64>,
}

/// Everything produced while segmenting one plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Segmentation {
    pub gradient: GradientField,
    /// Pixels whose row gradient is above the upper percentile.
    pub upper_mask: Array2<u8>,
    /// Pixels whose row gradient is below the lower percentile.
    pub lower_mask: Array2<u8>,
    pub upper_percentile: u32,
    pub lower_percentile: u32,
    pub ridge: Array2<u8>,
}

fn diff_along(plane: &ArrayView2<f64>, axis: Axis) -> Array2<f64> {
    let n = plane.len_of(axis);
    let mut out = Array2::<f64>::zeros(plane.raw_dim());
    if n < 2 {
        return out;
    }
    for (i, mut lane) in out.axis_iter_mut(axis).enumerate() {
        let (lo, hi, scale) = if i == 0 {
            (0, 1, 1.0)
        } else if i == n - 1 {
            (n - 2, n - 1, 1.0)
        } else {
            (i - 1, i + 1, 0.5)
        };
        let a = plane.index_axis(axis, lo);
        let b = plane.index_axis(axis, hi);
        Zip::from(&mut lane)
            .and(&a)
            .and(&b)
            .for_each(|o, &a, &b| *o = (b - a) * scale);
    }
    out
}

/// Central differences in the interior, one-sided at the borders.
pub fn gradient(plane: &ArrayView2<f64>) -> GradientField {
    GradientField {
        row: diff_along(plane, Axis(0)),
        col: diff_along(plane, Axis(1)),
    }
}

/// Largest integer percentile `p ≤ 99` such that at least `fraction` of the
/// samples lie strictly above `percentile(g, p)`, floored at 3.
pub fn upper_percentile(pct: &Percentiles, fraction: f64) -> u32 {
    let mut p = 99u32;
    while p > 3 {
        if pct.fraction_above(pct.at(p as f64)) >= fraction {
            break;
        }
        p -= 1;
    }
    p
}

/// Ridge predicate: at least `threshold` pixels of `upper` and at least as
/// many of `lower` within Chebyshev distance `distance` (center excluded).
pub fn ridgeness(
    upper: &ArrayView2<u8>,
    lower: &ArrayView2<u8>,
    distance: usize,
    threshold: usize,
) -> Array2<u8> {
    let (rows, cols) = upper.dim();
    let mut ridge = Array2::<u8>::zeros((rows, cols));
    if rows == 0 || cols == 0 {
        return ridge;
    }
    for r in 0..rows {
        let r0 = r.saturating_sub(distance);
        let r1 = (r + distance).min(rows - 1);
        for c in 0..cols {
            let c0 = c.saturating_sub(distance);
            let c1 = (c + distance).min(cols - 1);
            let mut nu = 0usize;
            let mut nl = 0usize;
            for rr in r0..=r1 {
                for cc in c0..=c1 {
                    if rr == r && cc == c {
                        continue;
                    }
                    nu += upper[(rr, cc)] as usize;
                    nl += lower[(rr, cc)] as usize;
                }
            }
            if nu >= threshold && nl >= threshold {
                ridge[(r, c)] = 1;
            }
        }
    }
    ridge
}

/// Segment `plane` into its ridge mask.
pub fn segment(plane: &ArrayView2<f64>, config: &FinderConfig) -> Segmentation {
    let gradient = gradient(plane);
    let pct = Percentiles::new(gradient.row.iter().copied());

    let upper_percentile = upper_percentile(&pct, config.upper_fraction);
    let lower_percentile = pct.lowest_nonnull();
    let upper_threshold = pct.at(upper_percentile as f64);
    let lower_threshold = pct.at(lower_percentile as f64);

    let upper_mask = gradient.row.mapv(|g| u8::from(g > upper_threshold));
    let lower_mask = gradient.row.mapv(|g| u8::from(g < lower_threshold));
    let ridge = ridgeness(
        &upper_mask.view(),
        &lower_mask.view(),
        config.ridge_distance,
        config.ridge_neighbor_threshold,
    );

    tracing::debug!(
        upper_percentile,
        lower_percentile,
        upper_px = upper_mask.iter().filter(|&&v| v != 0).count(),
        lower_px = lower_mask.iter().filter(|&&v| v != 0).count(),
        ridge_px = ridge.iter().filter(|&&v| v != 0).count(),
        "ridge segmentation"
    );

    Segmentation {
        gradient,
        upper_mask,
        lower_mask,
        upper_percentile,
        lower_percentile,
        ridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::airy_plane;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn gradient_is_central_inside_one_sided_at_borders() {
        let a = array![[1.0, 2.0, 4.0], [2.0, 4.0, 8.0], [4.0, 8.0, 16.0]];
        let g = gradient(&a.view());
        assert_eq!(g.row.column(0).to_vec(), vec![1.0, 1.5, 2.0]);
        assert_eq!(g.col.row(2).to_vec(), vec![4.0, 6.0, 8.0]);
    }

    #[test]
    fn single_row_plane_has_zero_row_gradient() {
        let a = array![[1.0, 3.0, 9.0]];
        let g = gradient(&a.view());
        assert!(g.row.iter().all(|&v| v == 0.0));
        assert_eq!(g.col.row(0).to_vec(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn upper_percentile_reaches_target_fraction() {
        let pct = Percentiles::new((0..1000).map(|i| i as f64));
        let p = upper_percentile(&pct, 0.1);
        assert_eq!(p, 90);
        assert!(pct.fraction_above(pct.at(p as f64)) >= 0.1);
    }

    #[test]
    fn upper_percentile_floors_at_three() {
        let pct = Percentiles::new(vec![0.0; 100]);
        assert_eq!(upper_percentile(&pct, 0.1), 3);
    }

    #[test]
    fn ridgeness_needs_both_flanks() {
        let mut upper = Array2::<u8>::zeros((9, 9));
        let mut lower = Array2::<u8>::zeros((9, 9));
        upper.row_mut(3).fill(1);
        lower.row_mut(5).fill(1);
        let ridge = ridgeness(&upper.view(), &lower.view(), 2, 4);
        assert!(ridge.row(4).iter().skip(1).take(7).all(|&v| v == 1));
        assert!(ridge.row(0).iter().all(|&v| v == 0));
        let none = ridgeness(&upper.view(), &Array2::zeros((9, 9)).view(), 2, 4);
        assert!(none.iter().all(|&v| v == 0));
    }

    #[test]
    fn flat_plane_has_empty_ridge() {
        let plane = Array2::<f64>::zeros((32, 32));
        let seg = segment(&plane.view(), &FinderConfig::default());
        assert_eq!(seg.upper_percentile, 3);
        assert_eq!(seg.lower_percentile, 1);
        assert!(seg.ridge.iter().all(|&v| v == 0));
    }

    #[test]
    fn ring_pattern_produces_ridge() {
        let plane = airy_plane(128, 128, [64.0, 64.0], 1.2e-3, 5.0);
        let seg = segment(&plane.view(), &FinderConfig::default());
        assert!(seg.ridge.iter().any(|&v| v == 1));
        assert!((3..=99).contains(&seg.upper_percentile));
        // The row gradient is antisymmetric about the center row.
        assert_relative_eq!(
            seg.gradient.row[(10, 64)],
            -seg.gradient.row[(118, 64)],
            epsilon = 1e-9
        );
    }
}
