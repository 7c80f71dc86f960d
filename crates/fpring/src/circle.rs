//! Circle rendering and mask-to-circle fitting.

use std::time::{Duration, Instant};

use ndarray::{Array2, ArrayView2};

use crate::error::{FpError, FpResult};
use crate::geometry::Point;
use crate::solver::{minimize, LmConfig, LmProblem, ParamSpec};
use crate::task::FitTask;

/// Annulus mask: pixels with `|distance(pixel, center) − radius| ≤ thickness`.
///
/// `center` is `[col, row]`; `dim` is `(rows, cols)`.
pub fn render_circle(center: Point, radius: f64, thickness: f64, dim: (usize, usize)) -> Array2<u8> {
    let mut mask = Array2::<u8>::zeros(dim);
    for_each_circle_pixel(center, radius, thickness, dim, |r, c| mask[(r, c)] = 1);
    mask
}

/// Visit every annulus pixel row by row, scanning only the outer chord.
fn for_each_circle_pixel(
    center: Point,
    radius: f64,
    thickness: f64,
    dim: (usize, usize),
    mut visit: impl FnMut(usize, usize),
) {
    let (rows, cols) = dim;
    let [cx, cy] = center;
    if rows == 0
        || cols == 0
        || !(cx.is_finite() && cy.is_finite() && radius.is_finite() && thickness.is_finite())
        || thickness < 0.0
    {
        return;
    }
    let outer = radius + thickness;
    if outer < 0.0 {
        return;
    }
    let outer2 = outer * outer;
    let r0 = (cy - outer).ceil().max(0.0);
    let r1 = (cy + outer).floor().min((rows - 1) as f64);
    if r0 > r1 {
        return;
    }
    for r in r0 as usize..=r1 as usize {
        let dy = r as f64 - cy;
        let span2 = outer2 - dy * dy;
        if span2 < 0.0 {
            continue;
        }
        let span = span2.sqrt();
        let c0 = (cx - span).ceil().max(0.0);
        let c1 = (cx + span).floor().min((cols - 1) as f64);
        if c0 > c1 {
            continue;
        }
        for c in c0 as usize..=c1 as usize {
            let d = (c as f64 - cx).hypot(dy);
            if (d - radius).abs() <= thickness {
                visit(r, c);
            }
        }
    }
}

/// Refined circle for one arc.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CircleFit {
    pub center_col: f64,
    pub center_row: f64,
    pub radius: f64,
    pub thickness: f64,
    /// Mismatched pixel count between the rendered circle and the arc;
    /// `None` for the sentinel.
    pub mismatch: Option<f64>,
    /// Placeholder standing in for an arc whose fit failed.
    pub sentinel: bool,
}

impl CircleFit {
    /// Placeholder fit: center (0, 0), radius 1, thickness 1.
    pub const SENTINEL: CircleFit = CircleFit {
        center_col: 0.0,
        center_row: 0.0,
        radius: 1.0,
        thickness: 1.0,
        mismatch: None,
        sentinel: true,
    };

    pub fn center(&self) -> Point {
        [self.center_col, self.center_row]
    }

    /// Mask of the fitted annulus.
    pub fn render(&self, dim: (usize, usize)) -> Array2<u8> {
        render_circle(self.center(), self.radius, self.thickness, dim)
    }
}

/// Circle fitter tuning.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CircleFitConfig {
    /// Two-sided difference steps for (center_col, center_row, radius,
    /// thickness). The mismatch count is piecewise constant, so the steps
    /// must span whole pixels.
    pub steps: [f64; 4],
    /// Relative mismatch reduction below which the fit stops.
    pub ftol: f64,
    pub max_iterations: usize,
    /// Smallest admissible radius.
    pub min_radius: f64,
    /// Smallest admissible thickness.
    pub min_thickness: f64,
}

impl Default for CircleFitConfig {
    fn default() -> Self {
        Self {
            steps: [2.0, 2.0, 2.0, 0.1],
            ftol: 0.1,
            max_iterations: 50,
            min_radius: 1e-6,
            min_thickness: 1.0,
        }
    }
}

struct CircleProblem<'a> {
    arc: ArrayView2<'a, u8>,
}

impl LmProblem<4> for CircleProblem<'_> {
    fn residuals(&self, p: &[f64; 4], out: &mut Vec<f64>) {
        let dim = self.arc.dim();
        out.extend(self.arc.iter().map(|&v| -(v as f64)));
        let cols = dim.1;
        for_each_circle_pixel([p[0], p[1]], p[2], p[3], dim, |r, c| {
            out[r * cols + c] += 1.0;
        });
    }
}

/// Fit a circle to `arc_mask` starting from `initial = [center_col,
/// center_row, radius, thickness]`.
pub fn fit_circle(
    arc_mask: &ArrayView2<u8>,
    initial: [f64; 4],
    config: &CircleFitConfig,
    deadline: Option<Instant>,
) -> FpResult<CircleFit> {
    if arc_mask.is_empty() {
        return Err(FpError::Shape {
            expected: 2,
            got: arc_mask.shape().to_vec(),
        });
    }
    if initial.iter().any(|v| !v.is_finite()) {
        return Err(FpError::InvalidInput(format!(
            "non-finite circle guess {initial:?}"
        )));
    }

    let problem = CircleProblem { arc: arc_mask.view() };
    let specs = [
        ParamSpec::free(initial[0]).with_step(config.steps[0]).central(),
        ParamSpec::free(initial[1]).with_step(config.steps[1]).central(),
        ParamSpec::free(initial[2])
            .with_lower(config.min_radius)
            .with_step(config.steps[2])
            .central(),
        ParamSpec::free(initial[3])
            .with_lower(config.min_thickness)
            .with_step(config.steps[3])
            .central(),
    ];
    let lm = LmConfig {
        max_iterations: config.max_iterations,
        ..LmConfig::with_ftol(config.ftol)
    };

    let outcome = minimize(&problem, &specs, &lm, deadline)
        .map_err(|source| FpError::CircleFit { initial, source })?;
    let [center_col, center_row, radius, thickness] = outcome.params;
    tracing::debug!(
        center_col,
        center_row,
        radius,
        thickness,
        mismatch = outcome.chi2,
        iterations = outcome.iterations,
        "circle fit"
    );
    Ok(CircleFit {
        center_col,
        center_row,
        radius,
        thickness,
        mismatch: Some(outcome.chi2),
        sentinel: false,
    })
}

/// Circle fit running on its own thread.
pub type CircleFitTask = FitTask<CircleFit>;

impl CircleFitTask {
    /// Start [`fit_circle`] on a worker thread; `budget` bounds the solver.
    pub fn start(
        arc_mask: Array2<u8>,
        initial: [f64; 4],
        config: CircleFitConfig,
        budget: Option<Duration>,
    ) -> FpResult<Self> {
        FitTask::spawn("circle-fit", move || {
            let deadline = budget.map(|b| Instant::now() + b);
            fit_circle(&arc_mask.view(), initial, &config, deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::distance;

    #[test]
    fn render_matches_direct_test() {
        let dim = (40, 50);
        let m = render_circle([24.3, 19.7], 12.5, 1.2, dim);
        for ((r, c), &v) in m.indexed_iter() {
            let d = distance([c as f64, r as f64], [24.3, 19.7]);
            assert_eq!(v == 1, (d - 12.5).abs() <= 1.2, "pixel ({c}, {r})");
        }
    }

    #[test]
    fn render_is_monotone_in_thickness() {
        let dim = (64, 64);
        let mut prev = render_circle([30.0, 33.0], 20.0, 0.0, dim);
        for k in 1..8 {
            let next = render_circle([30.0, 33.0], 20.0, k as f64 * 0.5, dim);
            assert!(prev.iter().zip(next.iter()).all(|(&a, &b)| a <= b));
            prev = next;
        }
    }

    #[test]
    fn render_clips_to_plane() {
        let m = render_circle([-5.0, 10.0], 8.0, 1.0, (20, 20));
        assert!(m.iter().any(|&v| v == 1));
        assert!(render_circle([500.0, 500.0], 8.0, 1.0, (20, 20))
            .iter()
            .all(|&v| v == 0));
        assert!(render_circle([f64::NAN, 0.0], 8.0, 1.0, (20, 20))
            .iter()
            .all(|&v| v == 0));
    }

    #[test]
    fn fit_refines_perturbed_guess() {
        let dim = (100, 100);
        let arc = render_circle([52.0, 47.0], 30.0, 1.0, dim);
        let fit = fit_circle(
            &arc.view(),
            [54.0, 45.5, 31.5, 1.5],
            &CircleFitConfig::default(),
            None,
        )
        .unwrap();
        assert!(!fit.sentinel);
        assert!(fit.radius > 0.0 && fit.thickness >= 1.0);
        let start = fit_mismatch(&arc, [54.0, 45.5, 31.5, 1.5]);
        assert!(fit.mismatch.unwrap() < start);
        assert!(distance(fit.center(), [52.0, 47.0]) < 1.5, "{fit:?}");
        assert!((fit.radius - 30.0).abs() < 1.5);
    }

    fn fit_mismatch(arc: &Array2<u8>, p: [f64; 4]) -> f64 {
        let m = render_circle([p[0], p[1]], p[2], p[3], arc.dim());
        m.iter().zip(arc.iter()).filter(|(a, b)| a != b).count() as f64
    }

    #[test]
    fn bounds_hold_from_bad_guess() {
        let dim = (60, 60);
        let arc = render_circle([30.0, 30.0], 4.0, 1.0, dim);
        let fit = fit_circle(&arc.view(), [30.0, 30.0, 0.5, 1.0], &CircleFitConfig::default(), None)
            .unwrap();
        assert!(fit.radius >= 1e-6);
        assert!(fit.thickness >= 1.0);
    }

    #[test]
    fn non_finite_guess_is_rejected() {
        let arc = Array2::<u8>::zeros((10, 10));
        let err = fit_circle(&arc.view(), [f64::NAN, 0.0, 1.0, 1.0], &CircleFitConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, FpError::InvalidInput(_)));
    }

    #[test]
    fn expired_deadline_carries_initial_parameters() {
        let arc = render_circle([20.0, 20.0], 10.0, 1.0, (40, 40));
        let initial = [21.0, 19.0, 11.0, 1.0];
        let err = fit_circle(
            &arc.view(),
            initial,
            &CircleFitConfig::default(),
            Some(Instant::now()),
        )
        .unwrap_err();
        match err {
            FpError::CircleFit { initial: got, .. } => assert_eq!(got, initial),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn task_runs_fit() {
        let arc = render_circle([20.0, 20.0], 10.0, 1.0, (40, 40));
        let task = CircleFitTask::start(arc, [20.5, 19.5, 10.5, 1.0], CircleFitConfig::default(), None)
            .unwrap();
        let fit = task.join().unwrap();
        assert!(fit.thickness >= 1.0);
    }
}
