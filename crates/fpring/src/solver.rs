//! Bounded Levenberg-Marquardt on finite differences.
//!
//! Used by the circle fit, whose mask mismatch is piecewise constant in the
//! parameters: automatic derivatives vanish almost everywhere, while
//! pixel-sized difference steps see the mismatch change.
//!
//! Parameters live in a fixed-size array; each one may be restricted to a
//! closed interval. After every step the parameters are clamped back into
//! their bounds, and a parameter sitting on a bound whose descent direction
//! points outside is frozen for that iteration. Differences are one- or
//! two-sided per parameter.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};

/// Solver failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    /// No residuals to minimize.
    #[error("problem has no residuals")]
    EmptyProblem,
    /// The residual vector contains NaN or infinity at the given parameters.
    #[error("non-finite residual at parameters {params:?}")]
    NonFiniteResidual { params: Vec<f64> },
    /// The wall-clock deadline passed before convergence.
    #[error("deadline exceeded after {iterations} iterations")]
    DeadlineExceeded { iterations: usize },
    /// The optimizer returned no parameters.
    #[error("optimizer produced no solution")]
    NoSolution,
}

/// A least-squares problem over `N` parameters.
pub trait LmProblem<const N: usize> {
    /// Fill `out` with the residual vector at `params` (cleared by the caller).
    fn residuals(&self, params: &[f64; N], out: &mut Vec<f64>);
}

/// Per-parameter constraints.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamSpec {
    /// Starting value.
    pub value: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Absolute finite-difference step; relative default when `None`.
    pub step: Option<f64>,
    /// Use two-sided differences for this parameter.
    pub central: bool,
}

impl ParamSpec {
    /// Free, unbounded parameter.
    pub fn free(value: f64) -> Self {
        Self {
            value,
            lower: None,
            upper: None,
            step: None,
            central: false,
        }
    }

    pub fn bounded(value: f64, lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            ..Self::free(value)
        }
    }

    pub fn with_lower(mut self, lower: f64) -> Self {
        self.lower = Some(lower);
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn central(mut self) -> Self {
        self.central = true;
        self
    }

    fn clamp(&self, v: f64) -> f64 {
        let v = match self.lower {
            Some(lo) if v < lo => lo,
            _ => v,
        };
        match self.upper {
            Some(hi) if v > hi => hi,
            _ => v,
        }
    }

    fn at_lower(&self, v: f64) -> bool {
        self.lower.is_some_and(|lo| v <= lo)
    }

    fn at_upper(&self, v: f64) -> bool {
        self.upper.is_some_and(|hi| v >= hi)
    }
}

/// Solver tolerances.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of Jacobian evaluations.
    pub max_iterations: usize,
    /// Stop when an accepted step reduces χ² by less than this fraction.
    pub ftol: f64,
    /// Stop when every free parameter moves by less than `xtol·(|p| + xtol)`.
    pub xtol: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Give up improving once damping grows beyond this value.
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e10,
        }
    }
}

impl LmConfig {
    /// Default configuration with the given relative χ² tolerance.
    pub fn with_ftol(ftol: f64) -> Self {
        Self {
            ftol,
            ..Self::default()
        }
    }
}

/// Outcome of a successful minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals at `params`.
    pub chi2: f64,
    pub iterations: usize,
    /// True when a tolerance was met, false when the iteration or damping
    /// limit stopped the search.
    pub converged: bool,
    /// Indices of parameters that ended on one of their bounds.
    pub at_bound: Vec<usize>,
}

fn chi2_of(res: &[f64]) -> f64 {
    res.iter().map(|r| r * r).sum()
}

fn finite_differences<const N: usize, P: LmProblem<N>>(
    problem: &P,
    params: &[f64; N],
    specs: &[ParamSpec; N],
    base: &[f64],
    rows: &mut Vec<[f64; N]>,
    scratch: &mut Vec<f64>,
) {
    rows.clear();
    rows.resize(base.len(), [0.0; N]);
    for i in 0..N {
        let spec = &specs[i];
        let mut h = spec.step.unwrap_or_else(|| 1e-6 * params[i].abs().max(1e-3));
        let fits_above = spec.upper.map_or(true, |hi| params[i] + h <= hi);
        let fits_below = spec.lower.map_or(true, |lo| params[i] - h >= lo);

        if spec.central && fits_above && fits_below {
            let mut shifted = *params;
            shifted[i] += h;
            scratch.clear();
            problem.residuals(&shifted, scratch);
            let plus = std::mem::take(scratch);
            shifted[i] = params[i] - h;
            problem.residuals(&shifted, scratch);
            for (row, (&rp, &rm)) in rows.iter_mut().zip(plus.iter().zip(scratch.iter())) {
                row[i] = (rp - rm) / (2.0 * h);
            }
            *scratch = plus;
            continue;
        }

        // Step backwards when the forward step would leave the box.
        if !fits_above {
            h = -h;
        }
        let mut shifted = *params;
        shifted[i] += h;
        scratch.clear();
        problem.residuals(&shifted, scratch);
        for (row, (&r1, &r0)) in rows.iter_mut().zip(scratch.iter().zip(base)) {
            row[i] = (r1 - r0) / h;
        }
    }
}

/// Minimize `Σ residuals²` starting from `specs[i].value`.
pub fn minimize<const N: usize, P: LmProblem<N>>(
    problem: &P,
    specs: &[ParamSpec; N],
    config: &LmConfig,
    deadline: Option<Instant>,
) -> Result<LmOutcome<N>, SolverError> {
    let mut params = [0.0; N];
    for (p, s) in params.iter_mut().zip(specs) {
        *p = s.clamp(s.value);
    }

    let mut residuals = Vec::new();
    problem.residuals(&params, &mut residuals);
    if residuals.is_empty() {
        return Err(SolverError::EmptyProblem);
    }
    let mut chi2 = chi2_of(&residuals);
    if !chi2.is_finite() {
        return Err(SolverError::NonFiniteResidual {
            params: params.to_vec(),
        });
    }

    let mut rows: Vec<[f64; N]> = Vec::with_capacity(residuals.len());
    let mut scratch = Vec::with_capacity(residuals.len());
    let mut lambda = config.initial_lambda;
    let mut iterations = 0;
    let mut converged = false;

    'outer: while iterations < config.max_iterations {
        if chi2 == 0.0 {
            converged = true;
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SolverError::DeadlineExceeded { iterations });
        }
        iterations += 1;

        finite_differences(problem, &params, specs, &residuals, &mut rows, &mut scratch);

        // Normal equations over every parameter, then restricted to the
        // active set.
        let mut jtj = [[0.0; N]; N];
        let mut jtr = [0.0; N];
        for (row, &r) in rows.iter().zip(&residuals) {
            for a in 0..N {
                if row[a] == 0.0 {
                    continue;
                }
                jtr[a] += row[a] * r;
                for b in a..N {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        let active: Vec<usize> = (0..N)
            .filter(|&i| {
                let s = &specs[i];
                // Descent direction is -jtr.
                let pegged_low = s.at_lower(params[i]) && jtr[i] > 0.0;
                let pegged_high = s.at_upper(params[i]) && jtr[i] < 0.0;
                !(pegged_low || pegged_high)
            })
            .collect();
        if active.is_empty() {
            converged = true;
            break;
        }

        let k = active.len();
        let h = DMatrix::from_fn(k, k, |a, b| {
            let (i, j) = (active[a].min(active[b]), active[a].max(active[b]));
            jtj[i][j]
        });
        let g = DVector::from_fn(k, |a, _| -jtr[active[a]]);

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(SolverError::DeadlineExceeded { iterations });
            }
            let mut damped = h.clone();
            for a in 0..k {
                damped[(a, a)] += lambda * h[(a, a)].max(1e-12);
            }
            let Some(delta) = damped.lu().solve(&g) else {
                lambda *= config.lambda_up;
                if lambda > config.max_lambda {
                    break 'outer;
                }
                continue;
            };

            let mut trial = params;
            for (a, &i) in active.iter().enumerate() {
                trial[i] = specs[i].clamp(params[i] + delta[a]);
            }

            scratch.clear();
            problem.residuals(&trial, &mut scratch);
            let trial_chi2 = chi2_of(&scratch);

            if trial_chi2.is_finite() && trial_chi2 < chi2 {
                let small_step = active.iter().all(|&i| {
                    (trial[i] - params[i]).abs() <= config.xtol * (params[i].abs() + config.xtol)
                });
                let reduction = (chi2 - trial_chi2) / chi2;
                params = trial;
                chi2 = trial_chi2;
                std::mem::swap(&mut residuals, &mut scratch);
                lambda = (lambda * config.lambda_down).max(1e-12);
                if reduction < config.ftol || small_step {
                    converged = true;
                    break 'outer;
                }
                break;
            }

            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                break 'outer;
            }
        }
    }

    let at_bound = (0..N)
        .filter(|&i| specs[i].at_lower(params[i]) || specs[i].at_upper(params[i]))
        .collect();

    Ok(LmOutcome {
        params,
        chi2,
        iterations,
        converged,
        at_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// y = a·exp(-k·x) + c sampled on a grid.
    struct Decay {
        xs: Vec<f64>,
        ys: Vec<f64>,
    }

    impl Decay {
        fn new(truth: [f64; 3]) -> Self {
            let xs: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
            let ys = xs
                .iter()
                .map(|&x| truth[0] * (-truth[1] * x).exp() + truth[2])
                .collect();
            Self { xs, ys }
        }
    }

    impl LmProblem<3> for Decay {
        fn residuals(&self, p: &[f64; 3], out: &mut Vec<f64>) {
            out.extend(
                self.xs
                    .iter()
                    .zip(&self.ys)
                    .map(|(&x, &y)| p[0] * (-p[1] * x).exp() + p[2] - y),
            );
        }
    }

    /// Residual is the step count `floor(p)` away from 3, like a mask
    /// mismatch: flat between integers.
    struct Staircase;

    impl LmProblem<1> for Staircase {
        fn residuals(&self, p: &[f64; 1], out: &mut Vec<f64>) {
            out.push(p[0].floor() - 3.0);
        }
    }

    #[test]
    fn recovers_parameters_with_finite_differences() {
        let problem = Decay::new([3.0, 0.7, 0.5]);
        let specs = [
            ParamSpec::free(2.0),
            ParamSpec::free(1.0),
            ParamSpec::free(0.0),
        ];
        let out = minimize(&problem, &specs, &LmConfig::default(), None).unwrap();
        assert_relative_eq!(out.params[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(out.params[1], 0.7, epsilon = 1e-4);
        assert_relative_eq!(out.params[2], 0.5, epsilon = 1e-4);
        assert!(out.at_bound.is_empty());
    }

    #[test]
    fn central_steps_cross_flat_plateaus() {
        let specs = [ParamSpec::free(0.5).with_step(2.0).central()];
        let out = minimize(&Staircase, &specs, &LmConfig::default(), None).unwrap();
        assert_eq!(out.params[0].floor(), 3.0);
        assert_eq!(out.chi2, 0.0);
    }

    #[test]
    fn bounds_are_respected_and_reported() {
        let problem = Decay::new([3.0, 0.7, 0.5]);
        let specs = [
            ParamSpec::bounded(2.0, 0.0, 2.5),
            ParamSpec::free(1.0),
            ParamSpec::free(0.0),
        ];
        let out = minimize(&problem, &specs, &LmConfig::default(), None).unwrap();
        assert!(out.params[0] <= 2.5);
        assert_eq!(out.at_bound, vec![0]);
    }

    #[test]
    fn empty_problem_is_an_error() {
        let problem = Decay {
            xs: Vec::new(),
            ys: Vec::new(),
        };
        let specs = [ParamSpec::free(1.0); 3];
        assert_eq!(
            minimize(&problem, &specs, &LmConfig::default(), None),
            Err(SolverError::EmptyProblem)
        );
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let mut problem = Decay::new([1.0, 1.0, 1.0]);
        problem.ys[3] = f64::NAN;
        let specs = [ParamSpec::free(1.0); 3];
        let err = minimize(&problem, &specs, &LmConfig::default(), None).unwrap_err();
        assert!(matches!(err, SolverError::NonFiniteResidual { .. }));
    }

    #[test]
    fn expired_deadline_aborts() {
        let problem = Decay::new([3.0, 0.7, 0.5]);
        let specs = [ParamSpec::free(2.0); 3];
        let now = Instant::now();
        let err = minimize(&problem, &specs, &LmConfig::default(), Some(now)).unwrap_err();
        assert_eq!(err, SolverError::DeadlineExceeded { iterations: 0 });
    }
}
