use std::collections::HashMap;
use std::time::{Duration, Instant};

use ndarray::{Array2, ArrayView2};
use tiny_solver::factors::na as ts_na;
use tiny_solver::Optimizer;

use super::model::{airy_value, value, AiryModel, AiryParam, AiryParams};
use crate::error::{FpError, FpResult};
use crate::percentile::Percentiles;
use crate::solver::SolverError;
use crate::task::FitTask;

/// Solver variable holding the seven Airy parameters.
const AIRY_VAR: &str = "airy";
/// Optimizer iterations per pass; the budget is checked between passes.
const PASS_ITERATIONS: usize = 10;
const MAX_PASSES: usize = 10;
/// Stop once a pass reduces χ² by less than this fraction.
const FTOL: f64 = 1e-7;

/// Per-parameter override of the default fit setup.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParInfo {
    pub param: AiryParam,
    /// Hold the parameter at its starting value.
    #[serde(default)]
    pub fixed: bool,
    /// Absolute `[lower, upper]` limits replacing the relative default.
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
    /// Starting value replacing the guess.
    #[serde(default)]
    pub value: Option<f64>,
}

impl ParInfo {
    pub fn fixed(param: AiryParam) -> Self {
        Self {
            param,
            fixed: true,
            limits: None,
            value: None,
        }
    }

    pub fn limits(param: AiryParam, lower: f64, upper: f64) -> Self {
        Self {
            param,
            fixed: false,
            limits: Some([lower, upper]),
            value: None,
        }
    }
}

/// Default bounds, relative to the starting values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AiryBounds {
    /// ± fraction of `b_ratio`.
    pub b_ratio_fraction: f64,
    /// ± pixels around each center coordinate.
    pub center_px: f64,
    pub continuum_fraction: f64,
    pub finesse_fraction: f64,
    /// ± fraction of the wavelength around the gap.
    pub gap_wavelength_fraction: f64,
    pub intensity_fraction: f64,
}

impl Default for AiryBounds {
    fn default() -> Self {
        Self {
            b_ratio_fraction: 0.1,
            center_px: 5.0,
            continuum_fraction: 0.1,
            finesse_fraction: 0.05,
            gap_wavelength_fraction: 0.25,
            intensity_fraction: 0.1,
        }
    }
}

fn relative(v: f64, fraction: f64) -> [f64; 2] {
    let a = v * (1.0 - fraction);
    let b = v * (1.0 + fraction);
    [a.min(b), a.max(b)]
}

impl AiryBounds {
    /// `[lower, upper]` per parameter around `initial`.
    pub fn limits(&self, initial: &AiryParams, wavelength: f64) -> [[f64; 2]; 7] {
        let gap_half = self.gap_wavelength_fraction * wavelength;
        [
            relative(initial.b_ratio, self.b_ratio_fraction),
            [initial.center_col - self.center_px, initial.center_col + self.center_px],
            [initial.center_row - self.center_px, initial.center_row + self.center_px],
            relative(initial.continuum, self.continuum_fraction),
            relative(initial.finesse, self.finesse_fraction),
            [initial.gap - gap_half, initial.gap + gap_half],
            relative(initial.intensity, self.intensity_fraction),
        ]
    }
}

/// Inputs of [`fit_airy`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AiryFitInput {
    pub b_ratio: f64,
    pub center_col: f64,
    pub center_row: f64,
    pub data: Array2<f64>,
    pub finesse: f64,
    pub gap: f64,
    pub wavelength: f64,
    /// Overrides; empty means every parameter free within the default bounds.
    pub parinfo: Vec<ParInfo>,
    /// Per-pixel weight on the residual; all ones when `None`.
    pub flat: Option<Array2<f64>>,
    pub bounds: AiryBounds,
    /// Wall-clock budget for the solver.
    pub budget: Option<Duration>,
}

impl AiryFitInput {
    /// Input with default bounds, no overrides and no flat.
    pub fn new(
        data: Array2<f64>,
        wavelength: f64,
        b_ratio: f64,
        center: [f64; 2],
        finesse: f64,
        gap: f64,
    ) -> Self {
        Self {
            b_ratio,
            center_col: center[0],
            center_row: center[1],
            data,
            finesse,
            gap,
            wavelength,
            parinfo: Vec::new(),
            flat: None,
            bounds: AiryBounds::default(),
            budget: None,
        }
    }

    fn validate(&self) -> FpResult<()> {
        if self.data.is_empty() {
            return Err(FpError::Shape {
                expected: 2,
                got: self.data.shape().to_vec(),
            });
        }
        if let Some(flat) = &self.flat {
            if flat.dim() != self.data.dim() {
                return Err(FpError::InvalidInput(format!(
                    "flat shape {:?} does not match data shape {:?}",
                    flat.shape(),
                    self.data.shape()
                )));
            }
        }
        let guesses = [
            ("b_ratio", self.b_ratio),
            ("center_col", self.center_col),
            ("center_row", self.center_row),
            ("finesse", self.finesse),
            ("gap", self.gap),
        ];
        if let Some((name, v)) = guesses.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FpError::InvalidInput(format!("{name} guess is {v}")));
        }
        if !(self.wavelength.is_finite() && self.wavelength > 0.0) {
            return Err(FpError::InvalidInput(format!(
                "wavelength must be positive, got {}",
                self.wavelength
            )));
        }
        if self.finesse == 0.0 {
            return Err(FpError::InvalidInput("finesse guess is zero".into()));
        }
        for info in &self.parinfo {
            if let Some([lo, hi]) = info.limits {
                if lo.is_nan() || hi.is_nan() || lo > hi {
                    return Err(FpError::InvalidInput(format!(
                        "{} limits [{lo}, {hi}] are empty",
                        info.param
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Result of [`fit_airy`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AiryFit {
    pub params: AiryParams,
    /// Parameters the fit started from.
    pub initial: AiryParams,
    pub wavelength: f64,
    /// Model rendered with the fitted parameters.
    pub model: Array2<f64>,
    pub chi2: f64,
    /// Optimizer passes run, each at most `PASS_ITERATIONS` iterations.
    pub passes: usize,
    pub converged: bool,
    /// Free parameters that ended on a bound.
    pub at_bound: Vec<AiryParam>,
}

impl AiryFit {
    pub fn airy_model(&self) -> AiryModel {
        AiryModel::new(self.params, self.wavelength, self.model.dim())
    }
}

/// Weighted residuals of one detector row.
#[derive(Debug, Clone)]
struct AiryRowFactor {
    row: f64,
    data: Vec<f64>,
    weights: Option<Vec<f64>>,
    wavelength: f64,
}

impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for AiryRowFactor {
    fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
        let p = params[0].as_slice();
        ts_na::DVector::<T>::from_iterator(
            self.data.len(),
            self.data.iter().enumerate().map(|(c, &d)| {
                let w = self.weights.as_ref().map_or(1.0, |w| w[c]);
                (airy_value(p, self.wavelength, c as f64, self.row) - ts_na::convert::<f64, T>(d))
                    * ts_na::convert::<f64, T>(w)
            }),
        )
    }
}

fn chi2_of(
    data: &ArrayView2<f64>,
    flat: Option<&Array2<f64>>,
    wavelength: f64,
    p: &[f64; 7],
) -> f64 {
    data.indexed_iter()
        .map(|((r, c), &d)| {
            let w = flat.map_or(1.0, |f| f[(r, c)]);
            let e = (value(p, wavelength, c as f64, r as f64) - d) * w;
            e * e
        })
        .sum()
}

/// Starting parameters: the caller's geometry guesses plus continuum and
/// intensity read from the data.
pub fn initial_params(input: &AiryFitInput) -> AiryParams {
    let pct = Percentiles::new(input.data.iter().copied());
    let (continuum, intensity) = AiryParams::level_guesses(&pct, input.finesse);
    AiryParams {
        b_ratio: input.b_ratio,
        center_col: input.center_col,
        center_row: input.center_row,
        continuum,
        finesse: input.finesse,
        gap: input.gap,
        intensity,
    }
}

fn build_problem(
    input: &AiryFitInput,
    limits: &[[f64; 2]; 7],
    fixed: &[bool; 7],
) -> tiny_solver::Problem {
    let mut problem = tiny_solver::Problem::new();
    for (r, row) in input.data.outer_iter().enumerate() {
        let factor = AiryRowFactor {
            row: r as f64,
            data: row.to_vec(),
            weights: input.flat.as_ref().map(|f| f.row(r).to_vec()),
            wavelength: input.wavelength,
        };
        problem.add_residual_block(row.len(), &[AIRY_VAR], Box::new(factor), None);
    }
    for i in 0..7 {
        if fixed[i] {
            problem.fix_variable(AIRY_VAR, i);
        } else {
            let [lo, hi] = limits[i];
            problem.set_variable_bounds(AIRY_VAR, i, lo, hi);
        }
    }
    problem
}

/// Fit the Airy model to `input.data`.
///
/// Levenberg-Marquardt on automatic derivatives of the model, run in passes
/// of `PASS_ITERATIONS` iterations so the budget is honored between passes.
pub fn fit_airy(input: AiryFitInput) -> FpResult<AiryFit> {
    input.validate()?;
    let deadline = input.budget.map(|b| Instant::now() + b);

    let mut start = initial_params(&input).to_array();
    for info in &input.parinfo {
        if let Some(v) = info.value {
            start[info.param.index()] = v;
        }
    }

    let mut limits = input
        .bounds
        .limits(&AiryParams::from_array(start), input.wavelength);
    let mut fixed = [false; 7];
    for info in &input.parinfo {
        let i = info.param.index();
        fixed[i] = info.fixed;
        if let Some(l) = info.limits {
            limits[i] = l;
        }
    }
    for i in (0..7).filter(|&i| !fixed[i]) {
        let [lo, hi] = limits[i];
        start[i] = start[i].max(lo).min(hi);
    }
    let initial = AiryParams::from_array(start);

    tracing::debug!(?initial, wavelength = input.wavelength, "Airy fit start");

    let fail = |source: SolverError| {
        tracing::error!(?initial, error = %source, "Airy fit failed");
        FpError::AiryFit { source }
    };

    let data = input.data.view();
    let mut params = start;
    let mut chi2 = chi2_of(&data, input.flat.as_ref(), input.wavelength, &params);
    if !chi2.is_finite() {
        return Err(fail(SolverError::NonFiniteResidual {
            params: params.to_vec(),
        }));
    }

    let problem = build_problem(&input, &limits, &fixed);
    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let mut passes = 0;
    let mut converged = chi2 == 0.0;
    while !converged && passes < MAX_PASSES {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(fail(SolverError::DeadlineExceeded {
                iterations: passes * PASS_ITERATIONS,
            }));
        }
        passes += 1;

        let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
        initial_values.insert(
            AIRY_VAR.to_string(),
            ts_na::DVector::<f64>::from_column_slice(&params),
        );
        let options = tiny_solver::OptimizerOptions {
            max_iteration: PASS_ITERATIONS,
            verbosity_level: 0,
            ..Default::default()
        };
        let solved = optimizer
            .optimize(&problem, &initial_values, Some(options))
            .and_then(|mut result| result.remove(AIRY_VAR))
            .filter(|v| v.len() == 7)
            .ok_or_else(|| fail(SolverError::NoSolution))?;

        let mut trial = params;
        for i in (0..7).filter(|&i| !fixed[i]) {
            trial[i] = solved[i];
        }
        let trial_chi2 = chi2_of(&data, input.flat.as_ref(), input.wavelength, &trial);
        if !trial_chi2.is_finite() {
            return Err(fail(SolverError::NonFiniteResidual {
                params: trial.to_vec(),
            }));
        }
        if trial_chi2 >= chi2 {
            converged = true;
            break;
        }
        let reduction = (chi2 - trial_chi2) / chi2;
        params = trial;
        chi2 = trial_chi2;
        converged = reduction < FTOL || chi2 == 0.0;
    }

    let params = AiryParams::from_array(params);
    let at_bound: Vec<AiryParam> = AiryParam::ALL
        .into_iter()
        .filter(|&param| {
            let i = param.index();
            let v = params.get(param);
            !fixed[i] && (v <= limits[i][0] || v >= limits[i][1])
        })
        .collect();
    for &param in &at_bound {
        let [lower, upper] = limits[param.index()];
        tracing::warn!(
            %param,
            value = params.get(param),
            lower,
            upper,
            "Airy parameter ended on its bound"
        );
    }
    tracing::info!(
        chi2,
        passes,
        converged,
        center_col = params.center_col,
        center_row = params.center_row,
        finesse = params.finesse,
        gap = params.gap,
        b_ratio = params.b_ratio,
        "Airy fit done"
    );

    let model = AiryModel::new(params, input.wavelength, input.data.dim()).render();
    Ok(AiryFit {
        params,
        initial,
        wavelength: input.wavelength,
        model,
        chi2,
        passes,
        converged,
        at_bound,
    })
}

/// Airy fit running on its own thread.
pub type AiryFitTask = FitTask<AiryFit>;

impl AiryFitTask {
    /// Start [`fit_airy`] on a worker thread.
    pub fn start(input: AiryFitInput) -> FpResult<Self> {
        FitTask::spawn("airy-fit", move || fit_airy(input))
    }
}
