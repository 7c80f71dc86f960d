//! Airy transmission model of a Fabry-Pérot etalon imaged on a detector.

use std::f64::consts::PI;

use ndarray::Array2;
use tiny_solver::factors::na::{self as ts_na, RealField};

use crate::percentile::Percentiles;

/// Hα rest wavelength in microns.
pub const H_ALPHA_UM: f64 = 0.6563;

/// Model parameters, in solver order.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AiryParams {
    /// Pixel size over focal length.
    pub b_ratio: f64,
    pub center_col: f64,
    pub center_row: f64,
    pub continuum: f64,
    pub finesse: f64,
    /// Etalon gap, same unit as the wavelength.
    pub gap: f64,
    pub intensity: f64,
}

/// Parameter names, indexable into [`AiryParams::to_array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiryParam {
    BRatio,
    CenterCol,
    CenterRow,
    Continuum,
    Finesse,
    Gap,
    Intensity,
}

impl AiryParam {
    pub const ALL: [AiryParam; 7] = [
        AiryParam::BRatio,
        AiryParam::CenterCol,
        AiryParam::CenterRow,
        AiryParam::Continuum,
        AiryParam::Finesse,
        AiryParam::Gap,
        AiryParam::Intensity,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            AiryParam::BRatio => "b_ratio",
            AiryParam::CenterCol => "center_col",
            AiryParam::CenterRow => "center_row",
            AiryParam::Continuum => "continuum",
            AiryParam::Finesse => "finesse",
            AiryParam::Gap => "gap",
            AiryParam::Intensity => "intensity",
        }
    }
}

impl std::fmt::Display for AiryParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl AiryParams {
    pub fn to_array(&self) -> [f64; 7] {
        [
            self.b_ratio,
            self.center_col,
            self.center_row,
            self.continuum,
            self.finesse,
            self.gap,
            self.intensity,
        ]
    }

    pub fn from_array(p: [f64; 7]) -> Self {
        Self {
            b_ratio: p[0],
            center_col: p[1],
            center_row: p[2],
            continuum: p[3],
            finesse: p[4],
            gap: p[5],
            intensity: p[6],
        }
    }

    pub fn get(&self, param: AiryParam) -> f64 {
        self.to_array()[param.index()]
    }

    /// Continuum and intensity guesses from the data percentiles.
    ///
    /// With `F = 4·finesse²/π²`, the fringe contrast is `(1 + F)/F`, so the
    /// peak-to-floor spread scaled by it recovers the fringe intensity.
    pub fn level_guesses(data: &Percentiles, finesse: f64) -> (f64, f64) {
        let f = coefficient_of_finesse(finesse);
        let p_lo = data.at(data.lowest_nonnull() as f64);
        let p99 = data.at(99.0);
        let intensity = (p99 - p_lo) * (1.0 + f) / f;
        let continuum = (p99 - intensity).abs();
        (continuum, intensity)
    }
}

/// `4·finesse²/π²`.
#[inline]
pub fn coefficient_of_finesse(finesse: f64) -> f64 {
    4.0 * finesse * finesse / (PI * PI)
}

/// Model value at pixel `(c, r)` over `p` in [`AiryParams::to_array`]
/// order. Generic over the scalar so the solver can differentiate it.
pub(crate) fn airy_value<T: RealField>(p: &[T], wavelength: f64, c: f64, r: f64) -> T {
    let dc = ts_na::convert::<f64, T>(c) - p[1].clone();
    let dr = ts_na::convert::<f64, T>(r) - p[2].clone();
    let b = p[0].clone();
    let s = (T::one() + b.clone() * b * (dc.clone() * dc + dr.clone() * dr)).sqrt();
    let phi = T::pi() * p[5].clone() / (ts_na::convert::<f64, T>(wavelength) * s);
    let sn = phi.sin();
    let f = ts_na::convert::<f64, T>(4.0 / (PI * PI)) * p[4].clone() * p[4].clone();
    p[3].clone() + p[6].clone() / (T::one() + f * sn.clone() * sn)
}

#[inline]
pub(crate) fn value(p: &[f64; 7], wavelength: f64, c: f64, r: f64) -> f64 {
    airy_value(p.as_slice(), wavelength, c, r)
}

/// Airy parameters bound to a wavelength and plane shape.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AiryModel {
    pub params: AiryParams,
    pub wavelength: f64,
    /// `(rows, cols)`.
    pub shape: (usize, usize),
}

impl AiryModel {
    pub fn new(params: AiryParams, wavelength: f64, shape: (usize, usize)) -> Self {
        Self {
            params,
            wavelength,
            shape,
        }
    }

    /// Intensity at pixel `(c, r)`.
    pub fn value_at(&self, c: f64, r: f64) -> f64 {
        value(&self.params.to_array(), self.wavelength, c, r)
    }

    /// Rendered plane.
    pub fn render(&self) -> Array2<f64> {
        let p = self.params.to_array();
        Array2::from_shape_fn(self.shape, |(r, c)| {
            value(&p, self.wavelength, c as f64, r as f64)
        })
    }

    /// Interference order `gap / (λ·√(1 + b²·d²))` at each pixel.
    pub fn order_map(&self) -> Array2<f64> {
        let p = &self.params;
        Array2::from_shape_fn(self.shape, |(r, c)| {
            let dc = c as f64 - p.center_col;
            let dr = r as f64 - p.center_row;
            p.gap / (self.wavelength * (1.0 + p.b_ratio * p.b_ratio * (dc * dc + dr * dr)).sqrt())
        })
    }
}
