//! Airy-function model of the etalon transmission and its fitter.
//!
//! The fitter is seeded with the concentric geometry found by the ring
//! finder and a `b` estimate from [`crate::bratio`]; continuum and
//! intensity are guessed from the data percentiles.

mod fit;
mod model;

pub use fit::{fit_airy, initial_params, AiryBounds, AiryFit, AiryFitInput, AiryFitTask, ParInfo};
pub use model::{coefficient_of_finesse, AiryModel, AiryParam, AiryParams, H_ALPHA_UM};
