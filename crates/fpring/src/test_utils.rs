//! Synthetic interferogram planes shared by the unit tests.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::airy::{AiryModel, AiryParams, H_ALPHA_UM};

/// Airy plane with continuum 1, intensity 100 and a 250 µm gap at Hα.
pub(crate) fn airy_plane(
    rows: usize,
    cols: usize,
    center: [f64; 2],
    b_ratio: f64,
    finesse: f64,
) -> Array2<f64> {
    let params = AiryParams {
        b_ratio,
        center_col: center[0],
        center_row: center[1],
        continuum: 1.0,
        finesse,
        gap: 250.0,
        intensity: 100.0,
    };
    AiryModel::new(params, H_ALPHA_UM, (rows, cols)).render()
}

/// Add uniform noise in `[-amplitude, amplitude)` from a seeded generator.
pub(crate) fn add_noise(plane: &mut Array2<f64>, amplitude: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    plane.mapv_inplace(|v| v + rng.gen_range(-amplitude..amplitude));
}
