//! fpring: ring detection and Airy-geometry fitting for Fabry-Pérot
//! interferometer cubes.
//!
//! A cube is a stack of monochromatic interferogram planes. The ring finder
//! locates the concentric fringe system of a plane:
//!
//! 1. **Ridge** – percentile masks of the row gradient and the ridgeness
//!    predicate mark fringe centerlines.
//! 2. **Arcs** – the ridge splits into 8-connected fragments; an adaptive
//!    size filter and a lump filter keep ring-like ones.
//! 3. **Construction** – a ruler-and-square construction gives each arc an
//!    initial center and radius.
//! 4. **Circle fit** – bounded Levenberg–Marquardt refinement against the
//!    arc mask.
//! 5. **Aggregation** – redundant fits merge into rings, concentric rings
//!    into one system.
//!
//! The system seeds [`fit_airy`], which fits the full Airy transmission
//! model (pixel scale, center, levels, finesse, gap) to a plane.
//! [`estimate_b_ratio`] converts two ring radii and their interference
//! orders into the initial pixel scale.
//!
//! # Public API
//! - [`RingFinder`], [`FinderConfig`] and [`RingFinderResult`]
//! - [`fit_airy`] with [`AiryFitInput`] / [`AiryFit`], and the task forms
//!   [`AiryFitTask`] / [`CircleFitTask`]
//! - [`Cube`], [`FpError`], [`array_hash`]
//!
//! The stage modules are public for callers that want a single stage.

pub mod aggregate;
pub mod airy;
pub mod arcs;
mod bratio;
pub mod circle;
pub mod construct;
mod cube;
mod error;
mod finder;
pub mod geometry;
mod hash;
pub mod percentile;
pub mod ridge;
pub mod solver;
mod task;

#[cfg(test)]
pub(crate) mod test_utils;

pub use aggregate::{Aggregation, ConcentricRings, Ring};
pub use airy::{
    fit_airy, AiryBounds, AiryFit, AiryFitInput, AiryFitTask, AiryModel, AiryParam, AiryParams,
    ParInfo, H_ALPHA_UM,
};
pub use arcs::Arc;
pub use bratio::estimate_b_ratio;
pub use circle::{fit_circle, render_circle, CircleFit, CircleFitConfig, CircleFitTask};
pub use cube::Cube;
pub use error::{FpError, FpResult};
pub use finder::{FinderConfig, RingFinder, RingFinderResult};
pub use hash::array_hash;
pub use solver::{LmConfig, SolverError};
pub use task::FitTask;
