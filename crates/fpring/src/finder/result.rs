use ndarray::Array2;

use crate::aggregate::{ConcentricRings, Ring};
use crate::arcs::Arc;
use crate::circle::CircleFit;
use crate::construct::Construction;
use crate::geometry::Point;
use crate::ridge::GradientField;

/// Everything the finder derived from one plane.
///
/// `arcs`, `constructions` and `fits` are index-aligned: entry `i` of each
/// describes the same ridge fragment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RingFinderResult {
    /// Index of the plane in the cube.
    pub plane: usize,
    pub gradient: GradientField,
    pub upper_mask: Array2<u8>,
    pub lower_mask: Array2<u8>,
    pub upper_percentile: u32,
    pub lower_percentile: u32,
    pub ridge: Array2<u8>,
    pub arcs: Vec<Arc>,
    /// Components dropped by the lump filter.
    pub rejected_lumps: usize,
    /// Center construction per arc; `None` where it degenerated.
    pub constructions: Vec<Option<Construction>>,
    /// Refined circle per arc; sentinel where the construction or the fit
    /// failed.
    pub fits: Vec<CircleFit>,
    pub rings: Vec<Ring>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<ConcentricRings>,
    /// Recovered per-arc failures, in arc order.
    pub warnings: Vec<String>,
}

impl RingFinderResult {
    /// Rings in the concentric system, 0 without one.
    pub fn ring_count(&self) -> usize {
        self.system.as_ref().map_or(0, ConcentricRings::ring_count)
    }

    pub fn center(&self) -> Option<Point> {
        self.system.as_ref().map(ConcentricRings::center)
    }

    /// `(rows, cols)` of the plane.
    pub fn plane_dim(&self) -> (usize, usize) {
        self.ridge.dim()
    }

    /// Number of fits that fell back to the sentinel.
    pub fn sentinel_count(&self) -> usize {
        self.fits.iter().filter(|f| f.sentinel).count()
    }
}
