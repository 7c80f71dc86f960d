use std::path::Path;
use std::time::Duration;

use crate::circle::CircleFitConfig;

/// Ring-finder tuning.
///
/// Size-like fields are fractions of the plane area or of its shorter side,
/// so one configuration serves every detector format.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Starting minimum arc size as a fraction of the plane area.
    pub min_arc_fraction: f64,
    /// Factor applied to the minimum arc size on each decay step.
    pub arc_decay_factor: f64,
    /// Floor of the minimum arc size as a fraction of the plane area.
    pub min_arc_floor_fraction: f64,
    /// Upper and lower mask pixels both needed around a ridge pixel.
    pub ridge_neighbor_threshold: usize,
    /// Half-size of the ridgeness neighborhood, in pixels.
    pub ridge_distance: usize,
    /// Target coverage of the upper gradient mask.
    pub upper_fraction: f64,
    /// Fraction of good columns needed to pass the lump filter.
    pub lump_good_fraction: f64,
    /// Arc pixels kept for the center construction.
    pub arc_sample_cap: usize,
    /// Chords tried before a construction is declared degenerate.
    pub max_construction_attempts: usize,
    /// Merge distance as a fraction of `min(rows, cols)`.
    pub merge_distance_fraction: f64,
    pub circle_fit: CircleFitConfig,
    /// Wall-clock budget for one plane. Checked between arcs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plane_budget: Option<Duration>,
    /// Wall-clock budget for one circle fit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_budget: Option<Duration>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            min_arc_fraction: 0.1,
            arc_decay_factor: 0.9,
            min_arc_floor_fraction: 0.001,
            ridge_neighbor_threshold: 6,
            ridge_distance: 2,
            upper_fraction: 0.1,
            lump_good_fraction: 0.9,
            arc_sample_cap: 5000,
            max_construction_attempts: 10,
            merge_distance_fraction: 0.1,
            circle_fit: CircleFitConfig::default(),
            plane_budget: None,
            fit_budget: None,
        }
    }
}

impl FinderConfig {
    /// Load a configuration from JSON; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data).map_err(Into::into)
    }

    pub fn from_json_str(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
