//! Plane orchestration: segment → separate → construct → fit → aggregate.

use std::time::{Duration, Instant};

use ndarray::ArrayView2;
use tracing::Dispatch;

use super::{FinderConfig, RingFinderResult};
use crate::aggregate::aggregate;
use crate::arcs::{separate, Arc};
use crate::circle::{fit_circle, CircleFit};
use crate::construct::{construct, Construction};
use crate::cube::Cube;
use crate::error::{FpError, FpResult};
use crate::ridge::segment;
use crate::solver::SolverError;

/// Ring finder over interferogram cubes.
///
/// Holds only configuration; every call to [`RingFinder::find`] is
/// independent and runs on the caller's thread.
#[derive(Debug, Clone, Default)]
pub struct RingFinder {
    config: FinderConfig,
    dispatch: Option<Dispatch>,
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn deadline_after(budget: Option<Duration>) -> Option<Instant> {
    budget.map(|b| Instant::now() + b)
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl RingFinder {
    pub fn new(config: FinderConfig) -> Self {
        Self {
            config,
            dispatch: None,
        }
    }

    /// Route this finder's log events to `dispatch` instead of the ambient
    /// subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Find the concentric ring system of `cube`.
    ///
    /// With `Some(plane)` that plane is processed and its record returned,
    /// with or without a system. With `None` the planes are scanned in order,
    /// planes without a system are skipped, and the scan stops at the first
    /// plane with at least `min_rings` rings; the best plane seen (most
    /// rings, earliest on ties) is returned.
    ///
    /// A plane whose budget runs out is skipped, so `Some(plane)` can also
    /// yield `None`.
    pub fn find(
        &self,
        cube: &Cube,
        plane: Option<usize>,
        min_rings: usize,
    ) -> FpResult<Option<RingFinderResult>> {
        match &self.dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || self.find_inner(cube, plane, min_rings))
            }
            None => self.find_inner(cube, plane, min_rings),
        }
    }

    fn find_inner(
        &self,
        cube: &Cube,
        plane: Option<usize>,
        min_rings: usize,
    ) -> FpResult<Option<RingFinderResult>> {
        if let Some(index) = plane {
            let data = cube.plane(index)?;
            return Ok(self.process_plane(&data, index));
        }

        let mut best: Option<RingFinderResult> = None;
        for index in 0..cube.planes() {
            let data = cube.plane(index)?;
            let Some(result) = self.process_plane(&data, index) else {
                continue;
            };
            let rings = result.ring_count();
            if rings == 0 {
                tracing::debug!(plane = index, "no concentric system");
                continue;
            }
            if best.as_ref().map_or(true, |b| rings > b.ring_count()) {
                best = Some(result);
            }
            if rings >= min_rings {
                tracing::info!(plane = index, rings, min_rings, "ring target reached");
                break;
            }
        }

        match &best {
            Some(b) => tracing::info!(plane = b.plane, rings = b.ring_count(), "best plane"),
            None => tracing::info!(planes = cube.planes(), "no plane holds a ring system"),
        }
        Ok(best)
    }

    /// Run every stage on one plane. Returns `None` when the plane budget or
    /// a fit budget expires.
    pub fn process_plane(&self, plane: &ArrayView2<f64>, index: usize) -> Option<RingFinderResult> {
        let config = &self.config;
        let plane_deadline = deadline_after(config.plane_budget);
        let dim = plane.dim();

        let seg = segment(plane, config);
        let arc_set = separate(&seg.ridge.view(), config);

        let mut constructions = Vec::with_capacity(arc_set.arcs.len());
        let mut fits = Vec::with_capacity(arc_set.arcs.len());
        let mut warnings = Vec::new();
        for (i, arc) in arc_set.arcs.iter().enumerate() {
            if expired(plane_deadline) {
                tracing::warn!(plane = index, arc = i, "plane budget exceeded, skipping plane");
                return None;
            }
            let fit_deadline = earliest(plane_deadline, deadline_after(config.fit_budget));
            let Some((construction, fit)) = self.fit_arc(arc, i, dim, fit_deadline, &mut warnings)
            else {
                tracing::warn!(plane = index, arc = i, "fit budget exceeded, skipping plane");
                return None;
            };
            constructions.push(construction);
            fits.push(fit);
        }
        if expired(plane_deadline) {
            tracing::warn!(plane = index, "plane budget exceeded, skipping plane");
            return None;
        }

        let agg = aggregate(&fits, dim, config.merge_distance_fraction);
        tracing::info!(
            plane = index,
            arcs = arc_set.arcs.len(),
            sentinels = fits.iter().filter(|f| f.sentinel).count(),
            rings = agg.rings.len(),
            system_rings = agg.system.as_ref().map_or(0, |s| s.ring_count()),
            "plane processed"
        );

        Some(RingFinderResult {
            plane: index,
            gradient: seg.gradient,
            upper_mask: seg.upper_mask,
            lower_mask: seg.lower_mask,
            upper_percentile: seg.upper_percentile,
            lower_percentile: seg.lower_percentile,
            ridge: seg.ridge,
            arcs: arc_set.arcs,
            rejected_lumps: arc_set.rejected_lumps,
            constructions,
            fits,
            rings: agg.rings,
            system: agg.system,
            warnings,
        })
    }

    /// Construct and refine one arc, falling back to the sentinel fit.
    /// Returns `None` when the fit ran out of time.
    fn fit_arc(
        &self,
        arc: &Arc,
        i: usize,
        dim: (usize, usize),
        deadline: Option<Instant>,
        warnings: &mut Vec<String>,
    ) -> Option<(Option<Construction>, CircleFit)> {
        let config = &self.config;
        let construction = match construct(
            &arc.pixels,
            dim,
            config.arc_sample_cap,
            config.max_construction_attempts,
        ) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(arc = i, pixels = arc.pixel_count, error = %e, "center construction failed");
                warnings.push(format!("arc {i}: {e}"));
                return Some((None, CircleFit::SENTINEL));
            }
        };

        let initial = [
            construction.center[0],
            construction.center[1],
            construction.radius,
            arc.thickness,
        ];
        let fit = match fit_circle(&arc.mask.view(), initial, &config.circle_fit, deadline) {
            Ok(fit) => fit,
            Err(FpError::CircleFit {
                source: SolverError::DeadlineExceeded { .. },
                ..
            }) => return None,
            Err(e) => {
                tracing::error!(arc = i, error = %e, "circle fit failed");
                warnings.push(format!("arc {i}: {e}"));
                CircleFit::SENTINEL
            }
        };
        Some((Some(construction), fit))
    }
}
