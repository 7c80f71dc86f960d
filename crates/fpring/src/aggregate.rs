//! Merging redundant circle fits into rings and rings into one concentric
//! system.
//!
//! Several arcs of the same fringe produce near-identical fits; they are
//! averaged into one ring. Rings whose centers agree then form a concentric
//! system. Both passes iterate in input order and the first match wins.

use crate::circle::CircleFit;
use crate::geometry::{distance, Point};

/// Averaged fit of one fringe.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ring {
    pub center_col: f64,
    pub center_row: f64,
    pub radius: f64,
    /// Indices into the fit list, in merge order.
    pub fit_indices: Vec<usize>,
}

impl Ring {
    pub fn center(&self) -> Point {
        [self.center_col, self.center_row]
    }
}

/// Concentric rings sharing a common center.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConcentricRings {
    pub center_col: f64,
    pub center_row: f64,
    /// Ring radii, ascending.
    pub radii: Vec<f64>,
    /// Indices into the ring list.
    pub ring_indices: Vec<usize>,
    /// Indices of every fit supporting the system, ascending.
    pub fit_indices: Vec<usize>,
}

impl ConcentricRings {
    pub fn center(&self) -> Point {
        [self.center_col, self.center_row]
    }

    pub fn ring_count(&self) -> usize {
        self.ring_indices.len()
    }
}

/// Rings and the published system of one plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Aggregation {
    pub rings: Vec<Ring>,
    pub system: Option<ConcentricRings>,
    /// Merge distance used for both passes.
    pub merge_distance: f64,
}

fn mean_center(points: impl Iterator<Item = Point>) -> Point {
    let (mut sc, mut sr, mut n) = (0.0, 0.0, 0usize);
    for p in points {
        sc += p[0];
        sr += p[1];
        n += 1;
    }
    if n == 0 {
        return [0.0, 0.0];
    }
    [sc / n as f64, sr / n as f64]
}

/// Group fits into rings. Sentinel fits are skipped.
///
/// Fit `i` joins the first ring whose running mean center lies within `tau`
/// and whose first member's radius differs by less than `tau`.
pub fn merge_fits(fits: &[CircleFit], tau: f64) -> Vec<Ring> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, fit) in fits.iter().enumerate() {
        if fit.sentinel {
            continue;
        }
        let home = groups.iter_mut().find(|g| {
            let center = mean_center(g.iter().map(|&j| fits[j].center()));
            distance(fit.center(), center) < tau && (fit.radius - fits[g[0]].radius).abs() < tau
        });
        match home {
            Some(g) => g.push(i),
            None => groups.push(vec![i]),
        }
    }

    groups
        .into_iter()
        .map(|g| {
            let [center_col, center_row] = mean_center(g.iter().map(|&j| fits[j].center()));
            let radius = g.iter().map(|&j| fits[j].radius).sum::<f64>() / g.len() as f64;
            Ring {
                center_col,
                center_row,
                radius,
                fit_indices: g,
            }
        })
        .collect()
}

/// Group rings into concentric systems; returns ring index lists.
///
/// Ring `k` joins the first system whose running mean center lies within
/// `tau` and which holds none of `k`'s fits.
pub fn merge_rings(rings: &[Ring], tau: f64) -> Vec<Vec<usize>> {
    let mut systems: Vec<Vec<usize>> = Vec::new();
    for (k, ring) in rings.iter().enumerate() {
        let home = systems.iter_mut().find(|s| {
            let center = mean_center(s.iter().map(|&m| rings[m].center()));
            let disjoint = s.iter().all(|&m| {
                rings[m]
                    .fit_indices
                    .iter()
                    .all(|f| !ring.fit_indices.contains(f))
            });
            distance(ring.center(), center) < tau && disjoint
        });
        match home {
            Some(s) => s.push(k),
            None => systems.push(vec![k]),
        }
    }
    systems
}

/// Run both merges and publish the system with the most rings (earliest
/// on ties).
pub fn aggregate(fits: &[CircleFit], dim: (usize, usize), merge_distance_fraction: f64) -> Aggregation {
    let tau = merge_distance_fraction * dim.0.min(dim.1) as f64;
    let rings = merge_fits(fits, tau);
    let systems = merge_rings(&rings, tau);

    let mut best: Option<&Vec<usize>> = None;
    for s in &systems {
        if best.map_or(true, |b| s.len() > b.len()) {
            best = Some(s);
        }
    }

    let system = best.map(|members| {
        let [center_col, center_row] = mean_center(members.iter().map(|&m| rings[m].center()));
        let mut radii: Vec<f64> = members.iter().map(|&m| rings[m].radius).collect();
        radii.sort_by(f64::total_cmp);
        let mut fit_indices: Vec<usize> = members
            .iter()
            .flat_map(|&m| rings[m].fit_indices.iter().copied())
            .collect();
        fit_indices.sort_unstable();
        ConcentricRings {
            center_col,
            center_row,
            radii,
            ring_indices: members.clone(),
            fit_indices,
        }
    });

    tracing::debug!(
        fits = fits.len(),
        rings = rings.len(),
        systems = systems.len(),
        best = system.as_ref().map_or(0, ConcentricRings::ring_count),
        tau,
        "ring aggregation"
    );

    Aggregation {
        rings,
        system,
        merge_distance: tau,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fit(c: f64, r: f64, radius: f64) -> CircleFit {
        CircleFit {
            center_col: c,
            center_row: r,
            radius,
            thickness: 1.0,
            mismatch: Some(0.0),
            sentinel: false,
        }
    }

    #[test]
    fn redundant_fits_collapse_into_rings() {
        let fits = [
            fit(50.0, 50.0, 20.0),
            fit(51.0, 49.0, 21.0),
            fit(50.0, 50.0, 40.0),
            fit(49.0, 51.0, 41.0),
        ];
        let rings = merge_fits(&fits, 10.0);
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0].fit_indices, vec![0, 1]);
        assert_eq!(rings[1].fit_indices, vec![2, 3]);
        assert_relative_eq!(rings[0].radius, 20.5);
        assert_relative_eq!(rings[1].center_col, 49.5);
    }

    #[test]
    fn sentinels_are_not_aggregated() {
        let fits = [CircleFit::SENTINEL, fit(50.0, 50.0, 20.0), CircleFit::SENTINEL];
        let rings = merge_fits(&fits, 10.0);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].fit_indices, vec![1]);
    }

    #[test]
    fn most_populated_system_wins() {
        let fits = [
            fit(10.0, 10.0, 5.0),
            fit(80.0, 80.0, 10.0),
            fit(80.0, 81.0, 30.0),
            fit(81.0, 80.0, 50.0),
        ];
        let agg = aggregate(&fits, (100, 100), 0.1);
        assert_relative_eq!(agg.merge_distance, 10.0);
        let system = agg.system.unwrap();
        assert_eq!(system.ring_count(), 3);
        assert_eq!(system.radii, vec![10.0, 30.0, 50.0]);
        assert_eq!(system.fit_indices, vec![1, 2, 3]);
        assert!(distance(system.center(), [80.333, 80.333]) < 0.01);
    }

    #[test]
    fn ties_keep_the_earliest_system() {
        let fits = [fit(10.0, 10.0, 5.0), fit(80.0, 80.0, 10.0)];
        let agg = aggregate(&fits, (100, 100), 0.1);
        assert_eq!(agg.system.unwrap().ring_indices, vec![0]);
    }

    #[test]
    fn supporting_rings_share_no_fit() {
        let fits: Vec<CircleFit> = (0..12)
            .map(|i| fit(60.0 + (i % 3) as f64, 60.0, 8.0 + 6.0 * (i / 2) as f64))
            .collect();
        let agg = aggregate(&fits, (120, 120), 0.1);
        let system = agg.system.unwrap();
        let mut seen = std::collections::HashSet::new();
        for &k in &system.ring_indices {
            for &f in &agg.rings[k].fit_indices {
                assert!(seen.insert(f));
            }
        }
        assert!(system.radii.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn no_fits_no_system() {
        let agg = aggregate(&[], (64, 64), 0.1);
        assert!(agg.rings.is_empty());
        assert!(agg.system.is_none());
    }
}
