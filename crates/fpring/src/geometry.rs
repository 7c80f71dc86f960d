//! Pixel-grid geometry: distances, neighborhoods, connected regions and
//! closed-form line algebra.
//!
//! Pixel positions are `(col, row)` pairs; float points are `[col, row]`.

use ndarray::{Array2, ArrayView2};

/// Integer pixel position `(col, row)`.
pub type Pixel = (usize, usize);

/// Float point `[col, row]`.
pub type Point = [f64; 2];

/// Euclidean distance between two points.
#[inline]
pub fn distance(p: Point, q: Point) -> f64 {
    (p[0] - q[0]).hypot(p[1] - q[1])
}

/// Center of a pixel as a float point.
#[inline]
pub fn to_point(p: Pixel) -> Point {
    [p.0 as f64, p.1 as f64]
}

/// Midpoint of two points.
#[inline]
pub fn midpoint(p: Point, q: Point) -> Point {
    [0.5 * (p[0] + q[0]), 0.5 * (p[1] + q[1])]
}

/// In-bounds positions within Chebyshev distance `d` of `pos`, excluding
/// `pos` itself, in row-major order.
///
/// `dim` is the array shape `(rows, cols)` as returned by `ndarray`.
pub fn neighbors(pos: Pixel, dim: (usize, usize), d: usize) -> Vec<Pixel> {
    let (rows, cols) = dim;
    let (c, r) = pos;
    let r0 = r.saturating_sub(d);
    let r1 = (r + d).min(rows.saturating_sub(1));
    let c0 = c.saturating_sub(d);
    let c1 = (c + d).min(cols.saturating_sub(1));
    let mut out = Vec::with_capacity((2 * d + 1) * (2 * d + 1));
    if rows == 0 || cols == 0 {
        return out;
    }
    for rr in r0..=r1 {
        for cc in c0..=c1 {
            if (cc, rr) != pos {
                out.push((cc, rr));
            }
        }
    }
    out
}

/// Every position 8-connected to `seed` through pixels equal to `array[seed]`.
pub fn connected_points<T: PartialEq>(seed: Pixel, array: &ArrayView2<T>) -> Vec<Pixel> {
    let mut visited = Array2::from_elem(array.dim(), false);
    connected_region(seed, array, &mut visited)
}

/// Flood fill from `seed` that skips and marks positions in `visited`.
///
/// Sharing `visited` across calls enumerates disjoint regions in one sweep.
/// Returns an empty list when `seed` was already visited.
pub fn connected_region<T: PartialEq>(
    seed: Pixel,
    array: &ArrayView2<T>,
    visited: &mut Array2<bool>,
) -> Vec<Pixel> {
    let (c, r) = seed;
    if visited[(r, c)] {
        return Vec::new();
    }
    let value = &array[(r, c)];
    let dim = array.dim();
    let mut region = Vec::new();
    let mut stack = vec![seed];
    visited[(r, c)] = true;
    while let Some(p) = stack.pop() {
        region.push(p);
        for (nc, nr) in neighbors(p, dim, 1) {
            if !visited[(nr, nc)] && array[(nr, nc)] == *value {
                visited[(nr, nc)] = true;
                stack.push((nc, nr));
            }
        }
    }
    region
}

/// 8-connected components of the non-zero pixels of `mask`, seeded in
/// row-major order.
pub fn connected_components(mask: &ArrayView2<u8>) -> Vec<Vec<Pixel>> {
    let mut visited = Array2::from_elem(mask.dim(), false);
    let mut components = Vec::new();
    for ((r, c), &v) in mask.indexed_iter() {
        if v == 0 || visited[(r, c)] {
            continue;
        }
        components.push(connected_region((c, r), mask, &mut visited));
    }
    components
}

/// Infinite line `a·col + b·row = c`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Line {
    /// Line through two distinct points; `None` when they coincide.
    pub fn through(p: Point, q: Point) -> Option<Self> {
        let a = q[1] - p[1];
        let b = p[0] - q[0];
        if a == 0.0 && b == 0.0 {
            return None;
        }
        Some(Self {
            a,
            b,
            c: a * p[0] + b * p[1],
        })
    }

    /// Line perpendicular to `self` passing through `p`.
    pub fn perpendicular_through(&self, p: Point) -> Self {
        let a = -self.b;
        let b = self.a;
        Self {
            a,
            b,
            c: a * p[0] + b * p[1],
        }
    }

    /// Intersection point, `None` for parallel (or coincident) lines.
    pub fn intersection(&self, other: &Line) -> Option<Point> {
        let det = self.a * other.b - other.a * self.b;
        let scale = self.a.hypot(self.b) * other.a.hypot(other.b);
        if det.abs() <= 1e-12 * scale {
            return None;
        }
        Some([
            (self.c * other.b - other.c * self.b) / det,
            (self.a * other.c - other.a * self.c) / det,
        ])
    }

    /// Perpendicular distance from `p` to the line.
    pub fn distance_to(&self, p: Point) -> f64 {
        (self.a * p[0] + self.b * p[1] - self.c).abs() / self.a.hypot(self.b)
    }

    /// True when the line is closer to vertical than horizontal.
    pub fn is_steep(&self) -> bool {
        self.a.abs() > self.b.abs()
    }

    /// Row at column `col`; `None` for a vertical line.
    pub fn row_at(&self, col: f64) -> Option<f64> {
        (self.b != 0.0).then(|| (self.c - self.a * col) / self.b)
    }

    /// Column at row `row`; `None` for a horizontal line.
    pub fn col_at(&self, row: f64) -> Option<f64> {
        (self.a != 0.0).then(|| (self.c - self.b * row) / self.a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    #[test]
    fn neighbors_of_interior_pixel() {
        let got: HashSet<Pixel> = neighbors((10, 20), (30, 30), 1).into_iter().collect();
        let want: HashSet<Pixel> = [
            (9, 19),
            (9, 20),
            (9, 21),
            (10, 19),
            (10, 21),
            (11, 19),
            (11, 20),
            (11, 21),
        ]
        .into_iter()
        .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn neighbors_cardinality_shrinks_at_borders() {
        for d in 1..4 {
            let full = neighbors((10, 10), (30, 30), d);
            assert_eq!(full.len(), (2 * d + 1) * (2 * d + 1) - 1);
            assert!(!full.contains(&(10, 10)));
        }
        let corner = neighbors((0, 0), (30, 30), 2);
        assert_eq!(corner.len(), 8);
        assert!(!corner.contains(&(0, 0)));
        let edge = neighbors((29, 5), (30, 30), 1);
        assert_eq!(edge.len(), 5);
    }

    #[test]
    fn connected_points_follow_equal_values() {
        let mut a = Array2::<u8>::zeros((6, 6));
        a[(1, 1)] = 1;
        a[(2, 2)] = 1; // diagonal link
        a[(2, 3)] = 1;
        a[(5, 5)] = 1; // separate island
        let mut region = connected_points((1, 1), &a.view());
        region.sort();
        assert_eq!(region, vec![(1, 1), (2, 2), (3, 2)]);

        // Seeding on background floods the zero region instead.
        let zeros = connected_points((0, 0), &a.view());
        assert_eq!(zeros.len(), 36 - 4);
    }

    #[test]
    fn connected_region_shares_visited_mask() {
        let mut a = Array2::<u8>::zeros((4, 4));
        a[(0, 0)] = 1;
        a[(0, 1)] = 1;
        let mut visited = Array2::from_elem(a.dim(), false);
        let first = connected_region((0, 0), &a.view(), &mut visited);
        assert_eq!(first.len(), 2);
        assert!(connected_region((1, 0), &a.view(), &mut visited).is_empty());
    }

    #[test]
    fn components_are_enumerated_row_major() {
        let mut a = Array2::<u8>::zeros((5, 5));
        a[(0, 4)] = 1;
        a[(3, 0)] = 1;
        a[(4, 1)] = 1;
        let comps = connected_components(&a.view());
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0], vec![(4, 0)]);
        assert_eq!(comps[1].len(), 2);
    }

    #[test]
    fn perpendicular_bisector_meets_at_circle_center() {
        // Two chords of the circle centered at (3, 4) with radius 5.
        let p = [8.0, 4.0];
        let q = [3.0, 9.0];
        let s = [-2.0, 4.0];
        let l1 = Line::through(p, q).unwrap();
        let l2 = Line::through(q, s).unwrap();
        let b1 = l1.perpendicular_through(midpoint(p, q));
        let b2 = l2.perpendicular_through(midpoint(q, s));
        let c = b1.intersection(&b2).unwrap();
        assert_relative_eq!(c[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(c[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let l1 = Line::through([0.0, 0.0], [1.0, 1.0]).unwrap();
        let l2 = Line::through([0.0, 1.0], [1.0, 2.0]).unwrap();
        assert!(l1.intersection(&l2).is_none());
        assert!(Line::through([1.0, 1.0], [1.0, 1.0]).is_none());
    }

    #[test]
    fn distance_to_line() {
        let l = Line::through([0.0, 0.0], [10.0, 0.0]).unwrap();
        assert_relative_eq!(l.distance_to([3.0, 4.0]), 4.0);
        assert!(!l.is_steep());
        assert_relative_eq!(l.row_at(7.0).unwrap(), 0.0);
        assert!(l.col_at(0.0).is_none());
    }
}
