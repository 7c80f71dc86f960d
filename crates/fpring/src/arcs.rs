//! Separation of a ridge mask into individual ring arcs.

use ndarray::{Array2, ArrayView2};

use crate::finder::FinderConfig;
use crate::geometry::{connected_components, Pixel};

/// One 8-connected ridge fragment that passed the size and lump filters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Arc {
    /// Plane-shaped mask of the fragment.
    pub mask: Array2<u8>,
    /// Estimated ridge thickness in pixels, at least 1.
    pub thickness: f64,
    pub pixel_count: usize,
    /// Fragment pixels in row-major order.
    #[serde(skip)]
    pub pixels: Vec<Pixel>,
}

/// Output of [`separate`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArcSet {
    pub arcs: Vec<Arc>,
    /// Components that were large enough but failed the lump filter.
    pub rejected_lumps: usize,
    /// Final adaptive minimum component size.
    pub min_size: f64,
}

/// Adaptive minimum component size.
///
/// Starts at `⌈min_arc_fraction·area⌉` and decays until every component is
/// large enough or the value drops below `⌈min_arc_floor_fraction·area⌉`.
pub fn adaptive_min_size(sizes: &[usize], area: usize, config: &FinderConfig) -> f64 {
    let floor = (config.min_arc_floor_fraction * area as f64).ceil();
    let mut min_size = (config.min_arc_fraction * area as f64).ceil();
    while !sizes.iter().all(|&s| s as f64 >= min_size) && min_size >= floor {
        min_size *= config.arc_decay_factor;
    }
    min_size
}

fn column_ratio_is_good(prev: usize, n: usize) -> bool {
    let ratio = prev as f64 / n as f64;
    let whole = ratio.round();
    whole == 1.0 || whole == 2.0 || (ratio * 2.0).round() == 1.0
}

/// Lump filter over the per-column pixel counts of a fragment.
///
/// A non-empty column is good when it is the first one, or when the count of
/// the previous non-empty column divided by its own count is close to 1, 2
/// or ½. Ring arcs grow and shrink gradually; blobs do not. Returns the
/// estimated thickness when more than `good_fraction` of the non-empty
/// columns are good. Empty columns count neither way.
pub fn lump_filter(pixels: &[Pixel], good_fraction: f64) -> Option<f64> {
    let (min_c, max_c) = pixels
        .iter()
        .fold((usize::MAX, 0), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
    if min_c > max_c {
        return None;
    }
    let mut counts = vec![0usize; max_c - min_c + 1];
    for p in pixels {
        counts[p.0 - min_c] += 1;
    }

    let mut prev: Option<usize> = None;
    let mut nonempty = 0usize;
    let mut good = 0usize;
    let mut good_pixels = 0usize;
    for &n in counts.iter().filter(|&&n| n > 0) {
        nonempty += 1;
        if prev.map_or(true, |p| column_ratio_is_good(p, n)) {
            good += 1;
            good_pixels += n;
        }
        prev = Some(n);
    }

    if good as f64 / nonempty as f64 <= good_fraction {
        return None;
    }
    Some((good_pixels as f64 / (4 * good) as f64).max(1.0))
}

fn component_mask(dim: (usize, usize), pixels: &[Pixel]) -> Array2<u8> {
    let mut mask = Array2::<u8>::zeros(dim);
    for &(c, r) in pixels {
        mask[(r, c)] = 1;
    }
    mask
}

/// Split `ridge` into arcs.
pub fn separate(ridge: &ArrayView2<u8>, config: &FinderConfig) -> ArcSet {
    let dim = ridge.dim();
    let components = connected_components(ridge);
    let sizes: Vec<usize> = components.iter().map(Vec::len).collect();
    let min_size = adaptive_min_size(&sizes, dim.0 * dim.1, config);

    let mut arcs = Vec::new();
    let mut rejected_lumps = 0usize;
    for mut pixels in components {
        if (pixels.len() as f64) < min_size {
            continue;
        }
        let Some(thickness) = lump_filter(&pixels, config.lump_good_fraction) else {
            rejected_lumps += 1;
            continue;
        };
        pixels.sort_unstable_by_key(|&(c, r)| (r, c));
        arcs.push(Arc {
            mask: component_mask(dim, &pixels),
            thickness,
            pixel_count: pixels.len(),
            pixels,
        });
    }

    tracing::debug!(
        components = sizes.len(),
        min_size,
        arcs = arcs.len(),
        rejected_lumps,
        "arc separation"
    );

    ArcSet {
        arcs,
        rejected_lumps,
        min_size,
    }
}
