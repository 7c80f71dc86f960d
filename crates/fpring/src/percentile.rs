//! Percentile helpers.
//!
//! Percentiles use linear interpolation between the two closest ranks, so
//! `percentile(v, 0)` is the minimum and `percentile(v, 100)` the maximum.

/// Sorted copy of a sample supporting repeated percentile queries.
#[derive(Debug, Clone)]
pub struct Percentiles {
    sorted: Vec<f64>,
}

impl Percentiles {
    /// Sort a copy of `values`. Non-finite entries are dropped.
    pub fn new<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted }
    }

    /// Number of finite samples.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// True when no finite sample was supplied.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Value at percentile `p` in `[0, 100]`; 0.0 for an empty sample.
    pub fn at(&self, p: f64) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return 0.0;
        }
        let rank = (n - 1) as f64 * (p.clamp(0.0, 100.0) / 100.0);
        let lo = rank.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = rank - lo as f64;
        self.sorted[lo] + (self.sorted[hi] - self.sorted[lo]) * frac
    }

    /// Fraction of samples strictly greater than `threshold`.
    pub fn fraction_above(&self, threshold: f64) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        let n_le = self.sorted.partition_point(|&v| v <= threshold);
        (self.sorted.len() - n_le) as f64 / self.sorted.len() as f64
    }

    /// Smallest integer percentile in `[1, 99]` whose value is positive,
    /// or 1 when there is none.
    pub fn lowest_nonnull(&self) -> u32 {
        (1..=99u32)
            .find(|&p| self.at(p as f64) > 0.0)
            .unwrap_or(1)
    }
}

/// Percentile `p` of `values` (linear interpolation).
pub fn percentile<I>(values: I, p: f64) -> f64
where
    I: IntoIterator<Item = f64>,
{
    Percentiles::new(values).at(p)
}

/// Smallest integer percentile in `[1, 99]` with a positive value; 1 if none.
pub fn lowest_nonnull_percentile<I>(values: I) -> u32
where
    I: IntoIterator<Item = f64>,
{
    Percentiles::new(values).lowest_nonnull()
}
