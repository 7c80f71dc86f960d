//! Pixel-to-focal-length ratio from two ring radii.
//!
//! Two adjacent rings of orders `p_c` and `p_{c-1}` at radii `r` and
//! `r_{c-1}` pin down `b` through
//!
//! ```text
//! b² = 2·p_{c-1} / (p_c²·(r_{c-1}² − r²) − 2·p_c·r_{c-1}² + r_{c-1}²)
//! ```

/// Estimate `b` from `radii = [r, r_{c-1}]` and `orders = [p_c, p_{c-1}]`.
///
/// Only the first two entries are used. Returns `None` when fewer than two
/// radii are given, the lengths differ, or the denominator is not positive.
pub fn estimate_b_ratio(radii: &[f64], orders: &[i64]) -> Option<f64> {
    if radii.len() < 2 {
        tracing::error!(n = radii.len(), "b-ratio needs at least two radii");
        return None;
    }
    if radii.len() != orders.len() {
        tracing::error!(
            radii = radii.len(),
            orders = orders.len(),
            "b-ratio radii and orders differ in length"
        );
        return None;
    }

    let (r, r1) = (radii[0], radii[1]);
    let (pc, pc1) = (orders[0] as f64, orders[1] as f64);
    let den = pc * pc * (r1 * r1 - r * r) - 2.0 * pc * r1 * r1 + r1 * r1;
    let b2 = 2.0 * pc1 / den;
    let valid = den > 0.0 && b2 > 0.0 && b2.is_finite();
    if !valid {
        tracing::error!(den, b2, "b-ratio is undefined for these radii and orders");
        return None;
    }
    Some(b2.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn known_value() {
        let b = estimate_b_ratio(&[100.0, 200.0], &[800, 801]).unwrap();
        assert_relative_eq!(b, 0.000_289_337_830_557_141_26, max_relative = 1e-14);
    }

    #[test]
    fn extra_entries_are_ignored() {
        let a = estimate_b_ratio(&[100.0, 200.0], &[800, 801]);
        let b = estimate_b_ratio(&[100.0, 200.0, 250.0], &[800, 801, 802]);
        assert_eq!(a, b);
    }

    #[test]
    fn domain_errors_yield_none() {
        assert_eq!(estimate_b_ratio(&[100.0], &[800]), None);
        assert_eq!(estimate_b_ratio(&[100.0, 200.0], &[800]), None);
        assert_eq!(estimate_b_ratio(&[200.0, 100.0], &[800, 801]), None);
        assert_eq!(estimate_b_ratio(&[100.0, 100.0], &[1, 0]), None);
    }
}
