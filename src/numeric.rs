//! Numerical stability helpers
//!
//! Every probability or bounded score produced by the models passes through
//! one of these before it is stored:
//! - non-finite values are replaced (nearest bound for ±∞, a fallback for NaN)
//! - finite values are clamped into their valid range

/// Smallest denominator treated as non-zero.
pub const EPSILON: f64 = 1e-10;

/// Clamp `value` into `[lo, hi]`.
///
/// `+∞` maps to `hi`, `-∞` to `lo`; NaN has no nearest bound and maps to
/// `fallback` (itself clamped).
pub fn clamp_finite(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        tracing::debug!(lo, hi, fallback, "NaN replaced by fallback");
        return fallback.clamp(lo, hi);
    }
    if value.is_infinite() {
        tracing::debug!(lo, hi, "infinite value clamped to bound");
        return if value > 0.0 { hi } else { lo };
    }
    value.clamp(lo, hi)
}

/// Clamp a probability into `[0, 1]`, NaN → `fallback`.
pub fn sanitize_probability(value: f64, fallback: f64) -> f64 {
    clamp_finite(value, 0.0, 1.0, fallback)
}

/// `num / den`, or `fallback` when the denominator is too small or the
/// result is not finite.
pub fn safe_ratio(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() < EPSILON {
        return fallback;
    }
    let ratio = num / den;
    if ratio.is_finite() {
        ratio
    } else {
        fallback
    }
}

/// Logistic function, saturating instead of overflowing.
pub fn sigmoid(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Standard normal CDF via the Abramowitz–Stegun 7.1.26 erf approximation
/// (absolute error < 1.5e-7).
pub fn standard_normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    let z = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * z);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-z * z).exp();
    let cdf = if x >= 0.0 {
        0.5 * (1.0 + erf)
    } else {
        0.5 * (1.0 - erf)
    };
    cdf.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_finite_bounds() {
        assert_eq!(clamp_finite(f64::INFINITY, -3.0, 3.0, 0.0), 3.0);
        assert_eq!(clamp_finite(f64::NEG_INFINITY, -3.0, 3.0, 0.0), -3.0);
        assert_eq!(clamp_finite(f64::NAN, -3.0, 3.0, 0.0), 0.0);
        assert_eq!(clamp_finite(7.5, -3.0, 3.0, 0.0), 3.0);
        assert_eq!(clamp_finite(1.25, -3.0, 3.0, 0.0), 1.25);
    }

    #[test]
    fn test_safe_ratio() {
        assert_eq!(safe_ratio(1.0, 0.0, 0.4), 0.4);
        assert_eq!(safe_ratio(1.0, 4.0, 0.4), 0.25);
    }

    #[test]
    fn test_sigmoid_extremes() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn test_standard_normal_cdf() {
        assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((standard_normal_cdf(1.0) - 0.841_344_7).abs() < 1e-5);
        assert!((standard_normal_cdf(-1.96) - 0.024_997_9).abs() < 1e-5);
        assert!(standard_normal_cdf(10.0) <= 1.0);
    }
}
