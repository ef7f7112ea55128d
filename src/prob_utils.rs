#![allow(dead_code)]

use std::iter::Sum;

use num::{Float, NumCast};

pub fn error_prob_to_phred(prob: f64) -> f64 {
    -10f64 * prob.log10().max(f64::MIN_10_EXP as f64)
}

pub fn ln_error_prob_to_phred(ln_prob: f64) -> f64 {
    -10f64 * (ln_prob / std::f64::consts::LN_10).max(f64::MIN_10_EXP as f64)
}

pub fn ln_error_prob_to_qphred(ln_prob: f64) -> i32 {
    ln_error_prob_to_phred(ln_prob).round() as i32
}

/// Convert a phred-scaled quality to the natural log of the error probability
///
pub fn phred_to_ln_error_prob(phred: f64) -> f64 {
    -phred * std::f64::consts::LN_10 / 10f64
}

/// Standardize ln-transformed unnormalized prob distro input
///
/// Returns the index of the most probable component
///
pub fn normalize_ln_distro<F: Float>(x: &mut [F]) -> Option<usize> {
    if x.is_empty() {
        return None;
    }

    let mut max_index = 0;
    let mut max_p = *x.first().unwrap();
    for (index, p) in x.iter().skip(1).enumerate() {
        if *p > max_p {
            max_p = *p;
            max_index = index + 1;
        }
    }

    let mut sum = NumCast::from(0).unwrap();
    for p in x.iter_mut() {
        *p = (*p - max_p).exp();
        sum = sum + *p;
    }

    for p in x.iter_mut() {
        *p = *p / sum;
    }

    Some(max_index)
}

/// Stable ln(sum(exp(x))) over an unnormalized ln-space distro
///
pub fn ln_sum_exp(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + x.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Stable pairwise version of ln_sum_exp
///
pub fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Get the complement of pdf[index] from a normalized prob distro
///
/// As pdf[index] approaches 1, computing the complement as 1 - pdf[index] starts to significantly
/// degrade precision. Instead the value is found by summing the rest of the pdf.
///
pub fn get_complement_prob<F: Float + Sum<F>>(pdf: &[F], index: usize) -> F {
    pdf.iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, p)| *p)
        .sum()
}

/// Natural log of the Poisson survival function P(X >= k) for rate mu
///
/// The sum runs over the complement CDF terms, accumulated in ln space for stability at the
/// small tail probabilities seen in the read misalignment model.
///
pub fn ln_poisson_sf(k: u32, mu: f64) -> f64 {
    if k == 0 {
        return 0.0;
    }
    // P(X >= k) = 1 - sum_{i<k} e^-mu mu^i / i!
    let mut ln_terms = Vec::with_capacity(k as usize);
    let mut ln_fact = 0f64;
    for i in 0..k {
        if i > 0 {
            ln_fact += (i as f64).ln();
        }
        ln_terms.push(-mu + (i as f64) * mu.ln() - ln_fact);
    }
    let ln_cdf = ln_sum_exp(&ln_terms);
    if ln_cdf >= 0.0 {
        f64::NEG_INFINITY
    } else {
        (-ln_cdf.exp()).ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_error_prob_to_qphred() {
        let q = ln_error_prob_to_qphred(0.001f64.ln());
        assert_eq!(q, 30);
    }

    #[test]
    fn test_phred_round_trip() {
        let ln_prob = phred_to_ln_error_prob(20.0);
        approx::assert_ulps_eq!(ln_prob.exp(), 0.01, max_ulps = 4);
    }

    #[test]
    fn test_normalize_ln_distro() {
        let x = [0.001, 0.001, 0.002, 0.001];
        let mut x = x.into_iter().map(|x: f64| x.ln()).collect::<Vec<_>>();

        let max_index = normalize_ln_distro(&mut x);
        assert_eq!(max_index, Some(2));
        approx::assert_ulps_eq!(x[0], 0.2, max_ulps = 4);
        approx::assert_ulps_eq!(x[2], 0.4, max_ulps = 4);
    }

    #[test]
    fn test_get_complement_prob() {
        let x: [f32; 3] = [0.9999999, 0.00000005, 0.00000005];
        let x0c = get_complement_prob(&x, 0);
        approx::assert_ulps_eq!(x0c, 0.0000001, max_ulps = 4);
    }

    #[test]
    fn test_ln_sum_exp() {
        let x = [0.25f64.ln(), 0.25f64.ln(), 0.5f64.ln()];
        approx::assert_ulps_eq!(ln_sum_exp(&x), 0.0, max_ulps = 4);
        assert_eq!(ln_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_ln_poisson_sf() {
        // P(X >= 1) with mu=1 is 1 - e^-1
        let expected = (1.0 - (-1.0f64).exp()).ln();
        approx::assert_ulps_eq!(ln_poisson_sf(1, 1.0), expected, max_ulps = 10);
        assert_eq!(ln_poisson_sf(0, 1.0), 0.0);
    }
}
