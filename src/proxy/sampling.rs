//! Latency-weighted proxy sampling
//!
//! Each candidate gets weight `1 / latency`, normalized over the candidate
//! set, and one candidate is drawn by walking the cumulative distribution.

/// Floor applied to latencies before inverting them, in seconds.
///
/// A zero latency would otherwise yield an infinite weight.
pub const MIN_LATENCY: f64 = 1e-6;

/// Normalized inverse-latency weights, summing to 1.
///
/// Falls back to a uniform distribution if the weights cannot be normalized.
pub fn inverse_latency_weights<I>(latencies: I) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    let raw: Vec<f64> = latencies
        .into_iter()
        .map(|t| 1.0 / t.max(MIN_LATENCY))
        .collect();

    let total: f64 = raw.iter().sum();
    if raw.is_empty() || !total.is_finite() || total <= 0.0 {
        let n = raw.len().max(1) as f64;
        return vec![1.0 / n; raw.len()];
    }

    raw.iter().map(|w| w / total).collect()
}

/// Index of the first weight whose cumulative sum reaches `r`.
///
/// If rounding leaves the total just short of `r`, the last index is returned.
pub fn inverse_cdf(weights: &[f64], r: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if cumulative >= r {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}
