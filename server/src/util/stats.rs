//! Small statistics helpers shared by the scoring algorithms.

/// Mean of the values. Zero for an empty slice.
pub fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

/// Population standard deviation around a given mean. Zero for an empty
/// slice.
pub fn std_dev(vals: &[f64], avg: f64) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    let sum: f64 = vals.iter().map(|v| (v - avg) * (v - avg)).sum();
    (sum / vals.len() as f64).sqrt()
}

/// Pooled standard deviation across per-bucket deviations, weighted by
/// `count − 1` per bucket. Zero when no bucket carries weight.
pub fn pooled_std_dev(stds: &[f64], counts: &[usize]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (std, count) in stds.iter().zip(counts) {
        let weight = count.saturating_sub(1) as f64;
        num += weight * std * std;
        den += weight;
    }
    if den == 0.0 {
        return 0.0;
    }
    (num / den).sqrt()
}

/// 3-sigma score of `last` against `(avg, std)`.
///
/// Nearly all values (99.7%) of a normal distribution lie within three
/// standard deviations of the mean; the score is the signed multiple of
/// that band. A zero deviation degenerates to the sign comparison.
pub fn score(last: f64, avg: f64, std: f64) -> f64 {
    if std == 0.0 {
        return match last.partial_cmp(&avg) {
            Some(std::cmp::Ordering::Greater) => 1.0,
            Some(std::cmp::Ordering::Less) => -1.0,
            _ => 0.0,
        };
    }
    (last - avg) / (3.0 * std)
}

/// Clamp a value into `[min, max]`.
pub fn saturate(value: f64, max: f64, min: f64) -> f64 {
    value.clamp(min, max)
}
