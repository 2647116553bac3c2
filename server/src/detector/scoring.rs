//! Anomaly scoring.
//!
//! The production scorer is [`div_day_sigma`]: it assumes every period's
//! samples follow a normal distribution with a shared sigma but their
//! own mean, scores the incoming value against the most recent mean and
//! the pooled deviation, and detects whole-distribution shifts against
//! the prior per-period means. [`div3sigma`] is the flat-window
//! degenerate used when only a single history bucket exists.

use crate::models::Metric;
use crate::util::stats;

/// Base of the per-bucket noise tolerance and of the saturation bounds.
const NOISE_BASE: f64 = 1.4;

/// One same-phase history window.
#[derive(Debug, Default, Clone)]
pub struct Bulk {
    pub metrics: Vec<Metric>,
    /// Window start stamp, inclusive.
    pub start: u32,
    /// Window stop stamp, exclusive.
    pub stop: u32,
}

/// Score `m` against per-period history buckets.
///
/// Sets `m.score` and `m.average` in place. The newest bucket is the
/// current period's window; prior anomalies are kept out of the baseline
/// by the widening score filter.
pub fn div_day_sigma(m: &mut Metric, bulks: &mut [Bulk], least_count: usize) {
    bulks.sort_by_key(|b| b.start);

    // Noise filter: bucket i only keeps samples whose previously stored
    // score lies within ±1.4^i, so newer buckets tolerate more extreme
    // history.
    let mut day_vals: Vec<Vec<f64>> = Vec::with_capacity(bulks.len());
    let mut threshold = 1.0;
    let mut retained = 0;
    for bulk in bulks.iter() {
        let vals: Vec<f64> = bulk
            .metrics
            .iter()
            .filter(|h| h.score <= threshold && h.score > -threshold)
            .map(|h| h.value)
            .collect();
        retained += vals.len();
        day_vals.push(vals);
        threshold *= NOISE_BASE;
    }
    if retained == 0 {
        m.average = m.value;
        m.score = 0.0;
        return;
    }

    let mut avgs = Vec::new();
    let mut stds = Vec::new();
    let mut counts = Vec::new();
    let mut all_vals = Vec::with_capacity(retained);
    for vals in &day_vals {
        if vals.is_empty() {
            continue;
        }
        let avg = stats::mean(vals);
        avgs.push(avg);
        stds.push(stats::std_dev(vals, avg));
        counts.push(vals.len());
        all_vals.extend_from_slice(vals);
    }
    if retained <= least_count {
        m.average = stats::mean(&all_vals);
        m.score = 0.0;
        return;
    }

    // Regime shift: when most of today's raw samples fall outside the
    // 3-sigma band around the combined mean (pooled within-bucket
    // deviation; the cross-bucket spread would absorb the shift itself),
    // the distribution has moved as a whole and a deviation score would
    // be meaningless. Score today's mean against the prior per-period
    // means instead.
    let today: Vec<f64> = bulks
        .last()
        .map(|b| b.metrics.iter().map(|h| h.value).collect())
        .unwrap_or_default();
    if avgs.len() > 2 && !today.is_empty() {
        let combined_avg = stats::mean(&avgs);
        let combined_std = stats::pooled_std_dev(&stds, &counts);
        let low = combined_avg - 3.0 * combined_std;
        let high = combined_avg + 3.0 * combined_std;
        let inside = today.iter().filter(|v| low <= **v && **v <= high).count();
        if inside * 2 < today.len() {
            let today_avg = stats::mean(&today);
            m.average = today_avg;
            m.score = average_score(today_avg, &avgs[..avgs.len() - 1]);
            return;
        }
    }

    let pooled = stats::pooled_std_dev(&stds, &counts);
    let mu = avgs.last().copied().unwrap_or(m.value);
    let clamp = NOISE_BASE.powi(8);
    m.average = mu;
    m.score = stats::saturate(stats::score(m.value, mu, pooled), clamp, -clamp);
}

/// Distance of `last` beyond the span of the prior per-period means,
/// signed, in units of that span, saturated to ±1.4^4. Degenerate spans
/// (fewer than two means, or all equal) saturate high.
fn average_score(last: f64, prior_means: &[f64]) -> f64 {
    let sat = NOISE_BASE.powi(4);
    if prior_means.len() < 2 {
        return sat;
    }
    let min = prior_means.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prior_means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return sat;
    }
    let score = if last > max {
        (last - max) / (max - min)
    } else if last < min {
        (last - min) / (max - min)
    } else {
        0.0
    };
    stats::saturate(score, sat, -sat)
}

/// Flat-window 3-sigma over a single history series.
pub fn div3sigma(m: &mut Metric, vals: &[f64], least_count: usize) {
    if vals.is_empty() {
        m.average = m.value;
        m.score = 0.0;
        return;
    }
    let avg = stats::mean(vals);
    m.average = avg;
    if vals.len() <= least_count {
        m.score = 0.0;
        return;
    }
    let std = stats::std_dev(vals, avg);
    let clamp = NOISE_BASE.powi(8);
    m.score = stats::saturate(stats::score(m.value, avg, std), clamp, -clamp);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(start: u32, stop: u32, values: &[f64]) -> Bulk {
        let step = (stop - start) / values.len().max(1) as u32;
        Bulk {
            metrics: values
                .iter()
                .enumerate()
                .map(|(i, v)| Metric {
                    name: "a.b".into(),
                    stamp: start + i as u32 * step.max(1),
                    value: *v,
                    score: 0.0,
                    average: *v,
                    link: 1,
                })
                .collect(),
            start,
            stop,
        }
    }

    /// Seven steady periods around 100; a close value scores near zero.
    #[test]
    fn test_steady_history_scores_low() {
        let day = 86400;
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 98.0 } else { 102.0 }).collect();
        let mut bulks: Vec<Bulk> = (0..7u32)
            .map(|d| bulk(d * day, d * day + 200, &values))
            .collect();
        let mut m = Metric::new("a.b", 7 * day, 100.5);
        div_day_sigma(&mut m, &mut bulks, 5);
        assert!(m.score.abs() < 0.1, "score {}", m.score);
        assert!((m.average - 100.0).abs() < 1.0);
    }

    /// A wildly large value saturates at 1.4^8.
    #[test]
    fn test_extreme_value_saturates() {
        let day = 86400;
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 98.0 } else { 102.0 }).collect();
        let mut bulks: Vec<Bulk> = (0..7u32)
            .map(|d| bulk(d * day, d * day + 200, &values))
            .collect();
        let mut m = Metric::new("a.b", 7 * day, 10000.0);
        div_day_sigma(&mut m, &mut bulks, 5);
        let clamp = 1.4f64.powi(8);
        assert!((m.score - clamp).abs() < 1e-9, "score {}", m.score);
        assert!((m.average - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_history_is_neutral() {
        let mut m = Metric::new("a.b", 86400, 42.0);
        let mut bulks = vec![Bulk::default()];
        div_day_sigma(&mut m, &mut bulks, 5);
        assert_eq!(m.score, 0.0);
        assert_eq!(m.average, 42.0);
    }

    #[test]
    fn test_too_few_points_is_neutral() {
        let mut bulks = vec![bulk(0, 200, &[10.0, 12.0])];
        let mut m = Metric::new("a.b", 86400, 50.0);
        div_day_sigma(&mut m, &mut bulks, 5);
        assert_eq!(m.score, 0.0);
        assert!((m.average - 11.0).abs() < 1e-9);
    }

    /// Prior anomalies (large stored scores) stay out of the baseline of
    /// old buckets but are tolerated in newer ones.
    #[test]
    fn test_noise_filter_widens_with_age() {
        let day = 86400;
        let mut old = bulk(0, 200, &[100.0, 100.0, 100.0]);
        // Stored score 1.2 exceeds the oldest bucket's ±1.0 tolerance.
        for h in &mut old.metrics {
            h.score = 1.2;
        }
        let mut newer = bulk(day, day + 200, &[100.0, 100.0, 100.0]);
        for h in &mut newer.metrics {
            h.score = 1.2; // within ±1.4
        }
        let mut bulks = vec![old, newer];
        let mut m = Metric::new("a.b", 2 * day, 100.0);
        div_day_sigma(&mut m, &mut bulks, 2);
        // Only the newer bucket's three points survive the filter.
        assert!((m.average - 100.0).abs() < 1e-9);
    }

    /// A whole-distribution jump scores by distance from the prior
    /// means, saturated at 1.4^4.
    #[test]
    fn test_regime_shift() {
        let day = 86400;
        let steady: Vec<f64> = vec![100.0; 10];
        let mut bulks: Vec<Bulk> = (0..6u32)
            .map(|d| bulk(d * day, d * day + 200, &steady))
            .collect();
        // Vary the prior means a little so the span is non-degenerate.
        for (i, b) in bulks.iter_mut().enumerate() {
            for h in &mut b.metrics {
                h.value += i as f64;
            }
        }
        let shifted: Vec<f64> = vec![500.0; 10];
        bulks.push(bulk(6 * day, 6 * day + 200, &shifted));
        let mut m = Metric::new("a.b", 7 * day, 500.0);
        div_day_sigma(&mut m, &mut bulks, 5);
        let sat = 1.4f64.powi(4);
        assert!((m.score - sat).abs() < 1e-9, "score {}", m.score);
        assert!((m.average - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_div3sigma() {
        let mut m = Metric::new("a.b", 86400, 100.5);
        let vals: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 98.0 } else { 102.0 }).collect();
        div3sigma(&mut m, &vals, 5);
        assert!(m.score.abs() < 0.1);
        assert!((m.average - 100.0).abs() < 1e-9);

        let mut empty = Metric::new("a.b", 86400, 7.0);
        div3sigma(&mut empty, &[], 5);
        assert_eq!(empty.score, 0.0);
        assert_eq!(empty.average, 7.0);
    }
}
