//! Pure statistics used by the Post-Load Validator (spec.md section 4.9).
//!
//! Kept free of I/O so the distribution math and the anomaly-severity
//! classification can be property-tested independently of the warehouse
//! query that produces the per-day counts.

use ingestpipe_protocol::{RowCountStats, Severity};

/// `PERCENTILE_CONT`-style linear interpolation over an already-sorted
/// slice, matching the warehouse's `PERCENTILE_CONT(p) WITHIN GROUP (ORDER
/// BY n)` used in the conceptual query (spec.md section 4.9).
pub fn percentile_cont(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let fraction = rank - lower as f64;
        sorted[lower] + fraction * (sorted[upper] - sorted[lower])
    }
}

/// Computes mean/median/quartiles/std-dev/min/max over one day per entry.
/// `counts` need not be sorted; this function sorts its own copy.
pub fn compute_stats(counts: &[u64]) -> RowCountStats {
    if counts.is_empty() {
        return RowCountStats::default();
    }

    let mut sorted: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    RowCountStats {
        mean,
        median: percentile_cont(&sorted, 0.5),
        q1: percentile_cont(&sorted, 0.25),
        q3: percentile_cont(&sorted, 0.75),
        std_dev: variance.sqrt(),
        min: *counts.iter().min().unwrap(),
        max: *counts.iter().max().unwrap(),
    }
}

/// Classifies one day's row count against the distribution of the whole
/// validation window (spec.md section 4.9's `CASE` expression, with the
/// ±10%-of-mean tolerance band from the same section taking priority: a
/// count within `[0.9*mean, 1.1*mean]` is always `Normal`, regardless of
/// what the IQR rule would otherwise say).
pub fn classify_severity(count: u64, stats: &RowCountStats) -> Severity {
    let n = count as f64;
    let m = stats.mean;

    if m > 0.0 && n >= 0.9 * m && n <= 1.1 * m {
        return Severity::Normal;
    }

    let iqr = stats.q3 - stats.q1;
    if n < m * 0.10 {
        Severity::SeverelyLow
    } else if n < stats.q1 - 1.5 * iqr {
        Severity::OutlierLow
    } else if n < m * 0.50 {
        Severity::Low
    } else if n > m * 1.10 && n > stats.q3 + 1.5 * iqr {
        Severity::OutlierHigh
    } else {
        Severity::Normal
    }
}

pub fn percent_of_avg(count: u64, mean: f64) -> f64 {
    if mean == 0.0 {
        0.0
    } else {
        (count as f64 / mean) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn median_of_odd_count_is_middle_element() {
        let stats = compute_stats(&[1, 2, 3, 4, 5]);
        assert!((stats.median - 3.0).abs() < 1e-9);
    }

    #[test]
    fn within_ten_percent_band_is_always_normal() {
        let stats = RowCountStats {
            mean: 1000.0,
            q1: 50.0,
            q3: 60.0,
            ..Default::default()
        };
        // IQR here is tiny, so without the tolerance band this would be
        // flagged OutlierLow; the ±10% rule must win.
        assert_eq!(classify_severity(950, &stats), Severity::Normal);
        assert_eq!(classify_severity(1050, &stats), Severity::Normal);
    }

    #[test]
    fn severely_low_below_ten_percent_of_mean() {
        let stats = RowCountStats {
            mean: 1000.0,
            q1: 900.0,
            q3: 1100.0,
            ..Default::default()
        };
        assert_eq!(classify_severity(50, &stats), Severity::SeverelyLow);
    }

    proptest! {
        #[test]
        fn classification_never_panics(count in 0u64..1_000_000, mean in 0.0f64..1_000_000.0, q1 in 0.0f64..1_000_000.0, q3 in 0.0f64..1_000_000.0) {
            let stats = RowCountStats { mean, q1, q3, ..Default::default() };
            let _ = classify_severity(count, &stats);
        }

        #[test]
        fn normal_invariant_holds(count in 1u64..1_000_000, mean in 1.0f64..1_000_000.0) {
            if (count as f64) >= 0.9 * mean && (count as f64) <= 1.1 * mean {
                let stats = RowCountStats { mean, q1: mean * 0.5, q3: mean * 1.5, ..Default::default() };
                prop_assert_eq!(classify_severity(count, &stats), Severity::Normal);
            }
        }
    }
}
