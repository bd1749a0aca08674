//! Within-cohort spreading of values onto [0, 1].

/// Standard deviations below this are treated as zero.
const STDEV_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub mean: f64,
    pub stdev: f64,
}

/// Population mean and standard deviation. Empty input yields zeros.
pub fn pool_stats(values: &[f64]) -> PoolStats {
    if values.is_empty() {
        return PoolStats {
            mean: 0.0,
            stdev: 0.0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    PoolStats {
        mean,
        stdev: var.sqrt(),
    }
}

pub fn zscore(value: f64, stats: &PoolStats) -> f64 {
    if stats.stdev < STDEV_EPSILON {
        return 0.0;
    }
    (value - stats.mean) / stats.stdev
}

/// `0.5 + z * spread`, clipped to [0, 1]. Relative distances survive; a
/// degenerate pool maps everyone to the midpoint.
pub fn zscore_unit(values: &[f64], spread: f64) -> Vec<f64> {
    let stats = pool_stats(values);
    values
        .iter()
        .map(|v| (0.5 + zscore(*v, &stats) * spread).clamp(0.0, 1.0))
        .collect()
}

/// Average-rank percentile `(rank - 0.5) / n`; equal values share a rank.
pub fn percentile_unit(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]).then(a.cmp(b)));

    let mut out = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties get the mean of ranks i+1..=j+1.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            out[order[k]] = (avg_rank - 0.5) / n as f64;
        }
        i = j + 1;
    }
    out
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_unit_centres_on_midpoint() {
        let out = zscore_unit(&[1.0, 2.0, 3.0], 0.15);
        assert!((out[1] - 0.5).abs() < 1e-12);
        assert!(out[0] < 0.5 && out[2] > 0.5);
        let mean = out.iter().sum::<f64>() / 3.0;
        assert!((mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zscore_unit_handles_flat_pool() {
        assert_eq!(zscore_unit(&[0.3, 0.3], 0.15), vec![0.5, 0.5]);
    }

    #[test]
    fn percentile_ties_share_rank() {
        let out = percentile_unit(&[0.2, 0.9, 0.2, 0.5]);
        assert_eq!(out[0], out[2]);
        assert!((out[0] - 0.25).abs() < 1e-12);
        assert!((out[3] - 0.625).abs() < 1e-12);
        assert!((out[1] - 0.875).abs() < 1e-12);
    }

    #[test]
    fn logistic_is_centred() {
        assert_eq!(logistic(0.0), 0.5);
        assert!(logistic(3.0) > 0.95);
    }
}
