use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub mean: f64,
    pub sdev: f64,
    pub max_abs: f64,
    pub n_used: usize,
}

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean_sdev(samples: &[f64]) -> (f64, f64) {
        if samples.is_empty() {
            return (0.0, 0.0);
        }
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().sum();
        let sum_sq: f64 = samples.iter().map(|&v| v * v).sum();
        let mean = sum / n;
        (mean, (sum_sq / n - mean * mean).abs().sqrt())
    }

    /// Statistics with samples further than one standard deviation from the
    /// mean dropped before the mean and max are recomputed.
    pub fn censored(samples: &[f64]) -> ErrorStats {
        let (mean, sdev) = Self::mean_sdev(samples);
        let (lower, upper) = (mean - sdev, mean + sdev);
        let kept: Vec<f64> = samples
            .iter()
            .copied()
            .filter(|v| (lower..=upper).contains(v))
            .collect();
        let max_abs = kept.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let mean = if kept.is_empty() {
            0.0
        } else {
            kept.iter().sum::<f64>() / kept.len() as f64
        };
        ErrorStats {
            mean,
            sdev,
            max_abs,
            n_used: kept.len(),
        }
    }
}
