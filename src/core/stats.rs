//! Summary statistics over a quote sample.

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Point from which outlier distance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierCenter {
    Mean,
    #[default]
    Median,
}

/// Splits sample indices into kept and rejected.
///
/// A value is rejected when its distance from the centre exceeds
/// `sigma × std_dev`. If every value would be rejected, all are kept.
pub fn partition_outliers(
    values: &[f64],
    center: OutlierCenter,
    sigma: f64,
) -> (Vec<usize>, Vec<usize>) {
    let all: Vec<usize> = (0..values.len()).collect();
    let (Some(sd), Some(centre)) = (
        std_dev(values),
        match center {
            OutlierCenter::Mean => mean(values),
            OutlierCenter::Median => median(values),
        },
    ) else {
        return (all, Vec::new());
    };

    let threshold = sigma * sd;
    let (kept, rejected): (Vec<usize>, Vec<usize>) = all
        .iter()
        .copied()
        .partition(|&i| (values[i] - centre).abs() <= threshold);

    if kept.is_empty() {
        return (all, Vec::new());
    }
    (kept, rejected)
}
