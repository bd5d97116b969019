//! Confidence scoring for aggregated quotes.
//!
//! The score is a weighted blend of three 0–100 components: how fresh the
//! quotes are, how reliable the contributing sources are, and how closely the
//! sources agree. Thresholds are configurable; the step tables must be
//! monotone so that fresher data, more reliable sources and tighter agreement
//! never lower the score.

use anyhow::{Result, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub freshness: f64,
    pub reliability: f64,
    pub agreement: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            freshness: 0.3,
            reliability: 0.4,
            agreement: 0.3,
        }
    }
}

/// Scores inputs `<= up_to` with `score`. Tables are scanned in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub up_to: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
    pub weights: ConfidenceWeights,
    /// Quote age in seconds.
    pub freshness_steps: Vec<Step>,
    pub stale_score: f64,
    /// Coefficient of variation, `std_dev / mean`.
    pub agreement_steps: Vec<Step>,
    pub disagreement_score: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            freshness_steps: vec![
                Step { up_to: 60.0, score: 100.0 },
                Step { up_to: 300.0, score: 80.0 },
                Step { up_to: 900.0, score: 60.0 },
                Step { up_to: 3600.0, score: 40.0 },
            ],
            stale_score: 20.0,
            agreement_steps: vec![
                Step { up_to: 0.001, score: 100.0 },
                Step { up_to: 0.005, score: 90.0 },
                Step { up_to: 0.01, score: 75.0 },
                Step { up_to: 0.02, score: 50.0 },
            ],
            disagreement_score: 25.0,
        }
    }
}

/// Components that produced a confidence score. `agreement` is `None` for a
/// single-source quote, which has nothing to cross-validate against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    pub freshness: f64,
    pub reliability: f64,
    pub agreement: Option<f64>,
    pub score: f64,
}

fn step_score(steps: &[Step], value: f64, fallback: f64) -> f64 {
    steps
        .iter()
        .find(|s| value <= s.up_to)
        .map_or(fallback, |s| s.score)
}

fn validate_steps(name: &str, steps: &[Step], fallback: f64) -> Result<()> {
    for pair in steps.windows(2) {
        if pair[1].up_to <= pair[0].up_to {
            bail!("{name} thresholds must be strictly increasing");
        }
        if pair[1].score > pair[0].score {
            bail!("{name} scores must not increase with the threshold");
        }
    }
    if let Some(last) = steps.last()
        && fallback > last.score
    {
        bail!("{name} fallback score must not exceed the last step score");
    }
    for score in steps.iter().map(|s| s.score).chain(std::iter::once(fallback)) {
        if !(0.0..=100.0).contains(&score) {
            bail!("{name} scores must be within 0..=100, got {score}");
        }
    }
    Ok(())
}

impl ConfidencePolicy {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if w.freshness < 0.0 || w.reliability < 0.0 || w.agreement < 0.0 {
            bail!("confidence weights must not be negative");
        }
        let total = w.freshness + w.reliability + w.agreement;
        if (total - 1.0).abs() > 1e-6 {
            bail!("confidence weights must sum to 1.0, got {total}");
        }
        validate_steps("freshness", &self.freshness_steps, self.stale_score)?;
        validate_steps("agreement", &self.agreement_steps, self.disagreement_score)
    }

    pub fn freshness_score(&self, age: Duration) -> f64 {
        let secs = age.num_milliseconds().max(0) as f64 / 1000.0;
        step_score(&self.freshness_steps, secs, self.stale_score)
    }

    pub fn agreement_score(&self, mean: f64, std_dev: f64) -> f64 {
        if mean <= 0.0 || !std_dev.is_finite() {
            return self.disagreement_score;
        }
        step_score(&self.agreement_steps, std_dev / mean, self.disagreement_score)
    }

    /// Blends per-quote ages and source reliabilities with an optional
    /// agreement score.
    pub fn score(
        &self,
        ages: &[Duration],
        reliabilities: &[f64],
        agreement: Option<f64>,
    ) -> ConfidenceBreakdown {
        let freshness = average(ages.iter().map(|a| self.freshness_score(*a)));
        let reliability = average(reliabilities.iter().map(|r| r.clamp(0.0, 100.0)));

        let w = &self.weights;
        let score = w.freshness * freshness
            + w.reliability * reliability
            + w.agreement * agreement.unwrap_or(0.0);

        ConfidenceBreakdown {
            freshness,
            reliability,
            agreement,
            score: score.clamp(0.0, 100.0),
        }
    }
}

fn average<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}
