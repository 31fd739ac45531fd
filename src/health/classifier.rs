//! Glacier health score and status classification
//!
//! The score starts at 10 and loses points for ice volume loss, surface
//! area loss and melt-rate increase between the earliest and latest
//! measurement of a series. It is clamped to [0, 10] and mapped to one of
//! four status labels.

use crate::error::HealthError;
use crate::health::MetricKind;
use crate::records::Measurement;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest possible score
pub const MAX_SCORE: f64 = 10.0;

/// Score reported when a series has fewer than two measurements
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Points lost per 1% of ice volume loss
const VOLUME_LOSS_WEIGHT: f64 = 0.1;
/// Points lost per 1% of surface area loss
const AREA_LOSS_WEIGHT: f64 = 0.05;
/// Points lost per 1% of melt-rate increase
const MELT_INCREASE_WEIGHT: f64 = 0.02;

const CRITICAL_BELOW: f64 = 3.0;
const WARNING_BELOW: f64 = 5.0;
const MODERATE_BELOW: f64 = 7.0;

/// Discrete health label derived from a score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Moderate,
    Stable,
}

impl HealthStatus {
    /// Map a score to its status label
    pub fn from_score(score: f64) -> Self {
        if score < CRITICAL_BELOW {
            HealthStatus::Critical
        } else if score < WARNING_BELOW {
            HealthStatus::Warning
        } else if score < MODERATE_BELOW {
            HealthStatus::Moderate
        } else {
            HealthStatus::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Critical => "critical",
            HealthStatus::Warning => "warning",
            HealthStatus::Moderate => "moderate",
            HealthStatus::Stable => "stable",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score and status computed from one glacier's measurement series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HealthAssessment {
    /// Score in [0, 10], 10 being healthiest
    pub score: f64,
    pub status: HealthStatus,
}

impl HealthAssessment {
    /// Build an assessment from a raw score, clamping it to [0, 10]
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(0.0, MAX_SCORE);
        Self {
            score,
            status: HealthStatus::from_score(score),
        }
    }

    /// Assessment used when there is not enough data to compare
    pub fn neutral() -> Self {
        Self::from_score(NEUTRAL_SCORE)
    }
}

/// How to treat a zero (or otherwise unusable) earliest value
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BaselinePolicy {
    /// The affected metric contributes nothing to the score
    #[default]
    Ignore,
    /// Classification fails with `HealthError::DegenerateBaseline`
    Reject,
}

/// Percentage change from `baseline` to `latest`
///
/// Returns `None` when the baseline is zero or the result is not finite.
pub fn percent_change(baseline: f64, latest: f64) -> Option<f64> {
    if baseline == 0.0 {
        return None;
    }
    let change = (latest - baseline) / baseline * 100.0;
    change.is_finite().then_some(change)
}

/// Health classifier with a configurable degenerate-baseline policy
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthClassifier {
    policy: BaselinePolicy,
}

impl HealthClassifier {
    pub fn new(policy: BaselinePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BaselinePolicy {
        self.policy
    }

    /// Classify a measurement series already sorted ascending by date
    ///
    /// The series is not sorted here; the first element is treated as the
    /// baseline and the last as the current state.
    ///
    /// # Errors
    ///
    /// Only under `BaselinePolicy::Reject`: `HealthError::DegenerateBaseline`
    /// for a zero or non-finite earliest value, `HealthError::NonFiniteValue`
    /// when the baseline is usable but the change is not finite.
    pub fn classify(&self, measurements: &[Measurement]) -> Result<HealthAssessment, HealthError> {
        let (earliest, latest) = match measurements {
            [earliest, .., latest] => (earliest, latest),
            _ => return Ok(HealthAssessment::neutral()),
        };

        let volume_change = self.change(
            MetricKind::IceVolume,
            earliest.ice_volume,
            latest.ice_volume,
        )?;
        let area_change = self.change(
            MetricKind::SurfaceArea,
            earliest.surface_area,
            latest.surface_area,
        )?;
        let melt_change = self.change(MetricKind::MeltRate, earliest.melt_rate, latest.melt_rate)?;

        let mut score = MAX_SCORE;
        if volume_change < 0.0 {
            score += volume_change * VOLUME_LOSS_WEIGHT;
        }
        if area_change < 0.0 {
            score += area_change * AREA_LOSS_WEIGHT;
        }
        if melt_change > 0.0 {
            score -= melt_change * MELT_INCREASE_WEIGHT;
        }

        Ok(HealthAssessment::from_score(score))
    }

    fn change(&self, metric: MetricKind, baseline: f64, latest: f64) -> Result<f64, HealthError> {
        if let Some(change) = percent_change(baseline, latest) {
            return Ok(change);
        }
        let err = if baseline == 0.0 || !baseline.is_finite() {
            HealthError::DegenerateBaseline { metric, baseline }
        } else {
            HealthError::NonFiniteValue {
                metric,
                value: latest,
            }
        };
        match self.policy {
            BaselinePolicy::Ignore => {
                debug!("Ignoring {} contribution: {}", metric, err);
                Ok(0.0)
            }
            BaselinePolicy::Reject => Err(err),
        }
    }
}

/// Classify with the default policy, where zero baselines contribute nothing
pub fn assess(measurements: &[Measurement]) -> HealthAssessment {
    HealthClassifier::default()
        .classify(measurements)
        .unwrap_or_else(|_| HealthAssessment::neutral())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const EPSILON: f64 = 1e-9;

    fn measurement(year: i32, ice_volume: f64, surface_area: f64, melt_rate: f64) -> Measurement {
        Measurement::new(
            NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            ice_volume,
            surface_area,
            melt_rate,
        )
    }

    #[test]
    fn test_empty_series_is_neutral() {
        let assessment = assess(&[]);
        assert_eq!(assessment.score, 5.0);
        assert_eq!(assessment.status, HealthStatus::Moderate);
    }

    #[test]
    fn test_single_measurement_is_neutral() {
        let assessment = assess(&[measurement(2020, 100.0, 50.0, 1.0)]);
        assert_eq!(assessment, HealthAssessment::neutral());
    }

    #[test]
    fn test_moderate_loss_scores_stable() {
        let series = [
            measurement(2020, 100.0, 50.0, 1.0),
            measurement(2024, 90.0, 48.0, 1.2),
        ];
        let assessment = assess(&series);
        assert!((assessment.score - 8.4).abs() < EPSILON, "{}", assessment.score);
        assert_eq!(assessment.status, HealthStatus::Stable);
    }

    #[test]
    fn test_severe_loss_hits_floor() {
        let series = [
            measurement(2020, 100.0, 50.0, 1.0),
            measurement(2024, 60.0, 30.0, 3.0),
        ];
        let assessment = assess(&series);
        assert!(assessment.score.abs() < EPSILON, "{}", assessment.score);
        assert_eq!(assessment.status, HealthStatus::Critical);
    }

    #[test]
    fn test_only_first_and_last_are_compared() {
        let series = [
            measurement(2020, 100.0, 50.0, 1.0),
            measurement(2021, 10.0, 5.0, 9.0),
            measurement(2024, 100.0, 50.0, 1.0),
        ];
        assert_eq!(assess(&series).score, MAX_SCORE);
    }

    #[test]
    fn test_growth_is_not_rewarded_above_max() {
        let series = [
            measurement(2020, 100.0, 50.0, 2.0),
            measurement(2024, 130.0, 60.0, 1.0),
        ];
        let assessment = assess(&series);
        assert_eq!(assessment.score, MAX_SCORE);
        assert_eq!(assessment.status, HealthStatus::Stable);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(2.9), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(3.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(4.99), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(5.0), HealthStatus::Moderate);
        assert_eq!(HealthStatus::from_score(6.99), HealthStatus::Moderate);
        assert_eq!(HealthStatus::from_score(7.0), HealthStatus::Stable);
        assert_eq!(HealthStatus::from_score(10.0), HealthStatus::Stable);
    }

    #[test]
    fn test_zero_melt_baseline_ignored_by_default() {
        let series = [
            measurement(2020, 100.0, 50.0, 0.0),
            measurement(2024, 90.0, 50.0, 2.0),
        ];
        let assessment = assess(&series);
        // Only the 10% volume loss counts
        assert!((assessment.score - 9.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_baseline_rejected_when_configured() {
        let classifier = HealthClassifier::new(BaselinePolicy::Reject);
        let series = [
            measurement(2020, 0.0, 50.0, 1.0),
            measurement(2024, 90.0, 50.0, 1.0),
        ];

        match classifier.classify(&series) {
            Err(HealthError::DegenerateBaseline { metric, baseline }) => {
                assert_eq!(metric, MetricKind::IceVolume);
                assert_eq!(baseline, 0.0);
            }
            other => panic!("Expected DegenerateBaseline, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_latest_value_is_not_a_baseline_error() {
        let classifier = HealthClassifier::new(BaselinePolicy::Reject);
        let series = [
            measurement(2020, 100.0, 50.0, 1.0),
            measurement(2024, 90.0, f64::INFINITY, 1.0),
        ];

        match classifier.classify(&series) {
            Err(HealthError::NonFiniteValue { metric, value }) => {
                assert_eq!(metric, MetricKind::SurfaceArea);
                assert!(value.is_infinite());
            }
            other => panic!("Expected NonFiniteValue, got {:?}", other),
        }

        // Ignored like a zero baseline under the default policy
        let assessment = assess(&series);
        assert!((assessment.score - 9.0).abs() < EPSILON);
    }

    #[test]
    fn test_reject_policy_still_neutral_for_short_series() {
        let classifier = HealthClassifier::new(BaselinePolicy::Reject);
        let series = [measurement(2020, 0.0, 0.0, 0.0)];
        assert_eq!(classifier.classify(&series), Ok(HealthAssessment::neutral()));
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(0.0, 5.0), None);
        assert_eq!(percent_change(f64::NAN, 5.0), None);
        assert!((percent_change(50.0, 48.0).unwrap() + 4.0).abs() < EPSILON);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Moderate).unwrap(),
            "\"moderate\""
        );
        assert_eq!(HealthStatus::Critical.to_string(), "critical");
    }
}
