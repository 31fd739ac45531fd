//! Trend summaries over measurement series
//!
//! Chart-ready series, per-metric change summaries and the fleet-wide
//! health overview shown on the trends dashboard.

use crate::health::classifier::{percent_change, HealthStatus};
use crate::records::Measurement;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Changes smaller than this many percent count as stable
const STABLE_BELOW_PCT: f64 = 2.0;
const MODERATE_BELOW_PCT: f64 = 10.0;
const SIGNIFICANT_BELOW_PCT: f64 = 20.0;

/// One of the three measured quantities
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    IceVolume,
    SurfaceArea,
    MeltRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::IceVolume,
        MetricKind::SurfaceArea,
        MetricKind::MeltRate,
    ];

    pub fn value(&self, measurement: &Measurement) -> f64 {
        match self {
            MetricKind::IceVolume => measurement.ice_volume,
            MetricKind::SurfaceArea => measurement.surface_area,
            MetricKind::MeltRate => measurement.melt_rate,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::IceVolume => "km³",
            MetricKind::SurfaceArea => "km²",
            MetricKind::MeltRate => "m/year",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::IceVolume => "ice_volume",
            MetricKind::SurfaceArea => "surface_area",
            MetricKind::MeltRate => "melt_rate",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of change over a series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }

    pub fn of(change_pct: f64) -> Self {
        if change_pct.abs() < STABLE_BELOW_PCT {
            Trend::Stable
        } else if change_pct > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    }
}

/// Magnitude label for a percentage change, regardless of direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSeverity {
    Stable,
    Moderate,
    Significant,
    Critical,
}

impl ChangeSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSeverity::Stable => "stable",
            ChangeSeverity::Moderate => "moderate",
            ChangeSeverity::Significant => "significant",
            ChangeSeverity::Critical => "critical",
        }
    }

    pub fn of(change_pct: f64) -> Self {
        let magnitude = change_pct.abs();
        if magnitude < STABLE_BELOW_PCT {
            ChangeSeverity::Stable
        } else if magnitude < MODERATE_BELOW_PCT {
            ChangeSeverity::Moderate
        } else if magnitude < SIGNIFICANT_BELOW_PCT {
            ChangeSeverity::Significant
        } else {
            ChangeSeverity::Critical
        }
    }
}

/// Dated values of one metric, in the order given
pub fn series(measurements: &[Measurement], metric: MetricKind) -> Vec<(NaiveDate, f64)> {
    measurements
        .iter()
        .map(|m| (m.date, metric.value(m)))
        .collect()
}

/// Current value and first-to-last change of one metric
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MetricSummary {
    pub metric: MetricKind,
    pub unit: &'static str,
    pub current: Option<f64>,
    pub change_pct: Option<f64>,
    pub trend: Option<Trend>,
    pub severity: Option<ChangeSeverity>,
}

impl MetricSummary {
    pub fn from_measurements(measurements: &[Measurement], metric: MetricKind) -> Self {
        let current = measurements.last().map(|m| metric.value(m));
        let change_pct = match measurements {
            [first, .., last] => percent_change(metric.value(first), metric.value(last)),
            _ => None,
        };

        Self {
            metric,
            unit: metric.unit(),
            current,
            change_pct,
            trend: change_pct.map(Trend::of),
            severity: change_pct.map(ChangeSeverity::of),
        }
    }

    /// Summaries for all three metrics
    pub fn all(measurements: &[Measurement]) -> Vec<Self> {
        MetricKind::ALL
            .iter()
            .map(|&metric| Self::from_measurements(measurements, metric))
            .collect()
    }
}

/// Health of one glacier, as listed on the overview
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlacierHealth {
    pub glacier_id: String,
    pub name: String,
    pub score: f64,
    pub status: HealthStatus,
}

/// Sort glaciers so the lowest score (most critical) comes first
pub fn rank_by_score(glaciers: &mut [GlacierHealth]) {
    glaciers.sort_by(|a, b| a.score.total_cmp(&b.score));
}

/// Status counts and average score across glaciers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthOverview {
    pub critical: usize,
    pub warning: usize,
    pub moderate: usize,
    pub stable: usize,
    /// None when there are no glaciers
    pub average_score: Option<f64>,
}

impl HealthOverview {
    pub fn from_glaciers(glaciers: &[GlacierHealth]) -> Self {
        let mut overview = HealthOverview::default();
        for glacier in glaciers {
            match glacier.status {
                HealthStatus::Critical => overview.critical += 1,
                HealthStatus::Warning => overview.warning += 1,
                HealthStatus::Moderate => overview.moderate += 1,
                HealthStatus::Stable => overview.stable += 1,
            }
        }

        if !glaciers.is_empty() {
            let total: f64 = glaciers.iter().map(|g| g.score).sum();
            overview.average_score = Some(total / glaciers.len() as f64);
        }

        overview
    }

    pub fn total(&self) -> usize {
        self.critical + self.warning + self.moderate + self.stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(year: i32, ice_volume: f64, surface_area: f64, melt_rate: f64) -> Measurement {
        Measurement::new(
            NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            ice_volume,
            surface_area,
            melt_rate,
        )
    }

    fn health(name: &str, score: f64) -> GlacierHealth {
        GlacierHealth {
            glacier_id: format!("id-{}", name),
            name: name.to_string(),
            score,
            status: HealthStatus::from_score(score),
        }
    }

    #[test]
    fn test_change_severity_labels() {
        assert_eq!(ChangeSeverity::of(1.9), ChangeSeverity::Stable);
        assert_eq!(ChangeSeverity::of(-1.9), ChangeSeverity::Stable);
        assert_eq!(ChangeSeverity::of(-8.7), ChangeSeverity::Moderate);
        assert_eq!(ChangeSeverity::of(-15.3), ChangeSeverity::Significant);
        assert_eq!(ChangeSeverity::of(23.5), ChangeSeverity::Critical);
    }

    #[test]
    fn test_trend_direction() {
        assert_eq!(Trend::of(0.5), Trend::Stable);
        assert_eq!(Trend::of(5.0), Trend::Increasing);
        assert_eq!(Trend::of(-5.0), Trend::Decreasing);
    }

    #[test]
    fn test_metric_summary_for_declining_glacier() {
        let series = [
            measurement(2020, 3.3, 35.2, 0.8),
            measurement(2022, 2.9, 33.5, 1.0),
            measurement(2024, 2.8, 32.1, 1.2),
        ];

        let volume = MetricSummary::from_measurements(&series, MetricKind::IceVolume);
        assert_eq!(volume.current, Some(2.8));
        assert_eq!(volume.unit, "km³");
        assert_eq!(volume.trend, Some(Trend::Decreasing));
        assert_eq!(volume.severity, Some(ChangeSeverity::Significant));

        let melt = MetricSummary::from_measurements(&series, MetricKind::MeltRate);
        assert_eq!(melt.trend, Some(Trend::Increasing));
        assert_eq!(melt.severity, Some(ChangeSeverity::Critical));
    }

    #[test]
    fn test_metric_summary_without_history() {
        let summary =
            MetricSummary::from_measurements(&[measurement(2024, 1.0, 1.0, 1.0)], MetricKind::MeltRate);
        assert_eq!(summary.current, Some(1.0));
        assert_eq!(summary.change_pct, None);
        assert_eq!(summary.trend, None);

        assert_eq!(MetricSummary::all(&[]).len(), 3);
    }

    #[test]
    fn test_series_preserves_order() {
        let measurements = [measurement(2020, 3.3, 35.2, 0.8), measurement(2021, 3.1, 34.1, 0.9)];
        let points = series(&measurements, MetricKind::SurfaceArea);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].1, 35.2);
        assert_eq!(points[1].0, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
    }

    #[test]
    fn test_health_overview_counts() {
        let glaciers = vec![
            health("Jakobshavn", 1.5),
            health("Franz Josef", 4.0),
            health("Mer de Glace", 4.5),
            health("Perito Moreno", 9.0),
        ];

        let overview = HealthOverview::from_glaciers(&glaciers);
        assert_eq!(overview.critical, 1);
        assert_eq!(overview.warning, 2);
        assert_eq!(overview.moderate, 0);
        assert_eq!(overview.stable, 1);
        assert_eq!(overview.total(), 4);
        assert!((overview.average_score.unwrap() - 4.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_overview_has_no_average() {
        let overview = HealthOverview::from_glaciers(&[]);
        assert_eq!(overview.total(), 0);
        assert_eq!(overview.average_score, None);
    }

    #[test]
    fn test_rank_puts_most_critical_first() {
        let mut glaciers = vec![health("b", 8.0), health("a", 2.0), health("c", 5.0)];
        rank_by_score(&mut glaciers);
        let names: Vec<_> = glaciers.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }
}
