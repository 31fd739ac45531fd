//! Built-in alert rules
//!
//! Each rule looks at one glacier's measurement series and its health
//! assessment and decides whether an alert should be raised.

use crate::health::{percent_change, HealthAssessment, HealthStatus, MetricKind};
use crate::records::{AlertType, Glacier, Measurement, Severity};

/// Everything a rule may inspect for one glacier
#[derive(Debug, Clone, Copy)]
pub struct AlertContext<'a> {
    pub glacier: &'a Glacier,
    /// Ascending by date
    pub measurements: &'a [Measurement],
    pub assessment: HealthAssessment,
}

impl<'a> AlertContext<'a> {
    pub fn new(
        glacier: &'a Glacier,
        measurements: &'a [Measurement],
        assessment: HealthAssessment,
    ) -> Self {
        Self {
            glacier,
            measurements,
            assessment,
        }
    }

    /// Percent change of a metric from the earliest to the latest measurement
    pub fn change(&self, metric: MetricKind) -> Option<f64> {
        match self.measurements {
            [first, .., last] => percent_change(metric.value(first), metric.value(last)),
            _ => None,
        }
    }

    pub fn latest(&self) -> Option<&Measurement> {
        self.measurements.last()
    }
}

/// Trait for rules that decide whether a glacier needs an alert
pub trait AlertRule: Send + Sync {
    /// Alert message if this rule fires for the given glacier
    fn evaluate(&self, context: &AlertContext<'_>) -> Option<String>;

    fn name(&self) -> &str;

    fn alert_type(&self) -> AlertType;

    fn severity(&self) -> Severity;
}

/// Fires when the melt rate rose by more than `threshold_pct` percent
pub struct RapidMeltRule {
    pub threshold_pct: f64,
    pub severity: Severity,
}

impl RapidMeltRule {
    pub fn new(threshold_pct: f64, severity: Severity) -> Self {
        Self {
            threshold_pct,
            severity,
        }
    }

    /// Melt rate up more than 25% = Warning
    pub fn with_defaults() -> Self {
        Self::new(25.0, Severity::Warning)
    }
}

impl AlertRule for RapidMeltRule {
    fn evaluate(&self, context: &AlertContext<'_>) -> Option<String> {
        let change = context.change(MetricKind::MeltRate)?;
        if change <= self.threshold_pct {
            return None;
        }
        let latest = context.latest()?;
        Some(format!(
            "Melt rate of {} rose {:.1}% to {:.2} {}",
            context.glacier.name,
            change,
            latest.melt_rate,
            MetricKind::MeltRate.unit()
        ))
    }

    fn name(&self) -> &str {
        "RapidMeltRule"
    }

    fn alert_type(&self) -> AlertType {
        AlertType::RapidMelt
    }

    fn severity(&self) -> Severity {
        self.severity
    }
}

/// Fires when ice volume fell by more than `threshold_pct` percent
pub struct VolumeLossRule {
    pub threshold_pct: f64,
    pub severity: Severity,
}

impl VolumeLossRule {
    pub fn new(threshold_pct: f64, severity: Severity) -> Self {
        Self {
            threshold_pct,
            severity,
        }
    }

    /// Volume down more than 10% = Warning
    pub fn with_defaults() -> Self {
        Self::new(10.0, Severity::Warning)
    }
}

impl AlertRule for VolumeLossRule {
    fn evaluate(&self, context: &AlertContext<'_>) -> Option<String> {
        let change = context.change(MetricKind::IceVolume)?;
        if change >= -self.threshold_pct {
            return None;
        }
        let latest = context.latest()?;
        Some(format!(
            "Ice volume of {} fell {:.1}% to {:.2} {}",
            context.glacier.name,
            change.abs(),
            latest.ice_volume,
            MetricKind::IceVolume.unit()
        ))
    }

    fn name(&self) -> &str {
        "VolumeLossRule"
    }

    fn alert_type(&self) -> AlertType {
        AlertType::VolumeLoss
    }

    fn severity(&self) -> Severity {
        self.severity
    }
}

/// Fires when the health status is critical
///
/// A glacier with fewer than two measurements gets the neutral score and
/// never fires.
#[derive(Default)]
pub struct CriticalHealthRule;

impl AlertRule for CriticalHealthRule {
    fn evaluate(&self, context: &AlertContext<'_>) -> Option<String> {
        if context.measurements.len() < 2 || context.assessment.status != HealthStatus::Critical {
            return None;
        }
        Some(format!(
            "{} health score dropped to {:.1} (critical)",
            context.glacier.name, context.assessment.score
        ))
    }

    fn name(&self) -> &str {
        "CriticalHealthRule"
    }

    fn alert_type(&self) -> AlertType {
        AlertType::HealthCritical
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }
}
