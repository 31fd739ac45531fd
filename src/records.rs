//! Core record types for the glacier dashboard
//!
//! These mirror the rows kept by the data store: glaciers, their dated
//! measurements, uploaded images with analysis results, and alerts.

use crate::ai::GlacierAnalysis;
use crate::health::HealthStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Geographic position of a glacier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A monitored glacier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Glacier {
    pub id: String,
    pub name: String,
    pub location: Location,
    pub region: String,
    pub country: String,
    /// Last computed health status, if any
    #[serde(default)]
    pub status: Option<HealthStatus>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// Insert form of a glacier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewGlacier {
    pub name: String,
    pub location: Location,
    pub region: String,
    pub country: String,
}

/// One dated observation of a glacier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub date: NaiveDate,
    /// Ice volume in km³
    pub ice_volume: f64,
    /// Surface area in km²
    pub surface_area: f64,
    /// Melt rate in m/year
    pub melt_rate: f64,
}

impl Measurement {
    pub fn new(date: NaiveDate, ice_volume: f64, surface_area: f64, melt_rate: f64) -> Self {
        Self {
            date,
            ice_volume,
            surface_area,
            melt_rate,
        }
    }
}

/// Stored form of a measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementRecord {
    pub id: String,
    pub glacier_id: String,
    #[serde(flatten)]
    pub measurement: Measurement,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Progress of the AI analysis attached to an uploaded image
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AnalysisStatus::Pending),
            "processing" => Ok(AnalysisStatus::Processing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status '{}'", other)),
        }
    }
}

/// An uploaded glacier image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlacierImage {
    pub id: String,
    #[serde(default)]
    pub glacier_id: Option<String>,
    pub image_url: String,
    pub upload_date: Timestamp,
    pub analysis_status: AnalysisStatus,
    #[serde(default)]
    pub analysis_results: Option<GlacierAnalysis>,
}

/// Insert form of an uploaded image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewGlacierImage {
    pub glacier_id: Option<String>,
    pub image_url: String,
    pub upload_date: Timestamp,
    pub analysis_status: AnalysisStatus,
}

/// Severity level for alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required
    Info,
    /// May require attention
    Warning,
    /// Requires immediate attention
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of condition an alert reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    RapidMelt,
    VolumeLoss,
    HealthCritical,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::RapidMelt => "RAPID_MELT",
            AlertType::VolumeLoss => "VOLUME_LOSS",
            AlertType::HealthCritical => "HEALTH_CRITICAL",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted alert about a glacier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub glacier_id: String,
    pub glacier_name: String,
    pub alert_type: AlertType,
    pub alert_message: String,
    pub severity: Severity,
    pub created_at: Timestamp,
}

/// Insert form of an alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAlert {
    pub glacier_id: String,
    pub glacier_name: String,
    pub alert_type: AlertType,
    pub alert_message: String,
    pub severity: Severity,
}

/// Row counts reported by a store connection check
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlacierStats {
    pub glaciers: usize,
    pub measurements: usize,
    pub images: usize,
    pub alerts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_record_flattens_measurement() {
        let record = MeasurementRecord {
            id: "m-1".to_string(),
            glacier_id: "g-1".to_string(),
            measurement: Measurement::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                2.8,
                32.1,
                1.2,
            ),
            created_at: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["date"], "2024-01-01");
        assert_eq!(json["ice_volume"], 2.8);
        assert_eq!(json["glacier_id"], "g-1");
    }

    #[test]
    fn test_glacier_without_status_deserializes() {
        let json = r#"{
            "id": "g-1",
            "name": "Franz Josef Glacier",
            "location": {"latitude": -43.46, "longitude": 170.18},
            "region": "West Coast",
            "country": "New Zealand",
            "created_at": "2024-01-15T10:30:00Z"
        }"#;

        let glacier: Glacier = serde_json::from_str(json).unwrap();
        assert_eq!(glacier.status, None);
        assert!(glacier.created_at.is_some());
        assert_eq!(glacier.updated_at, None);
    }

    #[test]
    fn test_alert_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&AlertType::RapidMelt).unwrap(),
            "\"RAPID_MELT\""
        );
        assert_eq!(
            serde_json::to_string(&AlertType::VolumeLoss).unwrap(),
            "\"VOLUME_LOSS\""
        );
        assert_eq!(AlertType::HealthCritical.to_string(), "HEALTH_CRITICAL");
    }

    #[test]
    fn test_analysis_status_parsing() {
        assert_eq!(
            "Completed".parse::<AnalysisStatus>(),
            Ok(AnalysisStatus::Completed)
        );
        assert_eq!(
            serde_json::to_string(&AnalysisStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
