//! Glacier service
//!
//! Wires the repository, image store, analyzer, health classifier and alert
//! manager together. Every collaborator is injected; nothing here reaches
//! for a global client.

use crate::ai::{AnalysisRequest, ChangeEstimates, GlacierAnalysis, ImageAnalyzer};
use crate::alerts::{AlertEngine, AlertManager, RateLimiter};
use crate::blob::{blob_pathname, BlobStore, ImageUpload, StoredBlob};
use crate::error::ServiceError;
use crate::health::{
    rank_by_score, GlacierHealth, HealthAssessment, HealthClassifier, HealthOverview,
    MetricSummary,
};
use crate::records::{
    Alert, AnalysisStatus, Glacier, GlacierImage, GlacierStats, Measurement, MeasurementRecord,
    NewGlacier, NewGlacierImage,
};
use crate::store::{GlacierRepository, ImagePage, ImageQuery};
use chrono::{NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Result of analysing one image
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    /// Image row after the analysis completed
    pub image: GlacierImage,
    pub analysis: GlacierAnalysis,
    /// Present when the image belongs to a glacier
    pub measurement: Option<MeasurementRecord>,
    pub assessment: Option<HealthAssessment>,
    pub alerts: Vec<Alert>,
}

/// Result of uploading one image
///
/// The upload succeeds once the blob and the image row exist. A failed
/// analysis is reported in `analysis` and leaves the image marked failed.
#[derive(Debug)]
pub struct UploadOutcome {
    pub blob: StoredBlob,
    /// Image row as first inserted
    pub image: GlacierImage,
    pub analysis: Result<AnalysisOutcome, ServiceError>,
}

impl UploadOutcome {
    pub fn status(&self) -> AnalysisStatus {
        match &self.analysis {
            Ok(outcome) => outcome.image.analysis_status,
            Err(_) => AnalysisStatus::Failed,
        }
    }
}

/// Everything known about one glacier
#[derive(Debug, Clone, Serialize)]
pub struct GlacierReport {
    pub glacier: Glacier,
    /// Ascending by date
    pub measurements: Vec<Measurement>,
    pub assessment: HealthAssessment,
    pub metrics: Vec<MetricSummary>,
}

/// Health of every glacier, most critical first
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub glaciers: Vec<GlacierHealth>,
    pub overview: HealthOverview,
}

pub struct GlacierService {
    repository: Arc<dyn GlacierRepository>,
    blobs: Arc<dyn BlobStore>,
    analyzer: ImageAnalyzer,
    classifier: HealthClassifier,
    alerts: AlertManager,
}

impl GlacierService {
    /// Service with the default classifier and alert settings
    pub fn new(
        repository: Arc<dyn GlacierRepository>,
        blobs: Arc<dyn BlobStore>,
        analyzer: ImageAnalyzer,
    ) -> Self {
        let alerts = AlertManager::new(
            AlertEngine::with_thresholds(25.0, 10.0),
            RateLimiter::default(),
            Arc::clone(&repository),
        );
        Self {
            repository,
            blobs,
            analyzer,
            classifier: HealthClassifier::default(),
            alerts,
        }
    }

    pub fn with_classifier(mut self, classifier: HealthClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_alerts(mut self, engine: AlertEngine, rate_limiter: RateLimiter) -> Self {
        self.alerts = AlertManager::new(engine, rate_limiter, Arc::clone(&self.repository));
        self
    }

    pub fn repository(&self) -> &Arc<dyn GlacierRepository> {
        &self.repository
    }

    /// Store an image, record it as pending and analyze it
    ///
    /// # Errors
    ///
    /// `ServiceError::NotFound` for an unknown glacier id, otherwise blob or
    /// store failures. Analysis failures do not fail the upload.
    pub async fn upload_image(
        &self,
        upload: &ImageUpload,
        glacier_id: Option<&str>,
    ) -> Result<UploadOutcome, ServiceError> {
        if let Some(id) = glacier_id {
            self.require_glacier(id).await?;
        }

        let pathname = blob_pathname(upload.file_name(), Utc::now());
        let blob = self.blobs.put(&pathname, upload).await?;
        info!("Stored {} ({} bytes) at {}", upload.file_name(), blob.size, blob.url);

        let image = self
            .repository
            .create_image(&NewGlacierImage {
                glacier_id: glacier_id.map(str::to_string),
                image_url: blob.url.clone(),
                upload_date: Utc::now(),
                analysis_status: AnalysisStatus::Pending,
            })
            .await?;

        let analysis = self.analyze_image(&blob.url, glacier_id).await;
        if let Err(e) = &analysis {
            warn!("Analysis of {} failed: {}", blob.url, e);
        }

        Ok(UploadOutcome {
            blob,
            image,
            analysis,
        })
    }

    /// Analyze a stored image and fold the result into the glacier's history
    ///
    /// The image moves to `processing`, then to `completed` with results or
    /// to `failed`. With a glacier id, a derived measurement is appended, the
    /// glacier's status label is refreshed and alert rules run. Alert
    /// failures are logged only. If the classifier rejects the new series the
    /// measurement is kept and the status label and alerts are skipped.
    pub async fn analyze_image(
        &self,
        image_url: &str,
        glacier_id: Option<&str>,
    ) -> Result<AnalysisOutcome, ServiceError> {
        let glacier = match glacier_id {
            Some(id) => Some(self.require_glacier(id).await?),
            None => None,
        };

        self.repository
            .update_image_status(image_url, AnalysisStatus::Processing, None)
            .await?;

        let mut request = AnalysisRequest::new(image_url);
        if let Some(glacier) = &glacier {
            request = request.for_glacier(glacier.id.clone(), Some(glacier.name.clone()));
        }

        let analysis = match self.analyzer.analyze(&request).await {
            Ok(analysis) => analysis,
            Err(e) => {
                if let Err(store_err) = self
                    .repository
                    .update_image_status(image_url, AnalysisStatus::Failed, None)
                    .await
                {
                    error!("Could not mark {} as failed: {}", image_url, store_err);
                }
                return Err(e.into());
            }
        };

        let image = self
            .repository
            .update_image_status(image_url, AnalysisStatus::Completed, Some(&analysis))
            .await?;

        let mut outcome = AnalysisOutcome {
            image,
            analysis,
            measurement: None,
            assessment: None,
            alerts: Vec::new(),
        };

        if let Some(glacier) = glacier {
            self.record_analysis(&glacier, &mut outcome).await?;
        }

        Ok(outcome)
    }

    async fn record_analysis(
        &self,
        glacier: &Glacier,
        outcome: &mut AnalysisOutcome,
    ) -> Result<(), ServiceError> {
        let history = self.measurements(&glacier.id).await?;
        let Some(derived) = derive_measurement(
            history.last(),
            &outcome.analysis.changes,
            Utc::now().date_naive(),
        ) else {
            warn!(
                "Not recording a measurement for {}: derived volume or area is not positive",
                glacier.name
            );
            return Ok(());
        };

        let mut measurements = history;
        measurements.push(derived);
        let assessment = self.classify_logged(glacier, &measurements);

        let record = self.repository.create_measurement(&glacier.id, derived).await?;
        debug!("Appended derived measurement {} for {}", record.id, glacier.name);
        outcome.measurement = Some(record);

        let Some(assessment) = assessment else {
            return Ok(());
        };
        self.repository
            .set_glacier_status(&glacier.id, assessment.status)
            .await?;
        info!(
            "{} health is now {} ({:.1})",
            glacier.name, assessment.status, assessment.score
        );

        outcome.alerts = match self.alerts.process(glacier, &measurements, assessment).await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!("Alert processing failed for {}: {}", glacier.name, e);
                Vec::new()
            }
        };
        outcome.assessment = Some(assessment);
        Ok(())
    }

    /// Glacier with its measurements, assessment and per-metric trends
    pub async fn glacier_report(&self, glacier_id: &str) -> Result<GlacierReport, ServiceError> {
        let glacier = self.require_glacier(glacier_id).await?;
        let measurements = self.measurements(glacier_id).await?;
        let assessment = self.classifier.classify(&measurements)?;
        let metrics = MetricSummary::all(&measurements);

        Ok(GlacierReport {
            glacier,
            measurements,
            assessment,
            metrics,
        })
    }

    /// Health of every glacier ranked lowest score first
    ///
    /// Glaciers the classifier rejects are left out with a warning.
    pub async fn health_overview(&self) -> Result<HealthSummary, ServiceError> {
        let mut glaciers = Vec::new();
        for glacier in self.repository.list_glaciers().await? {
            let measurements = self.measurements(&glacier.id).await?;
            match self.classify_logged(&glacier, &measurements) {
                Some(assessment) => glaciers.push(GlacierHealth {
                    glacier_id: glacier.id,
                    name: glacier.name,
                    score: assessment.score,
                    status: assessment.status,
                }),
                None => continue,
            }
        }

        rank_by_score(&mut glaciers);
        let overview = HealthOverview::from_glaciers(&glaciers);
        Ok(HealthSummary { glaciers, overview })
    }

    /// Re-run the alert rules over every glacier
    ///
    /// Status labels are refreshed along the way. Failures for one glacier
    /// are logged and do not stop the others.
    pub async fn evaluate_alerts(&self) -> Result<Vec<Alert>, ServiceError> {
        let mut raised = Vec::new();
        for glacier in self.repository.list_glaciers().await? {
            let measurements = self.measurements(&glacier.id).await?;
            let Some(assessment) = self.classify_logged(&glacier, &measurements) else {
                continue;
            };

            if glacier.status != Some(assessment.status) {
                if let Err(e) = self
                    .repository
                    .set_glacier_status(&glacier.id, assessment.status)
                    .await
                {
                    warn!("Could not update status of {}: {}", glacier.name, e);
                }
            }

            match self.alerts.process(&glacier, &measurements, assessment).await {
                Ok(alerts) => raised.extend(alerts),
                Err(e) => error!("Alert processing failed for {}: {}", glacier.name, e),
            }
        }

        info!("Alert evaluation raised {} alerts", raised.len());
        Ok(raised)
    }

    /// Check the store is reachable and report row counts
    pub async fn check_connection(&self) -> Result<GlacierStats, ServiceError> {
        if let Err(e) = self.repository.ping().await {
            error!("Data store ping failed: {}", e);
            return Err(ServiceError::Unavailable);
        }
        Ok(self.repository.stats().await?)
    }

    pub async fn list_glaciers(&self) -> Result<Vec<Glacier>, ServiceError> {
        Ok(self.repository.list_glaciers().await?)
    }

    pub async fn create_glacier(&self, glacier: &NewGlacier) -> Result<Glacier, ServiceError> {
        let created = self.repository.create_glacier(glacier).await?;
        info!("Created glacier {} ({})", created.name, created.id);
        Ok(created)
    }

    pub async fn list_images(&self, query: &ImageQuery) -> Result<ImagePage, ServiceError> {
        Ok(self.repository.list_images(query).await?)
    }

    pub async fn list_alerts(&self) -> Result<Vec<Alert>, ServiceError> {
        Ok(self.repository.list_alerts().await?)
    }

    async fn require_glacier(&self, id: &str) -> Result<Glacier, ServiceError> {
        self.repository
            .get_glacier(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    async fn measurements(&self, glacier_id: &str) -> Result<Vec<Measurement>, ServiceError> {
        Ok(self
            .repository
            .list_measurements(glacier_id)
            .await?
            .into_iter()
            .map(|record| record.measurement)
            .collect())
    }

    fn classify_logged(
        &self,
        glacier: &Glacier,
        measurements: &[Measurement],
    ) -> Option<HealthAssessment> {
        match self.classifier.classify(measurements) {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                warn!("Skipping health of {}: {}", glacier.name, e);
                None
            }
        }
    }
}

/// Measurement implied by an analysis
///
/// With a previous measurement the percentage changes are applied to it and
/// the melt rate is taken as reported. Without one the magnitudes of the
/// reported changes are stored. Returns `None` when the derived volume or
/// area is not positive and finite.
pub fn derive_measurement(
    previous: Option<&Measurement>,
    changes: &ChangeEstimates,
    date: NaiveDate,
) -> Option<Measurement> {
    let measurement = match previous {
        Some(previous) => Measurement::new(
            date,
            previous.ice_volume * (1.0 + changes.ice_volume_change / 100.0),
            previous.surface_area * (1.0 + changes.surface_area_change / 100.0),
            changes.melt_rate,
        ),
        None => Measurement::new(
            date,
            changes.ice_volume_change.abs(),
            changes.surface_area_change.abs(),
            changes.melt_rate,
        ),
    };
    let positive = |v: f64| v.is_finite() && v > 0.0;
    (positive(measurement.ice_volume)
        && positive(measurement.surface_area)
        && measurement.melt_rate.is_finite())
    .then_some(measurement)
}
