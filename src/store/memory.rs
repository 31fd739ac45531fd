use crate::ai::GlacierAnalysis;
use crate::error::StoreError;
use crate::health::HealthStatus;
use crate::records::{
    Alert, AnalysisStatus, Glacier, GlacierImage, GlacierStats, Location, Measurement,
    MeasurementRecord, NewAlert, NewGlacier, NewGlacierImage,
};
use crate::store::{paginate, GlacierRepository, ImagePage, ImageQuery, StoreFuture};
use chrono::{NaiveDate, Utc};
use log::debug;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    glaciers: Vec<Glacier>,
    measurements: Vec<MeasurementRecord>,
    images: Vec<GlacierImage>,
    alerts: Vec<Alert>,
}

/// In-process store
///
/// Used for local runs and tests. All tables live behind one mutex which is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with three glaciers and five yearly measurements each
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        if let Ok(mut tables) = store.tables() {
            for (glacier, series) in demo_glaciers() {
                let glacier = insert_glacier(&mut tables, &glacier);
                for measurement in series {
                    insert_measurement(&mut tables, &glacier.id, measurement);
                }
            }
            debug!(
                "Seeded memory store with {} glaciers and {} measurements",
                tables.glaciers.len(),
                tables.measurements.len()
            );
        }
        store
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn insert_glacier(tables: &mut Tables, glacier: &NewGlacier) -> Glacier {
    let now = Utc::now();
    let record = Glacier {
        id: Uuid::new_v4().to_string(),
        name: glacier.name.clone(),
        location: glacier.location,
        region: glacier.region.clone(),
        country: glacier.country.clone(),
        status: None,
        created_at: Some(now),
        updated_at: Some(now),
    };
    tables.glaciers.push(record.clone());
    record
}

fn insert_measurement(
    tables: &mut Tables,
    glacier_id: &str,
    measurement: Measurement,
) -> MeasurementRecord {
    let record = MeasurementRecord {
        id: Uuid::new_v4().to_string(),
        glacier_id: glacier_id.to_string(),
        measurement,
        created_at: Some(Utc::now()),
    };
    tables.measurements.push(record.clone());
    record
}

impl GlacierRepository for MemoryStore {
    fn list_glaciers(&self) -> StoreFuture<'_, Vec<Glacier>> {
        Box::pin(async move {
            let mut glaciers = self.tables()?.glaciers.clone();
            glaciers.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(glaciers)
        })
    }

    fn get_glacier<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Glacier>> {
        Box::pin(async move {
            let tables = self.tables()?;
            Ok(tables.glaciers.iter().find(|g| g.id == id).cloned())
        })
    }

    fn create_glacier<'a>(&'a self, glacier: &'a NewGlacier) -> StoreFuture<'a, Glacier> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            Ok(insert_glacier(&mut tables, glacier))
        })
    }

    fn set_glacier_status<'a>(&'a self, id: &'a str, status: HealthStatus) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            let glacier = tables
                .glaciers
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("glacier {}", id)))?;
            glacier.status = Some(status);
            glacier.updated_at = Some(Utc::now());
            Ok(())
        })
    }

    fn list_measurements<'a>(
        &'a self,
        glacier_id: &'a str,
    ) -> StoreFuture<'a, Vec<MeasurementRecord>> {
        Box::pin(async move {
            let tables = self.tables()?;
            let mut measurements: Vec<_> = tables
                .measurements
                .iter()
                .filter(|m| m.glacier_id == glacier_id)
                .cloned()
                .collect();
            measurements.sort_by_key(|m| m.measurement.date);
            Ok(measurements)
        })
    }

    fn create_measurement<'a>(
        &'a self,
        glacier_id: &'a str,
        measurement: Measurement,
    ) -> StoreFuture<'a, MeasurementRecord> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            if !tables.glaciers.iter().any(|g| g.id == glacier_id) {
                return Err(StoreError::NotFound(format!("glacier {}", glacier_id)));
            }
            Ok(insert_measurement(&mut tables, glacier_id, measurement))
        })
    }

    fn create_image<'a>(&'a self, image: &'a NewGlacierImage) -> StoreFuture<'a, GlacierImage> {
        Box::pin(async move {
            let record = GlacierImage {
                id: Uuid::new_v4().to_string(),
                glacier_id: image.glacier_id.clone(),
                image_url: image.image_url.clone(),
                upload_date: image.upload_date,
                analysis_status: image.analysis_status,
                analysis_results: None,
            };
            self.tables()?.images.push(record.clone());
            Ok(record)
        })
    }

    fn update_image_status<'a>(
        &'a self,
        image_url: &'a str,
        status: AnalysisStatus,
        results: Option<&'a GlacierAnalysis>,
    ) -> StoreFuture<'a, GlacierImage> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            let image = tables
                .images
                .iter_mut()
                .find(|i| i.image_url == image_url)
                .ok_or_else(|| StoreError::NotFound(format!("image {}", image_url)))?;
            image.analysis_status = status;
            if let Some(results) = results {
                image.analysis_results = Some(results.clone());
            }
            Ok(image.clone())
        })
    }

    fn list_images<'a>(&'a self, query: &'a ImageQuery) -> StoreFuture<'a, ImagePage> {
        Box::pin(async move {
            let mut images: Vec<_> = self
                .tables()?
                .images
                .iter()
                .filter(|i| query.matches(i))
                .cloned()
                .collect();
            images.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));

            let (page, limit) = query.normalized();
            let (images, pagination) = paginate(images, page, limit);
            Ok(ImagePage { images, pagination })
        })
    }

    fn list_alerts(&self) -> StoreFuture<'_, Vec<Alert>> {
        Box::pin(async move {
            let mut alerts = self.tables()?.alerts.clone();
            alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(alerts)
        })
    }

    fn create_alert<'a>(&'a self, alert: &'a NewAlert) -> StoreFuture<'a, Alert> {
        Box::pin(async move {
            let record = Alert {
                id: Uuid::new_v4().to_string(),
                glacier_id: alert.glacier_id.clone(),
                glacier_name: alert.glacier_name.clone(),
                alert_type: alert.alert_type,
                alert_message: alert.alert_message.clone(),
                severity: alert.severity,
                created_at: Utc::now(),
            };
            self.tables()?.alerts.push(record.clone());
            Ok(record)
        })
    }

    fn stats(&self) -> StoreFuture<'_, GlacierStats> {
        Box::pin(async move {
            let tables = self.tables()?;
            Ok(GlacierStats {
                glaciers: tables.glaciers.len(),
                measurements: tables.measurements.len(),
                images: tables.images.len(),
                alerts: tables.alerts.len(),
            })
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.tables().map(|_| ()) })
    }
}

fn yearly(values: [(f64, f64, f64); 5]) -> Vec<Measurement> {
    values
        .iter()
        .zip(2020..)
        .filter_map(|(&(volume, area, melt), year)| {
            NaiveDate::from_ymd_opt(year, 1, 1).map(|date| Measurement::new(date, volume, area, melt))
        })
        .collect()
}

fn demo_glaciers() -> Vec<(NewGlacier, Vec<Measurement>)> {
    let [franz_josef, perito_moreno, jakobshavn] = [
        NewGlacier {
            name: "Franz Josef Glacier".to_string(),
            location: Location {
                latitude: -43.4667,
                longitude: 170.1833,
            },
            region: "West Coast".to_string(),
            country: "New Zealand".to_string(),
        },
        NewGlacier {
            name: "Perito Moreno Glacier".to_string(),
            location: Location {
                latitude: -50.4967,
                longitude: -73.1377,
            },
            region: "Santa Cruz".to_string(),
            country: "Argentina".to_string(),
        },
        NewGlacier {
            name: "Jakobshavn Glacier".to_string(),
            location: Location {
                latitude: 69.1667,
                longitude: -49.8333,
            },
            region: "Qaasuitsup".to_string(),
            country: "Greenland".to_string(),
        },
    ];

    vec![
        (
            franz_josef,
            yearly([
                (3.3, 35.2, 0.8),
                (3.1, 34.1, 0.9),
                (2.9, 33.5, 1.0),
                (2.8, 32.8, 1.1),
                (2.8, 32.1, 1.2),
            ]),
        ),
        (
            perito_moreno,
            yearly([
                (191.1, 256.8, 0.4),
                (192.8, 257.1, 0.35),
                (194.2, 257.9, 0.32),
                (194.8, 258.1, 0.31),
                (195.2, 258.3, 0.3),
            ]),
        ),
        (
            jakobshavn,
            yearly([
                (420.0, 130.0, 8.5),
                (375.0, 125.1, 10.8),
                (330.0, 120.3, 13.0),
                (285.0, 115.4, 15.2),
                (240.0, 110.2, 17.5),
            ]),
        ),
    ]
}
