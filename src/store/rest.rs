use crate::ai::GlacierAnalysis;
use crate::error::StoreError;
use crate::health::HealthStatus;
use crate::http::http_client;
use crate::records::{
    Alert, AnalysisStatus, Glacier, GlacierImage, GlacierStats, Measurement, MeasurementRecord,
    NewAlert, NewGlacier, NewGlacierImage,
};
use crate::store::{GlacierRepository, ImagePage, ImageQuery, Pagination, StoreFuture};
use chrono::Utc;
use log::debug;
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Store backed by a PostgREST endpoint such as Supabase
///
/// Tables are addressed as `{url}/rest/v1/{table}`. Every request carries
/// the API key both as `apikey` header and as bearer token.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct MeasurementInsert<'a> {
    glacier_id: &'a str,
    #[serde(flatten)]
    measurement: Measurement,
}

#[derive(Serialize)]
struct StatusPatch {
    status: HealthStatus,
    updated_at: crate::records::Timestamp,
}

#[derive(Serialize)]
struct ImagePatch<'a> {
    analysis_status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_results: Option<&'a GlacierAnalysis>,
}

impl RestStore {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_timeout(base_url, api_key, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url,
            api_key,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url.trim_end_matches('/'), table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Turn a non-success status into `StoreError::Backend`
    async fn check(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(StoreError::Backend { status, message })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = Self::check(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    /// Insert or update and return the single affected row
    async fn fetch_one<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, StoreError> {
        let rows: Vec<T> = self
            .fetch(request.header("Prefer", "return=representation"))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(what.to_string()))
    }

    /// Row count of a table from the `Content-Range` header
    async fn count(&self, table: &str, filters: &[(&str, String)]) -> Result<usize, StoreError> {
        let request = self
            .request(Method::GET, table)
            .query(&[("select", "id")])
            .query(filters)
            .header("Prefer", "count=exact")
            .header("Range", "0-0");
        let response = Self::check(request.send().await?).await?;
        let header = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| StoreError::InvalidResponse("missing Content-Range".to_string()))?;
        parse_total(header)
    }
}

/// Total from a `Content-Range` value like `0-9/42` or `*/0`
fn parse_total(content_range: &str) -> Result<usize, StoreError> {
    content_range
        .rsplit('/')
        .next()
        .and_then(|total| total.trim().parse().ok())
        .ok_or_else(|| {
            StoreError::InvalidResponse(format!("unexpected Content-Range '{}'", content_range))
        })
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

impl GlacierRepository for RestStore {
    fn list_glaciers(&self) -> StoreFuture<'_, Vec<Glacier>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "glaciers")
                .query(&[("select", "*"), ("order", "name.asc")]);
            self.fetch(request).await
        })
    }

    fn get_glacier<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Glacier>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "glaciers")
                .query(&[("select", "*".to_string()), ("id", eq(id))]);
            let rows: Vec<Glacier> = self.fetch(request).await?;
            Ok(rows.into_iter().next())
        })
    }

    fn create_glacier<'a>(&'a self, glacier: &'a NewGlacier) -> StoreFuture<'a, Glacier> {
        Box::pin(async move {
            let request = self.request(Method::POST, "glaciers").json(glacier);
            self.fetch_one(request, "inserted glacier").await
        })
    }

    fn set_glacier_status<'a>(&'a self, id: &'a str, status: HealthStatus) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .request(Method::PATCH, "glaciers")
                .query(&[("id", eq(id))])
                .json(&StatusPatch {
                    status,
                    updated_at: Utc::now(),
                });
            let _: Glacier = self.fetch_one(request, &format!("glacier {}", id)).await?;
            Ok(())
        })
    }

    fn list_measurements<'a>(
        &'a self,
        glacier_id: &'a str,
    ) -> StoreFuture<'a, Vec<MeasurementRecord>> {
        Box::pin(async move {
            let request = self.request(Method::GET, "measurements").query(&[
                ("select", "*".to_string()),
                ("glacier_id", eq(glacier_id)),
                ("order", "date.asc".to_string()),
            ]);
            self.fetch(request).await
        })
    }

    fn create_measurement<'a>(
        &'a self,
        glacier_id: &'a str,
        measurement: Measurement,
    ) -> StoreFuture<'a, MeasurementRecord> {
        Box::pin(async move {
            if self.get_glacier(glacier_id).await?.is_none() {
                return Err(StoreError::NotFound(format!("glacier {}", glacier_id)));
            }
            let request = self
                .request(Method::POST, "measurements")
                .json(&MeasurementInsert {
                    glacier_id,
                    measurement,
                });
            self.fetch_one(request, "inserted measurement").await
        })
    }

    fn create_image<'a>(&'a self, image: &'a NewGlacierImage) -> StoreFuture<'a, GlacierImage> {
        Box::pin(async move {
            let request = self.request(Method::POST, "glacier_images").json(image);
            self.fetch_one(request, "inserted image").await
        })
    }

    fn update_image_status<'a>(
        &'a self,
        image_url: &'a str,
        status: AnalysisStatus,
        results: Option<&'a GlacierAnalysis>,
    ) -> StoreFuture<'a, GlacierImage> {
        Box::pin(async move {
            debug!("Setting analysis status of {} to {}", image_url, status);
            let request = self
                .request(Method::PATCH, "glacier_images")
                .query(&[("image_url", eq(image_url))])
                .json(&ImagePatch {
                    analysis_status: status,
                    analysis_results: results,
                });
            self.fetch_one(request, &format!("image {}", image_url))
                .await
        })
    }

    fn list_images<'a>(&'a self, query: &'a ImageQuery) -> StoreFuture<'a, ImagePage> {
        Box::pin(async move {
            let mut filters = Vec::new();
            if let Some(status) = query.status {
                filters.push(("analysis_status", eq(status)));
            }
            if let Some(glacier_id) = &query.glacier_id {
                filters.push(("glacier_id", eq(glacier_id)));
            }

            let (page, limit) = query.normalized();
            let total_items = self.count("glacier_images", &filters).await?;

            let request = self
                .request(Method::GET, "glacier_images")
                .query(&[("select", "*"), ("order", "upload_date.desc")])
                .query(&filters)
                .query(&[("offset", query.offset()), ("limit", limit)]);
            let images = self.fetch(request).await?;

            Ok(ImagePage {
                images,
                pagination: Pagination::new(page, limit, total_items),
            })
        })
    }

    fn list_alerts(&self) -> StoreFuture<'_, Vec<Alert>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "alerts")
                .query(&[("select", "*"), ("order", "created_at.desc")]);
            self.fetch(request).await
        })
    }

    fn create_alert<'a>(&'a self, alert: &'a NewAlert) -> StoreFuture<'a, Alert> {
        Box::pin(async move {
            let request = self.request(Method::POST, "alerts").json(alert);
            self.fetch_one(request, "inserted alert").await
        })
    }

    fn stats(&self) -> StoreFuture<'_, GlacierStats> {
        Box::pin(async move {
            Ok(GlacierStats {
                glaciers: self.count("glaciers", &[]).await?,
                measurements: self.count("measurements", &[]).await?,
                images: self.count("glacier_images", &[]).await?,
                alerts: self.count("alerts", &[]).await?,
            })
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "glaciers")
                .query(&[("select", "id"), ("limit", "1")]);
            Self::check(request.send().await?).await.map(|_| ())
        })
    }
}
