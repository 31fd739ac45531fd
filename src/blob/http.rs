use crate::blob::{BlobFuture, BlobStore, ImageUpload, StoredBlob};
use crate::error::BlobError;
use crate::http::http_client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Stores images with a hosted blob service
///
/// Bytes are sent with `PUT {base_url}/{pathname}` and a bearer token. The
/// service answers with the public URL of the stored object.
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    url: String,
    #[serde(default)]
    pathname: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self::with_timeout(base_url, token, Duration::from_secs(60))
    }

    pub fn with_timeout(base_url: String, token: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url,
            token,
        }
    }

    fn object_url(&self, pathname: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            pathname.trim_start_matches('/')
        )
    }
}

impl BlobStore for HttpBlobStore {
    fn put<'a>(&'a self, pathname: &'a str, upload: &'a ImageUpload) -> BlobFuture<'a, StoredBlob> {
        Box::pin(async move {
            let response = self
                .client
                .put(self.object_url(pathname))
                .bearer_auth(&self.token)
                .header(CONTENT_TYPE, upload.content_type())
                .header("x-access", "public")
                .body(upload.bytes().to_vec())
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(BlobError::Rejected(format!(
                    "blob store returned {}: {}",
                    status, error_text
                )));
            }

            let body: PutResponse = response
                .json()
                .await
                .map_err(|e| BlobError::Http(format!("Failed to parse blob response: {}", e)))?;

            Ok(StoredBlob {
                url: body.url,
                pathname: body.pathname.unwrap_or_else(|| pathname.to_string()),
                size: upload.len(),
            })
        })
    }
}
