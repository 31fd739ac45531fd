use log::warn;
use reqwest::Client;
use std::time::Duration;

/// Build the shared HTTP client configuration used by every remote backend
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build configured HTTP client, using defaults: {}", e);
            Client::new()
        })
}
