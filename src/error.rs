use crate::health::MetricKind;
use thiserror::Error;

/// Errors raised by the health classifier
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HealthError {
    #[error("Degenerate baseline for {metric}: earliest value is {baseline}")]
    DegenerateBaseline { metric: MetricKind, baseline: f64 },

    #[error("Latest {metric} value is not finite: {value}")]
    NonFiniteValue { metric: MetricKind, value: f64 },
}

/// Errors that can occur when talking to the glacier data store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store returned error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(e.to_string())
    }
}

/// Errors that can occur when storing uploaded images
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Blob store rejected upload: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for BlobError {
    fn from(e: reqwest::Error) -> Self {
        BlobError::Http(e.to_string())
    }
}

/// Errors that can occur during AI analysis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Backend communication failed: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AnalysisError::Timeout
        } else {
            AnalysisError::HttpError(e.to_string())
        }
    }
}

/// Errors that can occur when raising alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to persist alert: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors surfaced by the glacier service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Glacier not found: {0}")]
    NotFound(String),

    #[error("Data store unavailable")]
    Unavailable,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}
