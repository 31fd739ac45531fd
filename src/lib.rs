/// Error types for the glacier monitor
pub mod error;

/// Glacier, measurement, image and alert records
pub mod records;

/// Health classifier and trend summaries
pub mod health;

/// Persistence of glaciers, measurements, images and alerts
pub mod store;

/// Image blob storage
pub mod blob;

/// AI image analyzer and backend implementations
pub mod ai;

/// Alert rules, rate limiting and persistence
pub mod alerts;

/// Configuration management
pub mod config;

/// Orchestration of upload, analysis, health and alerts
pub mod service;

mod http;

// Re-export commonly used types
pub use error::{
    AlertError, AnalysisError, BlobError, ConfigError, HealthError, ServiceError, StoreError,
};
pub use health::{assess, HealthAssessment, HealthClassifier, HealthStatus};
pub use records::{Glacier, Measurement};
pub use service::GlacierService;
