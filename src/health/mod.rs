/// Health score classifier and trend summaries
pub mod classifier;
pub mod trends;

pub use classifier::{
    assess, percent_change, BaselinePolicy, HealthAssessment, HealthClassifier, HealthStatus,
};
pub use trends::{
    rank_by_score, series, ChangeSeverity, GlacierHealth, HealthOverview, MetricKind,
    MetricSummary, Trend,
};
