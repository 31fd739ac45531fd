/// Image analyzer and analysis provider backends
pub mod analyzer;
pub mod backends;

pub use analyzer::{
    extract_json, fallback_analysis, format_prompt, parse_analysis, AnalysisRequest,
    ChangeEstimates, ConfidenceIntervals, GlacierAnalysis, ImageAnalyzer, Interval,
};
pub use backends::{AnalysisBackend, MockBackend, OllamaBackend, OpenAIBackend};
