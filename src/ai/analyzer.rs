use crate::ai::backends::AnalysisBackend;
use crate::error::AnalysisError;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the analysis provider is asked to look at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub image_url: String,
    pub glacier_id: Option<String>,
    pub glacier_name: Option<String>,
}

impl AnalysisRequest {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            glacier_id: None,
            glacier_name: None,
        }
    }

    pub fn for_glacier(mut self, glacier_id: impl Into<String>, name: Option<String>) -> Self {
        self.glacier_id = Some(glacier_id.into());
        self.glacier_name = name;
        self
    }
}

/// Estimated changes read off a glacier image
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEstimates {
    /// Percentage change in ice volume
    pub ice_volume_change: f64,
    /// Percentage change in surface area
    pub surface_area_change: f64,
    /// Melt rate in m/year
    pub melt_rate: f64,
    /// Average elevation change in m/year
    pub elevation_change: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceIntervals {
    pub ice_volume_change: Interval,
    pub surface_area_change: Interval,
    pub melt_rate: Interval,
}

/// Structured result of analysing one glacier image
///
/// Field names follow the JSON object the model is asked to return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlacierAnalysis {
    /// Identified glacier name or "Unknown Glacier"
    pub glacier_name: String,
    /// Identification confidence in [0, 1]
    pub confidence: f64,
    pub changes: ChangeEstimates,
    pub confidence_intervals: ConfidenceIntervals,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Set when the values are a generated estimate rather than model output
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// Coordinates analysis requests against a backend
///
/// The backend returns raw model text; the analyzer turns it into a
/// [`GlacierAnalysis`]. With fallback enabled, an unparseable reply is
/// replaced by a randomized estimate. Transport failures are always
/// returned to the caller.
pub struct ImageAnalyzer {
    backend: Arc<dyn AnalysisBackend>,
    fallback: bool,
}

impl ImageAnalyzer {
    pub fn with_backend(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self {
            backend,
            fallback: false,
        }
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback = enabled;
        self
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Analyze one image
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError` if:
    /// - The backend communication fails or times out
    /// - The reply cannot be parsed and fallback is disabled
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<GlacierAnalysis, AnalysisError> {
        info!(
            "Starting image analysis via {} for {} (glacier: {})",
            self.backend.name(),
            request.image_url,
            request.glacier_id.as_deref().unwrap_or("none")
        );

        let start_time = std::time::Instant::now();
        let text = self.backend.analyze(request).await.map_err(|e| {
            error!("Analysis backend failed after {:?}: {}", start_time.elapsed(), e);
            e
        })?;
        debug!("Backend replied with {} bytes", text.len());

        match parse_analysis(&text) {
            Ok(analysis) => {
                info!(
                    "Analysis completed in {:?}: glacier='{}', confidence={:.2}",
                    start_time.elapsed(),
                    analysis.glacier_name,
                    analysis.confidence
                );
                Ok(analysis)
            }
            Err(AnalysisError::InvalidResponse(reason)) if self.fallback => {
                warn!("Unparseable analysis reply, using fallback estimate: {}", reason);
                Ok(fallback_analysis(&mut rand::thread_rng(), request))
            }
            Err(e) => {
                error!("Analysis reply rejected: {}", e);
                Err(e)
            }
        }
    }
}

/// System instruction sent ahead of the prompt by chat-style backends
pub fn system_prompt() -> &'static str {
    "You are a glaciologist analysing satellite imagery. Respond with a single JSON object only."
}

/// Build the analysis prompt for one image
pub fn format_prompt(request: &AnalysisRequest) -> String {
    let glacier = match (&request.glacier_id, &request.glacier_name) {
        (Some(id), Some(name)) => format!("{} ({})", name, id),
        (Some(id), None) => id.clone(),
        _ => "None provided".to_string(),
    };

    format!(
        r#"Analyze this glacier satellite image: {url}

Please provide:
1. Glacier identification (if recognizable)
2. Estimated changes in ice volume, surface area, and melt rate
3. Confidence intervals for your estimates
4. Recommendations for further monitoring

If a glacier ID is provided: {glacier}

Base your analysis on visible features like:
- Ice coverage and thickness
- Crevasse patterns
- Terminus position
- Surface texture and color
- Surrounding terrain

Provide realistic estimates based on typical glacier behavior patterns.

Respond with JSON in this exact format:
{{
  "glacierName": "identified name or \"Unknown Glacier\"",
  "confidence": 0.0,
  "changes": {{
    "iceVolumeChange": 0.0,
    "surfaceAreaChange": 0.0,
    "meltRate": 0.0,
    "elevationChange": 0.0
  }},
  "confidenceIntervals": {{
    "iceVolumeChange": {{"lower": 0.0, "upper": 0.0}},
    "surfaceAreaChange": {{"lower": 0.0, "upper": 0.0}},
    "meltRate": {{"lower": 0.0, "upper": 0.0}}
  }},
  "recommendations": ["..."]
}}

iceVolumeChange and surfaceAreaChange are percentages, meltRate and
elevationChange are meters per year, confidence is between 0 and 1."#,
        url = request.image_url,
        glacier = glacier,
    )
}

/// Extract the JSON object from model text
///
/// Models sometimes wrap JSON in markdown code blocks or add prose around it.
pub fn extract_json(response_text: &str) -> &str {
    let text = response_text.trim();

    if let Some(start) = text.find("```json") {
        let json_start = start + "```json".len();
        if let Some(len) = text[json_start..].find("```") {
            let candidate = text[json_start..json_start + len].trim();
            if !candidate.is_empty() {
                return candidate;
            }
        }
    }

    if let Some(start) = text.find("```") {
        let json_start = start + 3;
        if let Some(len) = text[json_start..].find("```") {
            let candidate = text[json_start..json_start + len].trim();
            if candidate.starts_with('{') && candidate.ends_with('}') {
                return candidate;
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

/// Parse and validate a model reply
///
/// A `fallback` key in the reply is ignored; only the analyzer marks
/// generated estimates.
pub fn parse_analysis(response_text: &str) -> Result<GlacierAnalysis, AnalysisError> {
    let json_text = extract_json(response_text);
    let mut analysis: GlacierAnalysis = serde_json::from_str(json_text).map_err(|e| {
        AnalysisError::InvalidResponse(format!(
            "Failed to parse analysis JSON: {}. Response was: {}",
            e, json_text
        ))
    })?;
    analysis.fallback = false;

    if !(0.0..=1.0).contains(&analysis.confidence) {
        return Err(AnalysisError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            analysis.confidence
        )));
    }

    let changes = &analysis.changes;
    let all_finite = [
        changes.ice_volume_change,
        changes.surface_area_change,
        changes.melt_rate,
        changes.elevation_change,
    ]
    .iter()
    .all(|v| v.is_finite());
    if !all_finite {
        return Err(AnalysisError::InvalidResponse(
            "change estimates must be finite".to_string(),
        ));
    }

    let intervals = &analysis.confidence_intervals;
    for (field, interval) in [
        ("iceVolumeChange", intervals.ice_volume_change),
        ("surfaceAreaChange", intervals.surface_area_change),
        ("meltRate", intervals.melt_rate),
    ] {
        if !(interval.lower <= interval.upper) {
            return Err(AnalysisError::InvalidResponse(format!(
                "interval for {} has lower {} above upper {}",
                field, interval.lower, interval.upper
            )));
        }
    }

    Ok(analysis)
}

/// Plausible randomized estimate for a retreating glacier
pub fn fallback_analysis<R: Rng + ?Sized>(rng: &mut R, request: &AnalysisRequest) -> GlacierAnalysis {
    let ice_volume_change = rng.gen_range(-15.0..-1.0);
    let surface_area_change = rng.gen_range(-10.0..-0.5);
    let melt_rate = rng.gen_range(0.2..2.5);
    let elevation_change = rng.gen_range(-3.0..-0.1);

    let spread = |value: f64, fraction: f64| {
        let half = (value * fraction).abs();
        Interval {
            lower: value - half,
            upper: value + half,
        }
    };

    GlacierAnalysis {
        glacier_name: request
            .glacier_name
            .clone()
            .unwrap_or_else(|| "Unknown Glacier".to_string()),
        confidence: rng.gen_range(0.5..0.8),
        changes: ChangeEstimates {
            ice_volume_change,
            surface_area_change,
            melt_rate,
            elevation_change,
        },
        confidence_intervals: ConfidenceIntervals {
            ice_volume_change: spread(ice_volume_change, 0.25),
            surface_area_change: spread(surface_area_change, 0.25),
            melt_rate: spread(melt_rate, 0.3),
        },
        recommendations: vec![
            "Model response could not be parsed; values are a generated estimate".to_string(),
            "Re-run the analysis or compare with field measurements".to_string(),
        ],
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::backends::MockBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const VALID_REPLY: &str = r#"{
        "glacierName": "Franz Josef Glacier",
        "confidence": 0.82,
        "changes": {
            "iceVolumeChange": -6.1,
            "surfaceAreaChange": -3.4,
            "meltRate": 1.3,
            "elevationChange": -1.1
        },
        "confidenceIntervals": {
            "iceVolumeChange": {"lower": -8.0, "upper": -4.0},
            "surfaceAreaChange": {"lower": -4.5, "upper": -2.0},
            "meltRate": {"lower": 1.0, "upper": 1.6}
        },
        "recommendations": ["Monitor terminus retreat"]
    }"#;

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("https://blob.example.com/glacier-images/1-franz.jpg")
            .for_glacier("g-1", Some("Franz Josef Glacier".to_string()))
    }

    #[test]
    fn test_parse_valid_reply() {
        let analysis = parse_analysis(VALID_REPLY).unwrap();
        assert_eq!(analysis.glacier_name, "Franz Josef Glacier");
        assert_eq!(analysis.changes.ice_volume_change, -6.1);
        assert_eq!(analysis.confidence_intervals.melt_rate.upper, 1.6);
        assert_eq!(analysis.recommendations.len(), 1);
        assert!(!analysis.fallback);
    }

    #[test]
    fn test_parse_ignores_fallback_claimed_by_model() {
        let mut reply: serde_json::Value = serde_json::from_str(VALID_REPLY).unwrap();
        reply["fallback"] = serde_json::Value::Bool(true);

        let analysis = parse_analysis(&reply.to_string()).unwrap();
        assert!(!analysis.fallback);
    }

    #[test]
    fn test_parse_reply_in_markdown_fence() {
        let wrapped = format!("Here is the analysis:\n\n```json\n{}\n```\nDone.", VALID_REPLY);
        assert!(parse_analysis(&wrapped).is_ok());

        let bare = format!("```\n{}\n```", VALID_REPLY);
        assert!(parse_analysis(&bare).is_ok());

        let prose = format!("Result: {} end", VALID_REPLY);
        assert!(parse_analysis(&prose).is_ok());
    }

    #[test]
    fn test_parse_rejects_out_of_range_confidence() {
        let reply = VALID_REPLY.replace("0.82", "1.7");
        match parse_analysis(&reply) {
            Err(AnalysisError::InvalidResponse(msg)) => assert!(msg.contains("confidence")),
            other => panic!("Expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_inverted_interval() {
        let reply = VALID_REPLY.replace(
            r#"{"lower": 1.0, "upper": 1.6}"#,
            r#"{"lower": 1.6, "upper": 1.0}"#,
        );
        match parse_analysis(&reply) {
            Err(AnalysisError::InvalidResponse(msg)) => assert!(msg.contains("meltRate")),
            other => panic!("Expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(matches!(
            parse_analysis(r#"{"glacierName": "X"}"#),
            Err(AnalysisError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_analysis("no json here"),
            Err(AnalysisError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let analysis = parse_analysis(VALID_REPLY).unwrap();
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["glacierName"], "Franz Josef Glacier");
        assert_eq!(json["changes"]["iceVolumeChange"], -6.1);
        assert!(json.get("fallback").is_none());
    }

    #[test]
    fn test_format_prompt_mentions_image_and_glacier() {
        let prompt = format_prompt(&request());
        assert!(prompt.contains("https://blob.example.com/glacier-images/1-franz.jpg"));
        assert!(prompt.contains("Franz Josef Glacier (g-1)"));
        assert!(prompt.contains("Crevasse patterns"));
        assert!(prompt.contains("confidenceIntervals"));

        let anonymous = format_prompt(&AnalysisRequest::new("file:///tmp/x.png"));
        assert!(anonymous.contains("None provided"));
    }

    #[test]
    fn test_fallback_analysis_is_plausible() {
        let mut rng = StdRng::seed_from_u64(7);
        let analysis = fallback_analysis(&mut rng, &request());

        assert!(analysis.fallback);
        assert_eq!(analysis.glacier_name, "Franz Josef Glacier");
        assert!((0.5..0.8).contains(&analysis.confidence));
        assert!(analysis.changes.ice_volume_change < 0.0);
        assert!(analysis.changes.melt_rate > 0.0);
        assert!(analysis
            .confidence_intervals
            .ice_volume_change
            .contains(analysis.changes.ice_volume_change));

        let json = serde_json::to_string(&analysis).unwrap();
        let reparsed = parse_analysis(&json).unwrap();
        assert!(reparsed.fallback);
    }

    #[tokio::test]
    async fn test_analyzer_returns_parsed_reply() {
        let backend = Arc::new(MockBackend::success());
        let analyzer = ImageAnalyzer::with_backend(backend.clone());

        let analysis = analyzer.analyze(&request()).await.unwrap();
        assert!(!analysis.fallback);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(
            backend.last_request().unwrap().glacier_id.as_deref(),
            Some("g-1")
        );
    }

    #[tokio::test]
    async fn test_unparseable_reply_without_fallback_is_error() {
        let analyzer = ImageAnalyzer::with_backend(Arc::new(MockBackend::malformed()));
        let result = analyzer.analyze(&request()).await;
        assert!(matches!(result, Err(AnalysisError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_unparseable_reply_with_fallback_is_estimate() {
        let analyzer =
            ImageAnalyzer::with_backend(Arc::new(MockBackend::malformed())).with_fallback(true);
        let analysis = analyzer.analyze(&request()).await.unwrap();
        assert!(analysis.fallback);
    }

    #[tokio::test]
    async fn test_fallback_never_masks_transport_errors() {
        let analyzer = ImageAnalyzer::with_backend(Arc::new(MockBackend::timeout())).with_fallback(true);
        assert_eq!(analyzer.analyze(&request()).await, Err(AnalysisError::Timeout));

        let analyzer = ImageAnalyzer::with_backend(Arc::new(MockBackend::error(
            "rate limited".to_string(),
        )))
        .with_fallback(true);
        assert!(matches!(
            analyzer.analyze(&request()).await,
            Err(AnalysisError::BackendError(_))
        ));
    }
}
