use crate::ai::analyzer::{format_prompt, system_prompt, AnalysisRequest};
use crate::error::AnalysisError;
use crate::http::http_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default timeout for model requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Trait for analysis provider implementations
///
/// A backend sends the prompt for one image and returns the raw model
/// text. Parsing and validation happen in the analyzer.
pub trait AnalysisBackend: Send + Sync {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Ollama backend for local inference
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Example
    /// ```
    /// use glacierwatch::ai::backends::OllamaBackend;
    ///
    /// let backend = OllamaBackend::new(
    ///     "http://localhost:11434".to_string(),
    ///     "llava".to_string()
    /// );
    /// ```
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            endpoint,
            model,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn api_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

impl AnalysisBackend for OllamaBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = OllamaRequest {
                model: self.model.clone(),
                prompt: format!("{}\n\n{}", system_prompt(), format_prompt(request)),
                stream: false,
                format: "json".to_string(),
                options: OllamaOptions {
                    temperature: 0.1,
                    top_p: 0.9,
                    num_predict: 1000,
                },
            };

            let response = self.client.post(self.api_url()).json(&body).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AnalysisError::BackendError(format!(
                    "Ollama API returned error {}: {}",
                    status, error_text
                )));
            }

            let ollama_response: OllamaResponse = response.json().await.map_err(|e| {
                AnalysisError::InvalidResponse(format!("Failed to parse Ollama response: {}", e))
            })?;

            if let Some(error) = ollama_response.error {
                return Err(AnalysisError::BackendError(format!(
                    "Ollama error: {}",
                    error
                )));
            }

            Ok(ollama_response.response)
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// OpenAI backend using chat completions with JSON output
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: OpenAIResponseFormat,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl OpenAIBackend {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Create a new OpenAI backend
    ///
    /// # Example
    /// ```
    /// use glacierwatch::ai::backends::OpenAIBackend;
    ///
    /// let backend = OpenAIBackend::new("sk-...".to_string(), "gpt-4o".to_string());
    /// ```
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, Self::DEFAULT_BASE_URL.to_string())
    }

    /// Create a new OpenAI backend against an OpenAI-compatible endpoint
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            api_key,
            model,
            base_url,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &AnalysisRequest) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system_prompt().to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: format_prompt(request),
                },
            ],
            temperature: 0.1,
            max_tokens: 1000,
            response_format: OpenAIResponseFormat {
                format_type: "json_object".to_string(),
            },
        }
    }
}

impl AnalysisBackend for OpenAIBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            let body = self.build_request(request);

            let response = self
                .client
                .post(self.api_url())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AnalysisError::BackendError(format!(
                    "OpenAI API returned error {}: {}",
                    status, error_text
                )));
            }

            let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
                AnalysisError::InvalidResponse(format!("Failed to parse OpenAI response: {}", e))
            })?;

            if let Some(error) = openai_response.error {
                return Err(AnalysisError::BackendError(format!(
                    "OpenAI API error ({}): {}",
                    error.error_type, error.message
                )));
            }

            let choice = openai_response.choices.into_iter().next().ok_or_else(|| {
                AnalysisError::InvalidResponse("No choices in OpenAI response".to_string())
            })?;

            if choice.finish_reason.as_deref() == Some("length") {
                log::warn!("OpenAI reply was truncated at max_tokens");
            }

            choice.message.content.ok_or_else(|| {
                AnalysisError::InvalidResponse("Empty message in OpenAI response".to_string())
            })
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Canned reply returned by [`MockBackend::success`]
pub const MOCK_ANALYSIS_JSON: &str = r#"{
  "glacierName": "Mock Glacier",
  "confidence": 0.75,
  "changes": {
    "iceVolumeChange": -4.2,
    "surfaceAreaChange": -2.1,
    "meltRate": 0.9,
    "elevationChange": -0.8
  },
  "confidenceIntervals": {
    "iceVolumeChange": {"lower": -5.5, "upper": -3.0},
    "surfaceAreaChange": {"lower": -3.0, "upper": -1.2},
    "meltRate": {"lower": 0.7, "upper": 1.1}
  },
  "recommendations": ["Mock recommendation 1", "Mock recommendation 2"]
}"#;

/// Mock backend for testing and offline use
///
/// Returns scripted replies in order, cycling after the last one, and
/// records how it was called.
pub struct MockBackend {
    responses: Vec<Result<String, AnalysisError>>,
    current_index: Arc<Mutex<usize>>,
    delay: Option<Duration>,
    call_count: Arc<Mutex<usize>>,
    last_request: Arc<Mutex<Option<AnalysisRequest>>>,
}

impl MockBackend {
    pub fn with_response(response: Result<String, AnalysisError>) -> Self {
        Self::with_responses(vec![response])
    }

    pub fn with_responses(responses: Vec<Result<String, AnalysisError>>) -> Self {
        Self {
            responses,
            current_index: Arc::new(Mutex::new(0)),
            delay: None,
            call_count: Arc::new(Mutex::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Always returns a valid analysis
    pub fn success() -> Self {
        Self::with_response(Ok(MOCK_ANALYSIS_JSON.to_string()))
    }

    /// Always returns text that is not an analysis
    pub fn malformed() -> Self {
        Self::with_response(Ok("I cannot determine anything from this image.".to_string()))
    }

    pub fn error(error_message: String) -> Self {
        Self::with_response(Err(AnalysisError::BackendError(error_message)))
    }

    pub fn timeout() -> Self {
        Self::with_response(Err(AnalysisError::Timeout))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.call_count.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.current_index.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }

    fn next_response(&self) -> Result<String, AnalysisError> {
        if self.responses.is_empty() {
            return Err(AnalysisError::BackendError(
                "Mock backend has no scripted responses".to_string(),
            ));
        }
        let mut index = self.current_index.lock().unwrap_or_else(PoisonError::into_inner);
        let response_index = *index % self.responses.len();
        *index += 1;
        self.responses[response_index].clone()
    }
}

impl AnalysisBackend for MockBackend {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AnalysisError>> + Send + 'a>> {
        Box::pin(async move {
            *self.call_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
            *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(request.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.next_response()
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
