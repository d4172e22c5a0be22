//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for Gemini's `generateContent`
//! endpoint with:
//! - Single-shot text completions
//! - Optional system instruction and generation settings
//! - Prompt-feedback and finish-reason reporting

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Placeholder value shipped in sample configs; treated as "no key".
pub const PLACEHOLDER_KEY: &str = "YOUR_API_KEY_HERE";

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Prompt blocked: {0}")]
    Blocked(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for Gemini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gemini")
            .field("api_key", &"<REDACTED>")
            .field("model", &self.model)
            .finish()
    }
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a Gemini client from the GEMINI_API_KEY environment variable.
    ///
    /// An empty key or the sample placeholder is reported as [`Error::NoApiKey`].
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| Error::NoApiKey)?;
        if !is_usable_key(&api_key) {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model requests are sent to unless overridden per request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let api_request = build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{API_BASE}/models/{model}:generateContent"))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_response(model, api_response)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

/// Whether a credential string should be used at all.
pub fn is_usable_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key != PLACEHOLDER_KEY
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request to send to Gemini.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Request {
    /// Create a new single-turn request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            prompt: prompt.into(),
            max_output_tokens: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completion response from Gemini.
#[derive(Debug, Clone)]
pub struct Response {
    pub model: String,
    pub parts: Vec<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl Response {
    /// Get all text parts of the first candidate concatenated.
    pub fn text(&self) -> String {
        self.parts.concat()
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

impl FinishReason {
    fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("STOP") | None => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") => FinishReason::Safety,
            Some("RECITATION") => FinishReason::Recitation,
            Some(_) => FinishReason::Other,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<ApiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn build_api_request(request: &Request) -> ApiRequest {
    let text_content = |role: Option<&str>, text: &str| ApiContent {
        role: role.map(str::to_string),
        parts: vec![ApiPart {
            text: Some(text.to_string()),
        }],
    };

    let generation_config = if request.max_output_tokens.is_some() || request.temperature.is_some()
    {
        Some(ApiGenerationConfig {
            max_output_tokens: request.max_output_tokens,
            temperature: request.temperature,
        })
    } else {
        None
    };

    ApiRequest {
        contents: vec![text_content(Some("user"), &request.prompt)],
        system_instruction: request.system.as_deref().map(|s| text_content(None, s)),
        generation_config,
    }
}

fn parse_response(model: String, api_response: ApiResponse) -> Result<Response, Error> {
    let blocked = api_response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);

    let usage = api_response
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    let Some(candidate) = api_response.candidates.into_iter().next() else {
        return match blocked {
            Some(reason) => Err(Error::Blocked(reason)),
            None => Ok(Response {
                model,
                parts: Vec::new(),
                finish_reason: FinishReason::Other,
                usage,
            }),
        };
    };

    let parts = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(Response {
        model,
        parts,
        finish_reason: FinishReason::parse(candidate.finish_reason.as_deref()),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Gemini::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_client_with_model() {
        let client = Gemini::new("test-key").with_model("gemini-2.0-flash");
        assert_eq!(client.model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = Gemini::new("super-secret");
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn test_usable_key() {
        assert!(is_usable_key("abc123"));
        assert!(!is_usable_key(""));
        assert!(!is_usable_key("   "));
        assert!(!is_usable_key(PLACEHOLDER_KEY));
    }

    #[test]
    fn test_request_serialization() {
        let request = Request::new("Hello")
            .with_system("Be brief")
            .with_temperature(0.5);
        let json = serde_json::to_value(build_api_request(&request)).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be brief");
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_request_without_settings_omits_config() {
        let json = serde_json::to_value(build_api_request(&Request::new("Hi"))).unwrap();
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_response_text() {
        let raw = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let response = parse_response(DEFAULT_MODEL.to_string(), api).unwrap();

        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.output_tokens, 3);
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let err = parse_response(DEFAULT_MODEL.to_string(), api).unwrap_err();
        assert!(matches!(err, Error::Blocked(reason) if reason == "SAFETY"));
    }

    #[test]
    fn test_parse_candidate_without_content() {
        let raw = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let response = parse_response(DEFAULT_MODEL.to_string(), api).unwrap();
        assert!(response.text().is_empty());
        assert_eq!(response.finish_reason, FinishReason::Safety);
    }
}
